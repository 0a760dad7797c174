//! Event categories and the filter sets they subscribe to.

use std::fmt;

use serde::Serialize;
use utoipa::ToSchema;

use crate::protocol::{BrowsePath, QualifiedName};

/// Namespace URI of the Machinery Result companion specification.
pub const MACHINERY_RESULT_NS: &str = "http://opcfoundation.org/UA/Machinery/Result/";

/// Namespace URI of the Industrial Joining Technique base specification.
pub const IJT_BASE_NS: &str = "http://opcfoundation.org/UA/IJT/Base/";

/// Namespace indices of the companion specifications on one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompanionNamespaces {
    /// Index of [`MACHINERY_RESULT_NS`].
    pub machinery_result: u16,
    /// Index of [`IJT_BASE_NS`].
    pub ijt_base: u16,
}

/// Logical grouping of notification types, each with its own bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Joining system events: tool connected, limits exceeded, etc.
    JoiningSystem,
    /// Result ready events carrying a tightening result.
    ResultReady,
}

impl EventCategory {
    /// All categories, in subscription order.
    pub const ALL: [Self; 2] = [Self::ResultReady, Self::JoiningSystem];

    /// Returns the category as a static string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::JoiningSystem => "joining_system",
            Self::ResultReady => "result_ready",
        }
    }

    /// Selects categories from a browser filter string.
    ///
    /// Matching is case-insensitive on the trimmed input. An empty filter
    /// selects every category.
    #[must_use]
    pub fn select(filter: &str) -> Vec<Self> {
        let filter = filter.trim().to_lowercase();
        if filter.is_empty() {
            return Self::ALL.to_vec();
        }
        let mut selected = Vec::new();
        if filter.contains("resultevent") {
            selected.push(Self::ResultReady);
        }
        if filter.contains("joiningsystemevent") {
            selected.push(Self::JoiningSystem);
        }
        selected
    }

    /// Browse names of the event types this category filters on, relative
    /// to `BaseEventType`.
    #[must_use]
    pub fn event_type_names(&self, ns: CompanionNamespaces) -> Vec<Vec<QualifiedName>> {
        match self {
            Self::ResultReady => {
                let result_ready = QualifiedName::new(ns.machinery_result, "ResultReadyEventType");
                vec![
                    vec![result_ready.clone()],
                    vec![
                        result_ready,
                        QualifiedName::new(ns.ijt_base, "JoiningSystemResultReadyEventType"),
                    ],
                ]
            }
            Self::JoiningSystem => vec![vec![QualifiedName::new(
                ns.ijt_base,
                "JoiningSystemEventType",
            )]],
        }
    }

    /// Full browse paths of this category's event-type filter set.
    #[must_use]
    pub fn event_type_paths(&self, ns: CompanionNamespaces) -> Vec<BrowsePath> {
        let base = base_event_type_path();
        self.event_type_names(ns)
            .into_iter()
            .map(|names| names.into_iter().fold(base.clone(), |path, name| path.child(name)))
            .collect()
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `0:Types/0:EventTypes/0:BaseEventType`.
#[must_use]
pub fn base_event_type_path() -> BrowsePath {
    BrowsePath::new(vec![
        QualifiedName::new(0, "Types"),
        QualifiedName::new(0, "EventTypes"),
        QualifiedName::new(0, "BaseEventType"),
    ])
}

/// `0:Objects/0:Server`, the notifier events are subscribed on.
#[must_use]
pub fn server_object_path() -> BrowsePath {
    BrowsePath::new(vec![
        QualifiedName::new(0, "Objects"),
        QualifiedName::new(0, "Server"),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: CompanionNamespaces = CompanionNamespaces {
        machinery_result: 3,
        ijt_base: 4,
    };

    #[test]
    fn empty_filter_selects_all() {
        assert_eq!(EventCategory::select("  "), EventCategory::ALL.to_vec());
    }

    #[test]
    fn filter_is_case_insensitive() {
        assert_eq!(
            EventCategory::select(" JoiningSystemEvent "),
            vec![EventCategory::JoiningSystem]
        );
        assert_eq!(
            EventCategory::select("joiningresultevent"),
            vec![EventCategory::ResultReady]
        );
    }

    #[test]
    fn unknown_filter_selects_nothing() {
        assert!(EventCategory::select("alarms").is_empty());
    }

    #[test]
    fn result_ready_filters_include_joining_subtype() {
        let paths = EventCategory::ResultReady.event_type_paths(NS);
        let rendered: Vec<String> = paths.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "0:Types/0:EventTypes/0:BaseEventType/3:ResultReadyEventType".to_string(),
                "0:Types/0:EventTypes/0:BaseEventType/3:ResultReadyEventType/4:JoiningSystemResultReadyEventType".to_string(),
            ]
        );
    }

    #[test]
    fn joining_system_filter_is_single_type() {
        let paths = EventCategory::JoiningSystem.event_type_paths(NS);
        assert_eq!(paths.len(), 1);
        assert_eq!(server_object_path().to_string(), "0:Objects/0:Server");
    }
}
