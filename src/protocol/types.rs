//! Wire-level identifiers and the raw notification shape.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::domain::Value;

/// Reference to a node in the server address space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeRef(String);

impl NodeRef {
    /// Wraps a node identifier string (e.g. `ns=0;i=2253`).
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Namespace-qualified browse name, displayed as `<ns>:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    /// Namespace index on the connected server.
    pub namespace: u16,
    /// Browse name within that namespace.
    pub name: String,
}

impl QualifiedName {
    /// Creates a qualified name.
    #[must_use]
    pub fn new(namespace: u16, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// Path of browse names starting at the root node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BrowsePath(Vec<QualifiedName>);

impl BrowsePath {
    /// Builds a path from its elements.
    #[must_use]
    pub fn new(elements: Vec<QualifiedName>) -> Self {
        Self(elements)
    }

    /// Returns a new path with `element` appended.
    #[must_use]
    pub fn child(&self, element: QualifiedName) -> Self {
        let mut elements = self.0.clone();
        elements.push(element);
        Self(elements)
    }

    /// Path elements in order.
    #[must_use]
    pub fn elements(&self) -> &[QualifiedName] {
        &self.0
    }
}

impl fmt::Display for BrowsePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

/// Identifier returned when a filter set is bound to a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorHandle(pub u32);

impl fmt::Display for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node attributes the gateway reads for the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeId {
    /// Node identifier.
    NodeId,
    /// Node class.
    NodeClass,
    /// Browse name.
    BrowseName,
    /// Display name.
    DisplayName,
    /// Description.
    Description,
    /// Event notifier flags.
    EventNotifier,
    /// Write mask.
    WriteMask,
    /// User write mask.
    UserWriteMask,
    /// Role permissions.
    RolePermissions,
    /// User role permissions.
    UserRolePermissions,
    /// Access restrictions.
    AccessRestrictions,
    /// Current value (variables only).
    Value,
}

impl AttributeId {
    /// The attribute batch returned by the `read` command, in reply order.
    pub const READ_BATCH: [Self; 12] = [
        Self::NodeId,
        Self::NodeClass,
        Self::BrowseName,
        Self::DisplayName,
        Self::Description,
        Self::EventNotifier,
        Self::WriteMask,
        Self::UserWriteMask,
        Self::RolePermissions,
        Self::UserRolePermissions,
        Self::AccessRestrictions,
        Self::Value,
    ];

    /// Attribute name as used in replies.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NodeId => "NodeId",
            Self::NodeClass => "NodeClass",
            Self::BrowseName => "BrowseName",
            Self::DisplayName => "DisplayName",
            Self::Description => "Description",
            Self::EventNotifier => "EventNotifier",
            Self::WriteMask => "WriteMask",
            Self::UserWriteMask => "UserWriteMask",
            Self::RolePermissions => "RolePermissions",
            Self::UserRolePermissions => "UserRolePermissions",
            Self::AccessRestrictions => "AccessRestrictions",
            Self::Value => "Value",
        }
    }
}

/// Session identity announced during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Application name, `urn:<host>:<application>`.
    pub application_name: String,
    /// Application URI, same shape as the name.
    pub application_uri: String,
    /// Product URI, `urn:<application>`.
    pub product_uri: String,
}

impl ClientIdentity {
    /// Derives the identity from the local host name and application name.
    #[must_use]
    pub fn for_host(host: &str, application: &str) -> Self {
        let urn = format!("urn:{host}:{application}");
        Self {
            application_name: urn.clone(),
            application_uri: urn,
            product_uri: format!("urn:{application}"),
        }
    }

    /// Identity for this machine, using the OS host name when available.
    #[must_use]
    pub fn local(application: &str) -> Self {
        let host = sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string());
        Self::for_host(&host, application)
    }
}

/// One server-pushed notification, as handed over by the protocol client.
///
/// Category content uses slash-qualified attribute names, e.g.
/// `JoiningSystemEventContent/EventCode`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Event type node the notification was raised for.
    pub event_type: NodeRef,
    attributes: BTreeMap<String, Value>,
}

impl RawEvent {
    /// Creates a notification with no attributes.
    #[must_use]
    pub fn new(event_type: NodeRef) -> Self {
        Self {
            event_type,
            attributes: BTreeMap::new(),
        }
    }

    /// Sets an attribute (builder style).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Returns an attribute by name. `Null` attributes count as absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).filter(|value| !value.is_null())
    }

    /// Iterates over all attributes.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browse_path_display_joins_qualified_names() {
        let base = BrowsePath::new(vec![
            QualifiedName::new(0, "Types"),
            QualifiedName::new(0, "EventTypes"),
        ]);
        let path = base.child(QualifiedName::new(3, "ResultReadyEventType"));
        assert_eq!(path.to_string(), "0:Types/0:EventTypes/3:ResultReadyEventType");
        assert_eq!(base.elements().len(), 2);
    }

    #[test]
    fn identity_is_derived_from_host() {
        let identity = ClientIdentity::for_host("station-7", "IJT:WebClient");
        assert_eq!(identity.application_name, "urn:station-7:IJT:WebClient");
        assert_eq!(identity.application_uri, identity.application_name);
        assert_eq!(identity.product_uri, "urn:IJT:WebClient");
    }

    #[test]
    fn null_attributes_read_as_absent() {
        let raw = RawEvent::new(NodeRef::new("ns=4;i=1"))
            .with("Severity", 100u16)
            .with("EventCode", Value::Null);
        assert!(raw.get("Severity").is_some());
        assert!(raw.get("EventCode").is_none());
        assert_eq!(raw.attributes().count(), 2);
    }

    #[test]
    fn read_batch_names_are_stable() {
        let names: Vec<_> = AttributeId::READ_BATCH.iter().map(AttributeId::as_str).collect();
        assert_eq!(names.first(), Some(&"NodeId"));
        assert_eq!(names.last(), Some(&"Value"));
    }
}
