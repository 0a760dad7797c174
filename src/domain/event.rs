//! Immutable event snapshots built from raw notifications.
//!
//! A snapshot is taken exactly once per notification, on the protocol
//! client's thread, and is read-only afterwards. It is queued, serialized
//! and dropped.

use std::fmt;

use chrono::{DateTime, Utc};

use super::event_category::EventCategory;
use super::value::{FieldVisitor, NamedFields, Opaque, Record, Value};
use crate::protocol::{NodeRef, RawEvent};

const EVENT_CODE: &str = "JoiningSystemEventContent/EventCode";
const EVENT_TEXT: &str = "JoiningSystemEventContent/EventText";
const JOINING_TECHNOLOGY: &str = "JoiningSystemEventContent/JoiningTechnology";
const ASSOCIATED_ENTITIES: &str = "JoiningSystemEventContent/AssociatedEntities";
const REPORTED_VALUES: &str = "JoiningSystemEventContent/ReportedValues";

/// Why a raw notification could not be turned into a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    /// A required attribute is absent.
    #[error("missing attribute {0}")]
    MissingAttribute(&'static str),

    /// An attribute has the wrong shape.
    #[error("attribute {name} is not a {expected}")]
    InvalidAttribute {
        /// Attribute name.
        name: &'static str,
        /// Expected shape.
        expected: &'static str,
    },
}

/// Text with an optional locale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalizedText {
    /// Locale tag, e.g. `en-US`.
    pub locale: Option<String>,
    /// Text content.
    pub text: String,
}

impl LocalizedText {
    /// Extracts localized text from a record, mapping, or scalar value.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Record(_) | Value::Mapping(_) => Self {
                locale: value
                    .field("Locale")
                    .filter(|v| !v.is_null())
                    .map(ToString::to_string),
                text: value.field("Text").map(ToString::to_string).unwrap_or_default(),
            },
            Value::Null => Self::default(),
            other => Self {
                locale: None,
                text: other.to_string(),
            },
        }
    }
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&LocalizedText> for Value {
    fn from(text: &LocalizedText) -> Self {
        Value::Record(
            Record::new("LocalizedText")
                .with("Locale", text.locale.clone())
                .with("Text", text.text.as_str()),
        )
    }
}

/// Decodes an event id, replacing invalid UTF-8 sequences instead of failing.
#[must_use]
pub fn decode_event_id(value: &Value) -> String {
    match value {
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Attributes shared by every event category.
#[derive(Debug, Clone, PartialEq)]
pub struct EventHeader {
    /// Event type node.
    pub event_type: NodeRef,
    /// Event id, decoded from its byte form.
    pub event_id: String,
    /// Human message.
    pub message: LocalizedText,
    /// Severity, 1..=1000.
    pub severity: u16,
    /// Generation time at the source.
    pub time: Option<DateTime<Utc>>,
    /// Time the server received the event from the source.
    pub receive_time: Option<DateTime<Utc>>,
    /// Source name.
    pub source_name: String,
    /// Source node.
    pub source_node: String,
    received_at: DateTime<Utc>,
}

impl EventHeader {
    fn from_raw(raw: &RawEvent, received_at: DateTime<Utc>) -> Result<Self, NotificationError> {
        let event_id = raw
            .get("EventId")
            .map(decode_event_id)
            .ok_or(NotificationError::MissingAttribute("EventId"))?;
        let severity = match raw.get("Severity") {
            None => 0,
            Some(value) => value
                .as_u64()
                .and_then(|v| u16::try_from(v).ok())
                .ok_or(NotificationError::InvalidAttribute {
                    name: "Severity",
                    expected: "16-bit unsigned integer",
                })?,
        };

        Ok(Self {
            event_type: raw.event_type.clone(),
            event_id,
            message: raw
                .get("Message")
                .map(LocalizedText::from_value)
                .unwrap_or_default(),
            severity,
            time: raw.get("Time").and_then(Value::as_utc),
            receive_time: raw.get("ReceiveTime").and_then(Value::as_utc),
            source_name: display_or_empty(raw.get("SourceName")),
            source_node: display_or_empty(raw.get("SourceNode")),
            received_at,
        })
    }

    /// Local instant the notification was handed to the gateway.
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    fn visit(&self, visitor: &mut dyn FieldVisitor) {
        visitor.visit(
            "EventType",
            &Value::Opaque(Opaque::node_id(self.event_type.as_str())),
        );
        visitor.visit("EventId", &Value::from(self.event_id.as_str()));
        visitor.visit("Message", &Value::from(&self.message));
        visitor.visit("Severity", &Value::from(self.severity));
        visitor.visit("Time", &Value::from(self.time));
        visitor.visit("ReceiveTime", &Value::from(self.receive_time));
        visitor.visit("SourceName", &Value::from(self.source_name.as_str()));
        visitor.visit("SourceNode", &Value::from(self.source_node.as_str()));
    }
}

/// Snapshot of a joining system event.
#[derive(Debug, Clone, PartialEq)]
pub struct JoiningSystemEvent {
    /// Common attributes.
    pub header: EventHeader,
    /// Time zone information of the source.
    pub local_time: Option<Value>,
    /// Condition class id.
    pub condition_class_id: Option<String>,
    /// Condition class name.
    pub condition_class_name: Option<String>,
    /// Condition sub-class ids.
    pub condition_sub_class_id: Vec<String>,
    /// Condition sub-class names.
    pub condition_sub_class_name: Vec<String>,
    /// Vendor event code.
    pub event_code: Option<Value>,
    /// Vendor event text.
    pub event_text: Option<String>,
    /// Joining technology, e.g. `Tightening`.
    pub joining_technology: Option<String>,
    /// Entities the event refers to (tools, controllers, programs).
    pub associated_entities: Vec<Value>,
    /// Values reported with the event.
    pub reported_values: Vec<Value>,
}

impl JoiningSystemEvent {
    /// Builds the snapshot from a raw notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError`] if the event id is missing or a content
    /// attribute has the wrong shape.
    pub fn from_raw(raw: &RawEvent, received_at: DateTime<Utc>) -> Result<Self, NotificationError> {
        Ok(Self {
            header: EventHeader::from_raw(raw, received_at)?,
            local_time: raw.get("LocalTime").cloned(),
            condition_class_id: raw.get("ConditionClassId").map(ToString::to_string),
            condition_class_name: raw
                .get("ConditionClassName")
                .map(|v| LocalizedText::from_value(v).text),
            condition_sub_class_id: sequence(raw, "ConditionSubClassId")?
                .iter()
                .map(ToString::to_string)
                .collect(),
            condition_sub_class_name: sequence(raw, "ConditionSubClassName")?
                .iter()
                .map(|v| LocalizedText::from_value(v).text)
                .collect(),
            event_code: raw.get(EVENT_CODE).cloned(),
            event_text: raw
                .get(EVENT_TEXT)
                .map(|v| LocalizedText::from_value(v).text),
            joining_technology: raw
                .get(JOINING_TECHNOLOGY)
                .map(|v| LocalizedText::from_value(v).text),
            associated_entities: sequence(raw, ASSOCIATED_ENTITIES)?.to_vec(),
            reported_values: sequence(raw, REPORTED_VALUES)?.to_vec(),
        })
    }
}

impl NamedFields for JoiningSystemEvent {
    fn type_name(&self) -> &str {
        "JoiningSystemEvent"
    }

    fn visit_fields(&self, visitor: &mut dyn FieldVisitor) {
        self.header.visit(visitor);
        visitor.visit("LocalTime", self.local_time.as_ref().unwrap_or(&Value::Null));
        visitor.visit("ConditionClassId", &Value::from(self.condition_class_id.clone()));
        visitor.visit(
            "ConditionClassName",
            &Value::from(self.condition_class_name.clone()),
        );
        visitor.visit(
            "ConditionSubClassId",
            &strings_to_value(&self.condition_sub_class_id),
        );
        visitor.visit(
            "ConditionSubClassName",
            &strings_to_value(&self.condition_sub_class_name),
        );
        visitor.visit("EventCode", self.event_code.as_ref().unwrap_or(&Value::Null));
        visitor.visit("EventText", &Value::from(self.event_text.clone()));
        visitor.visit(
            "JoiningTechnology",
            &Value::from(self.joining_technology.clone()),
        );
        visitor.visit(
            "AssociatedEntities",
            &Value::Sequence(self.associated_entities.clone()),
        );
        visitor.visit(
            "ReportedValues",
            &Value::Sequence(self.reported_values.clone()),
        );
    }
}

/// Snapshot of a result ready event.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultReadyEvent {
    /// Common attributes.
    pub header: EventHeader,
    /// Structured result object.
    pub result: Value,
}

impl ResultReadyEvent {
    /// Builds the snapshot from a raw notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError`] if the event id or the result is missing.
    pub fn from_raw(raw: &RawEvent, received_at: DateTime<Utc>) -> Result<Self, NotificationError> {
        Ok(Self {
            header: EventHeader::from_raw(raw, received_at)?,
            result: raw
                .get("Result")
                .cloned()
                .ok_or(NotificationError::MissingAttribute("Result"))?,
        })
    }

    /// Start of the joining process, from the result metadata.
    #[must_use]
    pub fn processing_start(&self) -> Option<DateTime<Utc>> {
        self.result
            .path(&["ResultMetaData", "ProcessingTimes", "StartTime"])
            .and_then(Value::as_utc)
    }

    /// End of the joining process, from the result metadata.
    #[must_use]
    pub fn processing_end(&self) -> Option<DateTime<Utc>> {
        self.result
            .path(&["ResultMetaData", "ProcessingTimes", "EndTime"])
            .and_then(Value::as_utc)
    }

    /// Creation time of the result, from the result metadata.
    #[must_use]
    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.result
            .path(&["ResultMetaData", "CreationTime"])
            .and_then(Value::as_utc)
    }
}

impl NamedFields for ResultReadyEvent {
    fn type_name(&self) -> &str {
        "ResultReadyEvent"
    }

    fn visit_fields(&self, visitor: &mut dyn FieldVisitor) {
        self.header.visit(visitor);
        visitor.visit("Result", &self.result);
    }
}

/// Category-tagged event snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Joining system event.
    JoiningSystem(JoiningSystemEvent),
    /// Result ready event.
    ResultReady(ResultReadyEvent),
}

impl Event {
    /// Builds the snapshot for `category` from a raw notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError`] if the notification is malformed.
    pub fn from_raw(
        category: EventCategory,
        raw: &RawEvent,
        received_at: DateTime<Utc>,
    ) -> Result<Self, NotificationError> {
        match category {
            EventCategory::JoiningSystem => {
                JoiningSystemEvent::from_raw(raw, received_at).map(Self::JoiningSystem)
            }
            EventCategory::ResultReady => {
                ResultReadyEvent::from_raw(raw, received_at).map(Self::ResultReady)
            }
        }
    }

    /// Returns the event's category.
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        match self {
            Self::JoiningSystem(_) => EventCategory::JoiningSystem,
            Self::ResultReady(_) => EventCategory::ResultReady,
        }
    }

    /// Returns the common attributes.
    #[must_use]
    pub const fn header(&self) -> &EventHeader {
        match self {
            Self::JoiningSystem(e) => &e.header,
            Self::ResultReady(e) => &e.header,
        }
    }
}

impl NamedFields for Event {
    fn type_name(&self) -> &str {
        match self {
            Self::JoiningSystem(e) => e.type_name(),
            Self::ResultReady(e) => e.type_name(),
        }
    }

    fn visit_fields(&self, visitor: &mut dyn FieldVisitor) {
        match self {
            Self::JoiningSystem(e) => e.visit_fields(visitor),
            Self::ResultReady(e) => e.visit_fields(visitor),
        }
    }
}

fn sequence<'a>(raw: &'a RawEvent, name: &'static str) -> Result<&'a [Value], NotificationError> {
    match raw.get(name) {
        None => Ok(&[]),
        Some(value) => value.as_sequence().ok_or(NotificationError::InvalidAttribute {
            name,
            expected: "sequence",
        }),
    }
}

fn display_or_empty(value: Option<&Value>) -> String {
    value.map(ToString::to_string).unwrap_or_default()
}

fn strings_to_value(items: &[String]) -> Value {
    Value::Sequence(items.iter().map(|s| Value::from(s.as_str())).collect())
}
