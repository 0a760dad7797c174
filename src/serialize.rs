//! JSON-safe serialization of protocol values and event snapshots.
//!
//! [`serialize`] never fails: anything without a native JSON form degrades
//! to its display string. Records are tagged with their type name under
//! [`RECORD_TAG`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value as Json};

use crate::domain::value::NAIVE_ISO_FORMAT;
use crate::domain::{Event, EventCategory, FieldVisitor, NamedFields, Value};

/// Key carrying a record's type name in serialized output.
///
/// The browser client dispatches node ids, qualified names and localized
/// texts on this key.
pub const RECORD_TAG: &str = "pythonclass";

/// Converts a protocol value into a JSON tree.
#[must_use]
pub fn serialize(value: &Value) -> Json {
    match value {
        Value::Record(record) => serialize_record(record),
        Value::Null => Json::Null,
        Value::Sequence(items) => Json::Array(items.iter().map(serialize).collect()),
        Value::Mapping(map) => Json::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), serialize(value)))
                .collect(),
        ),
        Value::DateTime(dt) => Json::String(dt.to_rfc3339()),
        Value::NaiveDateTime(naive) => Json::String(naive.format(NAIVE_ISO_FORMAT).to_string()),
        Value::String(s) => Json::String(s.clone()),
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number(Number::from(*i)),
        Value::UInt(u) => Json::Number(Number::from(*u)),
        Value::Float(f) => {
            Number::from_f64(*f).map_or_else(|| Json::String(f.to_string()), Json::Number)
        }
        Value::Bytes(_) | Value::Opaque(_) => Json::String(value.to_string()),
    }
}

/// Serializes anything exposing named fields as a tagged JSON object.
#[must_use]
///
/// The tag is written first; a public field with the tag's name is
/// skipped and logged.
pub fn serialize_record(record: &dyn NamedFields) -> Json {
    let type_name = record.type_name();
    let mut object = Map::new();
    object.insert(RECORD_TAG.to_string(), Json::String(type_name.to_string()));
    let mut collector = ObjectCollector { type_name, object };
    record.visit_fields(&mut collector);
    Json::Object(collector.object)
}

struct ObjectCollector<'a> {
    type_name: &'a str,
    object: Map<String, Json>,
}

impl FieldVisitor for ObjectCollector<'_> {
    fn visit(&mut self, name: &str, value: &Value) {
        if name == RECORD_TAG {
            tracing::warn!(
                record = self.type_name,
                field = name,
                "field shadows record tag; skipped"
            );
            return;
        }
        self.object.insert(name.to_string(), serialize(value));
    }
}

/// Failure while serializing a batch of name/value pairs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializationError {
    /// One value of the batch could not be obtained.
    #[error("value for {name} unavailable: {message}")]
    ValueUnavailable {
        /// Pair key.
        name: String,
        /// Underlying failure.
        message: String,
    },

    /// The same key appeared twice.
    #[error("duplicate key {0}")]
    DuplicateKey(String),
}

/// Serializes name/value pairs into one JSON object.
///
/// All or nothing: if any pair fails, the result is an empty object so
/// readers never see a partial record.
#[must_use]
pub fn serialize_pairs<K, E, I>(pairs: I) -> Json
where
    K: Into<String>,
    E: fmt::Display,
    I: IntoIterator<Item = (K, Result<Value, E>)>,
{
    match try_serialize_pairs(pairs) {
        Ok(object) => Json::Object(object),
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize attribute batch");
            Json::Object(Map::new())
        }
    }
}

fn try_serialize_pairs<K, E, I>(pairs: I) -> Result<Map<String, Json>, SerializationError>
where
    K: Into<String>,
    E: fmt::Display,
    I: IntoIterator<Item = (K, Result<Value, E>)>,
{
    let mut object = Map::new();
    for (key, value) in pairs {
        let key = key.into();
        let value = value.map_err(|err| SerializationError::ValueUnavailable {
            name: key.clone(),
            message: err.to_string(),
        })?;
        if object.contains_key(&key) {
            return Err(SerializationError::DuplicateKey(key));
        }
        object.insert(key, serialize(&value));
    }
    Ok(object)
}

/// A serialized event ready for a transport sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedPayload {
    /// Category of the source event.
    pub category: EventCategory,
    /// Decoded event id.
    pub event_id: String,
    /// Message text.
    pub message: String,
    /// Generation time at the source.
    pub generated_at: Option<DateTime<Utc>>,
    /// Local receipt time.
    pub received_at: DateTime<Utc>,
    /// JSON tree of the whole event.
    pub data: Json,
}

impl SerializedPayload {
    /// Serializes an event snapshot.
    #[must_use]
    pub fn from_event(event: &Event) -> Self {
        let header = event.header();
        Self {
            category: event.category(),
            event_id: header.event_id.clone(),
            message: header.message.text.clone(),
            generated_at: header.time,
            received_at: header.received_at(),
            data: serialize_record(event),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{NaiveDate, Utc};
    use serde_json::json;

    use super::*;
    use crate::domain::{Opaque, Record};
    use crate::protocol::{NodeRef, RawEvent};

    #[test]
    fn nested_tree_keeps_native_scalars() {
        let ts = Utc::now();
        let mut inner = BTreeMap::new();
        inner.insert("b".to_string(), Value::Float(2.5));
        let mut outer = BTreeMap::new();
        outer.insert(
            "a".to_string(),
            Value::Sequence(vec![
                Value::Int(1),
                Value::from("x"),
                Value::Null,
                Value::Mapping(inner),
            ]),
        );
        outer.insert("t".to_string(), Value::DateTime(ts));

        let tree = serialize(&Value::Mapping(outer));
        assert_eq!(tree.get("a"), Some(&json!([1, "x", null, {"b": 2.5}])));
        assert_eq!(tree.get("t"), Some(&json!(ts.to_rfc3339())));
    }

    #[test]
    fn record_is_tagged_with_type_name() {
        let record = Record::new("Point").with("x", 1i64).with("y", "z");
        let tree = serialize(&Value::Record(record));
        assert_eq!(tree, json!({RECORD_TAG: "Point", "x": 1, "y": "z"}));
    }

    #[test]
    fn field_named_like_tag_cannot_replace_type_name() {
        let record = Record::new("QualifiedName")
            .with(RECORD_TAG, "Forged")
            .with("Name", "Tool");
        let tree = serialize(&Value::Record(record));
        assert_eq!(tree, json!({"pythonclass": "QualifiedName", "Name": "Tool"}));
    }

    #[test]
    fn internal_fields_are_excluded() {
        let record = Record::new("EntityDataType")
            .with("Name", "Tool 1")
            .with_internal("_freeze", true);
        let tree = serialize(&Value::Record(record));
        assert!(tree.get("_freeze").is_none());
        assert_eq!(tree.get("Name"), Some(&json!("Tool 1")));
    }

    #[test]
    fn opaque_and_bytes_degrade_to_strings() {
        assert_eq!(serialize(&Value::from(Opaque::node_id("ns=4;i=5"))), json!("ns=4;i=5"));
        assert_eq!(serialize(&Value::Bytes(b"abc".to_vec())), json!("abc"));
    }

    #[test]
    fn non_finite_float_degrades_to_string() {
        assert_eq!(serialize(&Value::Float(f64::NAN)), json!("NaN"));
        assert_eq!(serialize(&Value::Float(f64::INFINITY)), json!("inf"));
    }

    #[test]
    fn naive_timestamp_has_no_offset() {
        let Some(naive) = NaiveDate::from_ymd_opt(2024, 1, 2).and_then(|d| d.and_hms_opt(3, 4, 5))
        else {
            panic!("valid date");
        };
        assert_eq!(
            serialize(&Value::NaiveDateTime(naive)),
            json!("2024-01-02T03:04:05")
        );
    }

    #[test]
    fn pairs_serialize_into_one_object() {
        let pairs = vec![
            ("NodeId", Ok::<_, String>(Value::from(Opaque::node_id("ns=1;s=Tool")))),
            ("Value", Ok(Value::Int(7))),
        ];
        assert_eq!(serialize_pairs(pairs), json!({"NodeId": "ns=1;s=Tool", "Value": 7}));
    }

    #[test]
    fn failing_pair_degrades_whole_batch() {
        let pairs = vec![
            ("NodeId", Ok(Value::from("ns=1;s=Tool"))),
            ("Value", Err("BadNotReadable")),
        ];
        assert_eq!(serialize_pairs(pairs), json!({}));
    }

    #[test]
    fn duplicate_key_degrades_whole_batch() {
        let pairs = vec![
            ("Value", Ok::<_, String>(Value::Int(1))),
            ("Value", Ok(Value::Int(2))),
        ];
        assert_eq!(serialize_pairs(pairs), json!({}));
    }

    #[test]
    fn payload_carries_event_metadata() {
        let received = Utc::now();
        let raw = RawEvent::new(NodeRef::new("ns=3;i=1003"))
            .with("EventId", "r-1")
            .with("Message", "Result 1 ready")
            .with("Result", Record::new("JoiningResultDataType").with("ResultId", "1"));
        let Ok(event) = Event::from_raw(EventCategory::ResultReady, &raw, received) else {
            panic!("snapshot should succeed");
        };
        let payload = SerializedPayload::from_event(&event);
        assert_eq!(payload.event_id, "r-1");
        assert_eq!(payload.message, "Result 1 ready");
        assert_eq!(payload.received_at, received);
        assert_eq!(payload.data.get(RECORD_TAG), Some(&json!("ResultReadyEvent")));
        assert_eq!(payload.data.get("EventType"), Some(&json!("ns=3;i=1003")));
        assert_eq!(payload.data.pointer("/Result/ResultId"), Some(&json!("1")));
        assert_eq!(payload.data.pointer("/Message/Text"), Some(&json!("Result 1 ready")));
    }
}
