//! Protocol value model.
//!
//! Every attribute a controller pushes arrives as a [`Value`]: a tagged tree
//! of primitives, sequences, keyed mappings, timestamps, structured records
//! and opaque identifiers. Structured records expose their fields through
//! the [`NamedFields`] capability so the serializer can walk them without
//! knowing their concrete type.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};

/// A single protocol value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Signed integer scalar.
    Int(i64),
    /// Unsigned integer scalar.
    UInt(u64),
    /// Floating point scalar.
    Float(f64),
    /// UTF-8 string scalar.
    String(String),
    /// Raw byte string.
    Bytes(Vec<u8>),
    /// Time-zone aware timestamp.
    DateTime(DateTime<Utc>),
    /// Timestamp without zone information; interpreted as UTC.
    NaiveDateTime(NaiveDateTime),
    /// Ordered sequence.
    Sequence(Vec<Value>),
    /// Keyed mapping with string keys.
    Mapping(BTreeMap<String, Value>),
    /// Structured record with named fields.
    Record(Record),
    /// Domain identifier or enumeration rendered through its display form.
    Opaque(Opaque),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the string slice of a [`Value::String`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as `i64` when it is an integer that fits.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Returns the value as `u64` when it is a non-negative integer.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            Self::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Returns the elements of a [`Value::Sequence`].
    #[must_use]
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the timestamp as UTC. Naive timestamps are assumed to be UTC.
    #[must_use]
    pub fn as_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            Self::NaiveDateTime(naive) => Some(naive.and_utc()),
            _ => None,
        }
    }

    /// Looks up a public record field or a mapping entry by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Record(record) => record.get(name),
            Self::Mapping(map) => map.get(name),
            _ => None,
        }
    }

    /// Follows a chain of field names, e.g. `["ResultMetaData", "CreationTime"]`.
    #[must_use]
    pub fn path(&self, names: &[&str]) -> Option<&Value> {
        names
            .iter()
            .try_fold(self, |current, name| current.field(name))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Self::DateTime(dt) => f.write_str(&dt.to_rfc3339()),
            Self::NaiveDateTime(naive) => write!(f, "{}", naive.format(NAIVE_ISO_FORMAT)),
            Self::Sequence(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Mapping(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Record(record) => write!(f, "{record}"),
            Self::Opaque(opaque) => write!(f, "{opaque}"),
        }
    }
}

/// ISO-8601 layout used for timestamps that carry no zone.
pub(crate) const NAIVE_ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Sequence(items)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<Opaque> for Value {
    fn from(opaque: Opaque) -> Self {
        Self::Opaque(opaque)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

/// Receives the public fields of a [`NamedFields`] implementor, one at a time.
pub trait FieldVisitor {
    /// Called once per public field, in declaration order.
    fn visit(&mut self, name: &str, value: &Value);
}

/// Capability of exposing a named-field structure.
///
/// Implementors only report their public fields; internal bookkeeping
/// stays invisible to the serializer.
pub trait NamedFields {
    /// Type name used to tag the serialized record.
    fn type_name(&self) -> &str;

    /// Feeds every public field to `visitor`.
    fn visit_fields(&self, visitor: &mut dyn FieldVisitor);
}

/// Whether a record field is part of the public structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Reported to the serializer.
    Public,
    /// Bookkeeping owned by the decoder; never serialized.
    Internal,
}

/// A named field inside a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field name as delivered by the protocol.
    pub name: String,
    /// Field value.
    pub value: Value,
    /// Public or internal.
    pub visibility: Visibility,
}

/// Generic structured record decoded from the protocol, e.g. a result
/// data type or an entity description.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    type_name: String,
    fields: Vec<Field>,
}

impl Record {
    /// Creates an empty record of the given type.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Appends a public field (builder style).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value, Visibility::Public);
        self
    }

    /// Appends an internal field (builder style).
    #[must_use]
    pub fn with_internal(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value, Visibility::Internal);
        self
    }

    /// Appends a field with explicit visibility.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>, visibility: Visibility) {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
            visibility,
        });
    }

    /// Returns the value of the first public field with the given name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.public_fields()
            .find(|field| field.name == name)
            .map(|field| &field.value)
    }

    /// Iterates over the public fields.
    pub fn public_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(|field| field.visibility == Visibility::Public)
    }

    /// Returns every field, including internal ones.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

impl NamedFields for Record {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn visit_fields(&self, visitor: &mut dyn FieldVisitor) {
        for field in self.public_fields() {
            visitor.visit(&field.name, &field.value);
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.type_name)?;
        for (i, field) in self.public_fields().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", field.name, field.value)?;
        }
        f.write_str(")")
    }
}

/// A value the gateway does not interpret: node identifiers, status codes,
/// enumerations. Only its display form is ever emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opaque {
    kind: String,
    text: String,
}

impl Opaque {
    /// Creates an opaque value of the given kind with its display text.
    #[must_use]
    pub fn new(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: text.into(),
        }
    }

    /// Shorthand for a node identifier such as `ns=4;i=1002`.
    #[must_use]
    pub fn node_id(text: impl Into<String>) -> Self {
        Self::new("NodeId", text)
    }

    /// Shorthand for an enumeration member, rendered as `Type.Member`.
    #[must_use]
    pub fn enumeration(type_name: &str, member: &str) -> Self {
        Self::new(type_name, format!("{type_name}.{member}"))
    }

    /// Kind discriminator (e.g. `"NodeId"`).
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Display text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
