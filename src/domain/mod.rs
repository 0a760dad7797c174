//! Domain layer: protocol values, event snapshots, latency and diagnostics.
//!
//! Everything here is pure: no I/O besides `tracing` output, no async.
//! Snapshots are built on the protocol client's notification thread and
//! consumed by the event bridges.

pub mod diagnostics;
pub mod event;
pub mod event_category;
pub mod latency;
pub mod value;

pub use event::{Event, JoiningSystemEvent, LocalizedText, NotificationError, ResultReadyEvent};
pub use event_category::{CompanionNamespaces, EventCategory};
pub use latency::{LatencyReport, TimestampPrecision};
pub use value::{FieldVisitor, NamedFields, Opaque, Record, Value};
