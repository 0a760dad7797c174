//! Transport sinks: where serialized events go.
//!
//! A sink is the bridge's only downstream. Two adapters exist:
//! [`StreamSink`] forwards events to a browser WebSocket and
//! [`DurableFileSink`] writes one JSON file per event with an atomic
//! temp-then-rename write.

pub mod file;
pub mod stream;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::serialize::SerializedPayload;

pub use file::DurableFileSink;
pub use stream::StreamSink;

/// Errors raised by a transport sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The payload could not be encoded for this transport. Affects only
    /// the one event.
    #[error("failed to encode payload: {0}")]
    Encode(String),

    /// The transport is gone.
    #[error("transport closed: {0}")]
    Closed(String),

    /// The transport failed with an I/O error.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    /// Returns `true` for failures of the transport itself, after which no
    /// further sends can succeed.
    #[must_use]
    pub const fn is_transport_failure(&self) -> bool {
        !matches!(self, Self::Encode(_))
    }
}

/// Async destination for serialized events.
#[async_trait]
pub trait TransportSink: Send + Sync + fmt::Debug {
    /// Delivers one payload.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Encode`] if this payload cannot be encoded, or a
    /// transport error if the destination is unusable.
    async fn send(&self, payload: &SerializedPayload) -> Result<(), SinkError>;

    /// Releases the transport. Never fails; problems are logged.
    async fn close(&self);
}

/// Hands out the sink a new connection to `endpoint` delivers to.
pub trait SinkFactory: Send + Sync + fmt::Debug {
    /// Sink for events from `endpoint`.
    fn sink_for(&self, endpoint: &str) -> Arc<dyn TransportSink>;
}

impl SinkFactory for DurableFileSink {
    fn sink_for(&self, _endpoint: &str) -> Arc<dyn TransportSink> {
        Arc::new(self.clone())
    }
}

/// Which sink adapter new connections use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SinkKind {
    /// Forward to the requesting browser socket.
    #[default]
    Stream,
    /// Write to the durable result log directory.
    File,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" | "ws" | "websocket" => Ok(Self::Stream),
            "file" => Ok(Self::File),
            other => Err(format!("unknown event sink: {other}")),
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => f.write_str("stream"),
            Self::File => f.write_str("file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_errors_are_not_transport_failures() {
        assert!(!SinkError::Encode("bad".into()).is_transport_failure());
        assert!(SinkError::Closed("gone".into()).is_transport_failure());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(SinkError::from(io).is_transport_failure());
    }

    #[test]
    fn sink_kind_parses() {
        assert_eq!("file".parse::<SinkKind>(), Ok(SinkKind::File));
        assert_eq!("Stream".parse::<SinkKind>(), Ok(SinkKind::Stream));
        assert!("kafka".parse::<SinkKind>().is_err());
    }
}
