//! Browser stream adapter.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use serde::Serialize;
use tokio::sync::Mutex;

use super::{SinkError, TransportSink};
use crate::serialize::SerializedPayload;

/// Event frame pushed to the browser.
#[derive(Debug, Serialize)]
struct EventFrame<'a> {
    command: &'static str,
    endpoint: &'a str,
    data: &'a serde_json::Value,
}

/// Forwards events as text frames on a shared WebSocket writer.
///
/// The writer is shared with the command reply path, hence the mutex.
pub struct StreamSink<S> {
    endpoint: String,
    writer: Arc<Mutex<S>>,
}

impl<S> StreamSink<S> {
    /// Wraps a shared writer; frames are tagged with `endpoint`.
    pub fn new(endpoint: impl Into<String>, writer: Arc<Mutex<S>>) -> Self {
        Self {
            endpoint: endpoint.into(),
            writer,
        }
    }
}

impl<S> fmt::Debug for StreamSink<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSink")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S> TransportSink for StreamSink<S>
where
    S: Sink<Message> + Unpin + Send + Sync + 'static,
    S::Error: fmt::Display + Send,
{
    async fn send(&self, payload: &SerializedPayload) -> Result<(), SinkError> {
        let frame = EventFrame {
            command: "event",
            endpoint: &self.endpoint,
            data: &payload.data,
        };
        let text = serde_json::to_string(&frame).map_err(|e| SinkError::Encode(e.to_string()))?;
        self.writer
            .lock()
            .await
            .send(Message::text(text))
            .await
            .map_err(|e| SinkError::Closed(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.writer.lock().await.close().await {
            tracing::debug!(endpoint = %self.endpoint, error = %e, "stream sink close failed");
        }
    }
}
