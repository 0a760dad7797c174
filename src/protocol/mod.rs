//! Protocol client seam.
//!
//! The gateway never encodes protocol traffic itself. A [`SessionFactory`]
//! hands out [`ProtocolSession`]s; sessions create [`ProtocolSubscription`]s
//! and push notifications into a [`NotificationTarget`] from their own
//! receive thread. Everything here is a boundary contract: encoding,
//! security and session negotiation live behind these traits.

pub mod simulated;
pub mod types;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::Value;

pub use types::{
    AttributeId, BrowsePath, ClientIdentity, MonitorHandle, NodeRef, QualifiedName, RawEvent,
};

/// Errors reported by the protocol client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The endpoint refused or dropped the connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The server answered with a bad status code.
    #[error("bad status 0x{code:08X}: {message}")]
    BadStatus {
        /// Raw status code.
        code: u32,
        /// Human-readable status text.
        message: String,
    },

    /// A response arrived for a request the client no longer tracks.
    ///
    /// Seen when late publish responses race a disconnect; harmless.
    #[error("no outstanding request for response")]
    NoOutstandingRequest,

    /// The session is not connected.
    #[error("session not connected")]
    NotConnected,

    /// A namespace URI is not present in the server's namespace array.
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    /// A browse path did not resolve to a node.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Any other client failure.
    #[error("{0}")]
    Other(String),
}

impl ProtocolError {
    /// Returns `true` for disconnect errors that only signal late,
    /// harmless server responses.
    #[must_use]
    pub const fn is_benign_disconnect(&self) -> bool {
        matches!(self, Self::NoOutstandingRequest)
    }
}

/// Synchronous entry point the protocol client calls once per pushed event.
///
/// Called on a thread the async runtime does not control. Implementations
/// must not block, must not perform I/O and must not panic.
pub trait NotificationTarget: Send + Sync + fmt::Debug {
    /// Accepts one notification.
    fn notify(&self, event: RawEvent);
}

/// Read access to the server clock (`ServerStatus.CurrentTime`).
#[async_trait]
pub trait SessionClock: Send + Sync + fmt::Debug {
    /// Reads the current server time.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the read fails or the session is gone.
    async fn current_time(&self) -> Result<DateTime<Utc>, ProtocolError>;
}

/// Builds fresh, unconnected sessions.
pub trait SessionFactory: Send + Sync + fmt::Debug {
    /// Constructs a session for `endpoint` announcing `identity`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the session object cannot be built
    /// (e.g. malformed endpoint URL).
    fn create(
        &self,
        endpoint: &str,
        identity: &ClientIdentity,
    ) -> Result<Box<dyn ProtocolSession>, ProtocolError>;
}

/// One protocol session to one endpoint.
#[async_trait]
pub trait ProtocolSession: Send + Sync + fmt::Debug {
    /// Performs the handshake and opens the session.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the endpoint cannot be reached or the
    /// handshake fails.
    async fn connect(&mut self) -> Result<(), ProtocolError>;

    /// Closes the session and the underlying channel.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the close exchange fails.
    async fn disconnect(&mut self) -> Result<(), ProtocolError>;

    /// Forcefully closes the session without waiting for the channel.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if even the forced close fails.
    async fn close_session(&mut self) -> Result<(), ProtocolError>;

    /// Resolves a namespace URI to its index on this server.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NamespaceNotFound`] for unknown URIs.
    async fn namespace_index(&self, uri: &str) -> Result<u16, ProtocolError>;

    /// Returns the server's namespace array.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the read fails.
    async fn namespace_array(&self) -> Result<Vec<String>, ProtocolError>;

    /// Whether the secure channel is still open. A session that was
    /// connected once can report `false` after the server drops it.
    fn is_open(&self) -> bool;

    /// Resolves a browse path from the root node.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NodeNotFound`] if the path does not resolve.
    async fn resolve_node(&self, path: &BrowsePath) -> Result<NodeRef, ProtocolError>;

    /// Translates a path relative to `start` into the id of its first target.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NodeNotFound`] if the path has no target.
    async fn translate_path(
        &self,
        start: &NodeRef,
        path: &BrowsePath,
    ) -> Result<NodeRef, ProtocolError>;

    /// References of `node`, one `ReferenceDescription` record each.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the browse fails.
    async fn references(&self, node: &NodeRef) -> Result<Vec<Value>, ProtocolError>;

    /// Reads a batch of attributes; each attribute may fail on its own.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the whole request fails.
    async fn read_attributes(
        &self,
        node: &NodeRef,
        attributes: &[AttributeId],
    ) -> Result<Vec<Result<Value, ProtocolError>>, ProtocolError>;

    /// Creates a subscription whose notifications go to `target`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the server rejects the subscription.
    async fn create_subscription(
        &self,
        publishing_interval: Duration,
        target: Arc<dyn NotificationTarget>,
    ) -> Result<Box<dyn ProtocolSubscription>, ProtocolError>;

    /// Clock handle for latency diagnostics, if the server exposes one.
    fn clock(&self) -> Option<Arc<dyn SessionClock>>;
}

/// Server-side subscription created by a [`ProtocolSession`].
#[async_trait]
pub trait ProtocolSubscription: Send + Sync + fmt::Debug {
    /// Binds an event filter set on `source` to this subscription.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the monitored item cannot be created.
    async fn subscribe_events(
        &mut self,
        source: &NodeRef,
        event_types: &[NodeRef],
        queue_size: u32,
    ) -> Result<MonitorHandle, ProtocolError>;

    /// Removes a previously bound filter set.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the server rejects the request.
    async fn unsubscribe(&mut self, handle: MonitorHandle) -> Result<(), ProtocolError>;

    /// Deletes the subscription on the server.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the server rejects the request.
    async fn delete(&mut self) -> Result<(), ProtocolError>;
}
