//! Service layer: connection lifecycle and browser-facing resources.
//!
//! A [`ConnectionRegistry`] owns the [`Connection`]s of one browser
//! session. Each connection runs its own [`RetryPolicy`] and spawns one
//! event bridge per subscribed category.

pub mod connection;
pub mod registry;
pub mod resources;
pub mod retry;

pub use connection::{Connection, ConnectionSettings, ConnectionState, NodeReadout};
pub use registry::ConnectionRegistry;
pub use resources::{ResourceKind, ResourceStore};
pub use retry::RetryPolicy;
