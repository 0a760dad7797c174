//! Connections owned by one browser session, keyed by endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::RwLock;

use super::connection::{Connection, ConnectionSettings};
use crate::error::GatewayError;
use crate::protocol::SessionFactory;
use crate::sink::SinkFactory;

/// Explicit owner of every [`Connection`] a browser session opened.
///
/// At most one connection per endpoint. Replacing or removing an entry
/// always terminates the connection it held.
#[derive(Debug)]
pub struct ConnectionRegistry {
    factory: Arc<dyn SessionFactory>,
    sinks: Arc<dyn SinkFactory>,
    settings: ConnectionSettings,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry; new connections deliver events to the
    /// sink `sinks` hands out for their endpoint.
    #[must_use]
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        sinks: Arc<dyn SinkFactory>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            factory,
            sinks,
            settings,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Terminates any existing connection to `endpoint`, then creates and
    /// connects a new one.
    ///
    /// # Errors
    ///
    /// Propagates the [`Connection::connect`] failure; the failed connection
    /// is not kept.
    pub async fn connect_to(&self, endpoint: &str) -> Result<Arc<Connection>, GatewayError> {
        let connection = Arc::new(Connection::new(
            endpoint,
            self.settings.clone(),
            Arc::clone(&self.factory),
            self.sinks.sink_for(endpoint),
        ));
        let previous = self
            .connections
            .write()
            .await
            .insert(endpoint.to_string(), Arc::clone(&connection));
        if let Some(previous) = previous {
            tracing::info!(endpoint, "endpoint already connected; closing old connection");
            previous.terminate().await;
        }

        if let Err(e) = connection.connect().await {
            let mut map = self.connections.write().await;
            if map
                .get(endpoint)
                .is_some_and(|current| Arc::ptr_eq(current, &connection))
            {
                map.remove(endpoint);
            }
            drop(map);
            connection.terminate().await;
            return Err(e);
        }
        Ok(connection)
    }

    /// Looks up the connection for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ConnectionNotFound`] if there is none.
    pub async fn get(&self, endpoint: &str) -> Result<Arc<Connection>, GatewayError> {
        self.connections
            .read()
            .await
            .get(endpoint)
            .cloned()
            .ok_or_else(|| GatewayError::ConnectionNotFound(endpoint.to_string()))
    }

    /// Terminates and removes the connection for `endpoint`, if any.
    pub async fn terminate(&self, endpoint: &str) {
        let removed = self.connections.write().await.remove(endpoint);
        if let Some(connection) = removed {
            connection.terminate().await;
        }
    }

    /// Terminates and removes every connection, concurrently.
    pub async fn terminate_all(&self) {
        let drained: Vec<_> = self.connections.write().await.drain().collect();
        if drained.is_empty() {
            return;
        }
        tracing::info!(count = drained.len(), "terminating all connections");
        join_all(
            drained
                .iter()
                .map(|(_, connection)| connection.terminate()),
        )
        .await;
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Returns `true` if no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
