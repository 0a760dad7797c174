//! Shared application state injected into all Axum handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::GatewayConfig;
use crate::protocol::SessionFactory;
use crate::service::{ConnectionSettings, ResourceStore};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GatewayConfig>,
    /// Builds protocol sessions for browser-requested endpoints.
    pub factory: Arc<dyn SessionFactory>,
    /// Settings and connection-point documents.
    pub resources: ResourceStore,
    sessions: Arc<AtomicUsize>,
}

impl AppState {
    /// Creates the state for `config`, connecting through `factory`.
    #[must_use]
    pub fn new(config: GatewayConfig, factory: Arc<dyn SessionFactory>) -> Self {
        let resources = ResourceStore::new(config.resources_dir.clone());
        Self {
            config: Arc::new(config),
            factory,
            resources,
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Settings every new connection starts with.
    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        self.config.connection_settings()
    }

    /// Number of open browser WebSocket sessions.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Counts a browser session as open until the guard is dropped.
    #[must_use]
    pub fn track_session(&self) -> SessionGuard {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        SessionGuard(Arc::clone(&self.sessions))
    }
}

/// Open-session token returned by [`AppState::track_session`].
#[derive(Debug)]
pub struct SessionGuard(Arc<AtomicUsize>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
