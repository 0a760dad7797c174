//! # ijt-gateway
//!
//! WebSocket gateway between Industrial Joining Technique controllers and
//! browsers.
//!
//! A browser opens `/ws` and asks the gateway to connect to controller
//! endpoints and subscribe to their result-ready and joining-system
//! events. Each subscribed category gets its own event bridge, which moves
//! notifications off the protocol client's thread, serializes them and
//! hands them to a transport sink (the browser socket or a durable result
//! log directory).
//!
//! ## Architecture
//!
//! ```text
//! Browser (WebSocket)           HTTP clients
//!     │                              │
//!     ├── WS session (ws/)           ├── REST handlers (api/)
//!     │
//!     ├── ConnectionRegistry ── Connection (service/)
//!     │                              │
//!     │                     protocol session (protocol/)
//!     │                              │ notify (foreign thread)
//!     │                        EventBridge (bridge)
//!     │                              │
//!     │                    serialize + diagnostics
//!     │                              │
//!     └────────────── TransportSink (sink/)
//! ```

pub mod api;
pub mod app_state;
pub mod bridge;
pub mod config;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod serialize;
pub mod service;
pub mod sink;
pub mod ws;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use app_state::AppState;

/// Builds the full HTTP + WebSocket router over `state`.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws::handler::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
