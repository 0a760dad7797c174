//! WebSocket layer: browser sessions and command dispatch.
//!
//! The endpoint at `/ws` carries the browser's JSON commands and the
//! event frames of every connection the browser opened.

pub mod connection;
pub mod handler;
pub mod messages;
