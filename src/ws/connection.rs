//! One browser WebSocket session.
//!
//! Reads commands from the browser, dispatches them against the
//! session's own [`ConnectionRegistry`] and writes one reply per command.
//! Event frames from the session's bridges share the same writer.

use std::fmt;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value as Json, json};
use tokio::sync::Mutex;

use super::messages::{WsCommand, WsReply, WsRequest, exception};
use crate::app_state::AppState;
use crate::error::GatewayError;
use crate::protocol::NodeRef;
use crate::service::{Connection, ConnectionRegistry, ResourceKind, ResourceStore};
use crate::sink::{DurableFileSink, SinkFactory, SinkKind, StreamSink, TransportSink};

type SocketWriter = SplitSink<WebSocket, Message>;

/// Hands every connection a stream sink on this session's socket.
struct SocketSinks {
    writer: Arc<Mutex<SocketWriter>>,
}

impl fmt::Debug for SocketSinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketSinks").finish_non_exhaustive()
    }
}

impl SinkFactory for SocketSinks {
    fn sink_for(&self, endpoint: &str) -> Arc<dyn TransportSink> {
        Arc::new(StreamSink::new(endpoint, Arc::clone(&self.writer)))
    }
}

/// Runs the read loop for one browser session until the socket closes,
/// then terminates every connection the session opened.
pub async fn run_session(socket: WebSocket, state: AppState) {
    let _session = state.track_session();
    let (ws_tx, mut ws_rx) = socket.split();
    let writer = Arc::new(Mutex::new(ws_tx));

    let sinks: Arc<dyn SinkFactory> = match state.config.event_sink {
        SinkKind::Stream => Arc::new(SocketSinks {
            writer: Arc::clone(&writer),
        }),
        SinkKind::File => Arc::new(DurableFileSink::new(state.config.result_log_dir.clone())),
    };
    let registry = ConnectionRegistry::new(
        Arc::clone(&state.factory),
        sinks,
        state.connection_settings(),
    );
    tracing::info!(sessions = state.open_sessions(), "browser session opened");

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let Some(reply) = handle_text(text.as_str(), &registry, &state.resources).await
                else {
                    continue;
                };
                let frame = match serde_json::to_string(&reply) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode reply");
                        continue;
                    }
                };
                if writer.lock().await.send(Message::text(frame)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "ws receive failed");
                break;
            }
        }
    }

    registry.terminate_all().await;
    tracing::info!("browser session closed");
}

/// Handles one text frame; `None` for commands that expect no reply.
pub async fn handle_text(
    text: &str,
    registry: &ConnectionRegistry,
    resources: &ResourceStore,
) -> Option<WsReply> {
    let request = match WsRequest::parse(text) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "malformed browser request");
            return Some(WsReply::unparsed(&e));
        }
    };
    tracing::debug!(command = %request.command, endpoint = ?request.endpoint, "browser command");

    let command = match request.command.parse::<WsCommand>() {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!(command = %request.command, "unknown browser command");
            return Some(WsReply::to(&request, exception(&e)));
        }
    };

    let data = match dispatch(command, &request, registry, resources).await {
        Ok(data) => data,
        Err(e) => {
            tracing::error!(
                command = %request.command,
                endpoint = ?request.endpoint,
                error = %e,
                "command failed"
            );
            exception(&e)
        }
    };
    command.replies().then(|| WsReply::to(&request, data))
}

async fn dispatch(
    command: WsCommand,
    request: &WsRequest,
    registry: &ConnectionRegistry,
    resources: &ResourceStore,
) -> Result<Json, GatewayError> {
    match command {
        WsCommand::ConnectTo => {
            let endpoint = request.require_endpoint()?;
            registry.connect_to(endpoint).await?;
            Ok(json!({"command": "connection established", "endpoint": endpoint}))
        }
        WsCommand::TerminateConnection => {
            registry.terminate(request.require_endpoint()?).await;
            Ok(json!({}))
        }
        WsCommand::Subscribe => {
            let connection = open_connection(registry, request.require_endpoint()?).await?;
            connection
                .subscribe(request.str_field("eventtype").unwrap_or_default())
                .await?;
            Ok(json!({}))
        }
        WsCommand::Read => {
            let endpoint = request.require_endpoint()?;
            let node = request
                .str_field("nodeid")
                .ok_or_else(|| GatewayError::InvalidRequest("'read' needs a nodeid".into()))?;
            let readout = open_connection(registry, endpoint)
                .await?
                .read(&NodeRef::new(node))
                .await?;
            Ok(json!({
                "command": "readresult",
                "endpoint": endpoint,
                "attributes": readout.attributes,
                "relations": readout.relations,
                "value": readout.value,
                "nodeid": node,
            }))
        }
        WsCommand::PathToId => {
            let (start, path) = request.path_request()?;
            let connection = open_connection(registry, request.require_endpoint()?).await?;
            let target = connection.path_to_id(&start, &path).await?;
            Ok(json!({"nodeid": target.as_str()}))
        }
        WsCommand::Namespaces => {
            let connection = open_connection(registry, request.require_endpoint()?).await?;
            Ok(json!({"namespaces": connection.namespaces().await?}))
        }
        WsCommand::GetSettings => resources.load(ResourceKind::Settings).await,
        WsCommand::GetConnectionPoints => resources.load(ResourceKind::ConnectionPoints).await,
        WsCommand::SetSettings => {
            resources.store(ResourceKind::Settings, &request.document()).await?;
            Ok(Json::Null)
        }
        WsCommand::SetConnectionPoints => {
            resources
                .store(ResourceKind::ConnectionPoints, &request.document())
                .await?;
            Ok(Json::Null)
        }
    }
}

/// Looks up the endpoint's connection and reopens its session if the
/// server dropped it.
async fn open_connection(
    registry: &ConnectionRegistry,
    endpoint: &str,
) -> Result<Arc<Connection>, GatewayError> {
    let connection = registry.get(endpoint).await?;
    connection.ensure_open().await?;
    Ok(connection)
}
