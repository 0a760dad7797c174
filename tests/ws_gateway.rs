//! End-to-end test of the gateway router over real sockets.
//!
//! Serves the full app on an ephemeral port, drives the browser protocol
//! with `tokio-tungstenite` and the HTTP routes with `reqwest`.

#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use ijt_gateway::app_state::AppState;
use ijt_gateway::build_app;
use ijt_gateway::config::GatewayConfig;
use ijt_gateway::protocol::simulated::{
    SimulatedController, SimulationPlan, synthetic_joining_event, synthetic_result_event,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ENDPOINT: &str = "opc.tcp://sim:4840";

async fn serve(
    controller: &Arc<SimulatedController>,
    resources: &std::path::Path,
) -> SocketAddr {
    let config = GatewayConfig {
        terminate_grace_ms: 0,
        resources_dir: resources.to_path_buf(),
        ..GatewayConfig::default()
    };
    let app = build_app(AppState::new(config, Arc::clone(controller) as _));
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind should succeed");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("local addr");
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn open(addr: SocketAddr) -> Socket {
    let Ok((socket, _)) = connect_async(format!("ws://{addr}/ws")).await else {
        panic!("ws handshake should succeed");
    };
    socket
}

async fn request(socket: &mut Socket, body: Value) {
    let Ok(()) = socket.send(Message::text(body.to_string())).await else {
        panic!("send should succeed");
    };
}

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let Ok(Some(Ok(msg))) = tokio::time::timeout(Duration::from_secs(5), socket.next()).await
        else {
            panic!("frame expected");
        };
        if let Message::Text(text) = msg {
            let Ok(value) = serde_json::from_str(text.as_str()) else {
                panic!("frame should be JSON");
            };
            return value;
        }
    }
}

async fn health(addr: SocketAddr) -> Value {
    let Ok(response) = reqwest::get(format!("http://{addr}/health")).await else {
        panic!("health request should succeed");
    };
    let Ok(body) = response.json::<Value>().await else {
        panic!("health body should be JSON");
    };
    body
}

#[tokio::test]
async fn browser_session_receives_events_and_cleans_up() {
    let Ok(dir) = tempfile::tempdir() else {
        panic!("tempdir");
    };
    let controller = Arc::new(SimulatedController::new(SimulationPlan::default()));
    let addr = serve(&controller, dir.path()).await;
    assert_eq!(health(addr).await.get("ws_sessions"), Some(&json!(0)));

    let mut socket = open(addr).await;
    request(
        &mut socket,
        json!({"command": "connect to", "endpoint": ENDPOINT, "uniqueid": "c1"}),
    )
    .await;
    let reply = next_json(&mut socket).await;
    assert_eq!(reply.get("uniqueid"), Some(&json!("c1")));
    assert_eq!(reply.pointer("/data/command"), Some(&json!("connection established")));

    request(
        &mut socket,
        json!({"command": "subscribe", "endpoint": ENDPOINT, "eventtype": ""}),
    )
    .await;
    assert_eq!(next_json(&mut socket).await.get("data"), Some(&json!({})));
    assert_eq!(health(addr).await.get("ws_sessions"), Some(&json!(1)));

    // Notifications arrive on a thread the runtime does not own.
    let emitter = controller.emit_from_thread(vec![synthetic_result_event(1)]);
    let Ok(delivered) = emitter.join() else {
        panic!("emitter thread panicked");
    };
    assert_eq!(delivered, 1);
    let frame = next_json(&mut socket).await;
    assert_eq!(frame.get("command"), Some(&json!("event")));
    assert_eq!(frame.get("endpoint"), Some(&json!(ENDPOINT)));
    assert_eq!(frame.get("category"), None);
    assert_eq!(frame.pointer("/data/pythonclass"), Some(&json!("ResultReadyEvent")));

    assert_eq!(controller.emit(&synthetic_joining_event(2)), 1);
    let frame = next_json(&mut socket).await;
    assert_eq!(frame.pointer("/data/pythonclass"), Some(&json!("JoiningSystemEvent")));
    assert_eq!(
        frame.pointer("/data/EventCode"),
        Some(&json!(2001))
    );

    let Ok(()) = socket.close(None).await else {
        panic!("close should succeed");
    };
    let cleaned = tokio::time::timeout(Duration::from_secs(5), async {
        while controller.journal().disconnects() < 1 || controller.active_monitors() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(cleaned.is_ok(), "closing the socket should terminate connections");
    assert_eq!(controller.journal().disconnects(), 1);
}

#[tokio::test]
async fn unknown_commands_and_settings() {
    let Ok(dir) = tempfile::tempdir() else {
        panic!("tempdir");
    };
    let controller = Arc::new(SimulatedController::new(SimulationPlan::default()));
    let addr = serve(&controller, dir.path()).await;
    let mut socket = open(addr).await;

    request(&mut socket, json!({"command": "methodcall", "endpoint": ENDPOINT})).await;
    let reply = next_json(&mut socket).await;
    assert_eq!(
        reply.pointer("/data/exception"),
        Some(&json!("Method 'methodcall' not found"))
    );

    // `set settings` has no reply; the next frame answers `get settings`.
    request(&mut socket, json!({"command": "set settings", "units": "Nm"})).await;
    request(&mut socket, json!({"command": "get settings", "uniqueid": 9})).await;
    let reply = next_json(&mut socket).await;
    assert_eq!(reply.get("uniqueid"), Some(&json!(9)));
    assert_eq!(reply.pointer("/data/units"), Some(&json!("Nm")));

    let Ok(response) = reqwest::get(format!("http://{addr}/api/v1/event-categories")).await else {
        panic!("catalog request should succeed");
    };
    let Ok(catalog) = response.json::<Value>().await else {
        panic!("catalog should be JSON");
    };
    assert_eq!(catalog.as_array().map(Vec::len), Some(2));
}
