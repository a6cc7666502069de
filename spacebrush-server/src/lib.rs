//! Server backend for the SpaceBrush collaborative spatial drawing app.
//!
//! Clients report their presence, the spatial anchors they are localized
//! into, and the brush strokes and 3D models they attach to those anchors.
//! The server keeps an authoritative in-memory scene and pushes the
//! minimum relevant delta to every other connected client sharing an
//! anchor with each change.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::time;
use tracing::{error, warn};

use crate::messages::{RegisterRequest, RpcRequest, RpcResponse, UpdateRequest, UpdateResponse};

mod connection;
pub mod messages;
mod scene;

pub use scene::{PERIODIC_CHECKS_INTERVAL, PING_INTERVAL, Scene, USER_TIMEOUT};

/// Statistics about the server, returned from an API endpoint.
#[derive(Serialize)]
struct Stats {
    /// System time when the server started, in seconds since Unix epoch.
    start_time: u64,
    /// Number of users currently present in the scene.
    num_users: usize,
    /// Number of anchors claimed so far.
    num_anchors: usize,
    /// Number of active listen streams.
    num_connections: usize,
}

/// Builds a router serving the full service and spawns the scene's
/// periodic expiry loop.
pub fn server(scene: Arc<Scene>) -> Router {
    {
        let scene = Arc::clone(&scene);
        tokio::spawn(async move { scene.run_periodic_checks().await });
    }

    let start_time = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("SystemTime returned before UNIX_EPOCH")
        .as_secs();
    let stats_scene = Arc::clone(&scene);

    Router::new()
        .route("/api/listen", get(listen_handler))
        .route("/api/updates", get(update_stream_handler))
        .route("/api/update", post(update_handler))
        .route("/api/rpc", post(rpc_handler))
        .route(
            "/api/stats",
            get(move || {
                let scene = Arc::clone(&stats_scene);
                async move {
                    let (num_users, num_anchors, num_connections) = scene.counts().await;
                    Json(Stats {
                        start_time,
                        num_users,
                        num_anchors,
                        num_connections,
                    })
                }
            }),
        )
        .with_state(scene)
}

/// Handler for the `/api/listen` endpoint.
async fn listen_handler(ws: WebSocketUpgrade, State(scene): State<Arc<Scene>>) -> Response {
    ws.on_upgrade(move |socket| listen_connection(socket, scene))
}

/// Runs one listen stream: registers the user (displacing any previous
/// listener for the same name), then repeatedly drains the connection's
/// dirty-sets into outbound frames until shutdown or send failure.
///
/// The roughly one-second tick makes an idle stream emit heartbeat frames,
/// letting the transport detect dead peers.
async fn listen_connection(mut socket: WebSocket, scene: Arc<Scene>) {
    let register: RegisterRequest = match recv_json(&mut socket).await {
        Ok(Some(register)) => register,
        Ok(None) => return,
        Err(err) => {
            warn!("listen stream rejected: {err:#}");
            return;
        }
    };
    let user_name = register.user_name;

    let (conn_id, signals) = scene.register(&user_name, &register.app_version).await;
    let mut sent_server_info = false;

    loop {
        tokio::select! {
            _ = signals.shutdown_request.notified() => break,
            _ = signals.wake.notified() => {}
            _ = time::sleep(PING_INTERVAL) => {}
        }

        let Some(update) = scene
            .compose_update(&user_name, conn_id, &mut sent_server_info)
            .await
        else {
            break;
        };
        if socket.send(update.into()).await.is_err() {
            warn!("user {user_name}: failed to send server state");
            break;
        }
    }

    scene.unregister(&user_name, conn_id).await;
    signals.shutdown_done.notify_one();
}

/// Handler for the `/api/updates` endpoint.
async fn update_stream_handler(ws: WebSocketUpgrade, State(scene): State<Arc<Scene>>) -> Response {
    ws.on_upgrade(move |socket| update_stream(socket, scene))
}

/// Applies a stream of client updates; the server side stays silent.
///
/// A request that generates a response on this path (an embedded users
/// query) is a programmer error and closes the stream with an error frame.
async fn update_stream(mut socket: WebSocket, scene: Arc<Scene>) {
    loop {
        let request: UpdateRequest = match recv_json(&mut socket).await {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(err) => {
                warn!("update stream ending: {err:#}");
                return;
            }
        };
        if let Some(response) = scene.apply_update(request).await {
            error!("unexpected response generated on the update stream: {response:?}");
            let close = CloseFrame {
                code: 1011,
                reason: "unexpected update response".into(),
            };
            let _ = socket.send(Message::Close(Some(close))).await;
            return;
        }
    }
}

/// Handler for the `/api/update` endpoint.
///
/// Single-shot variant of the update stream, kept for older clients; the
/// reply is empty except for an embedded query response.
async fn update_handler(
    State(scene): State<Arc<Scene>>,
    Json(request): Json<UpdateRequest>,
) -> Json<UpdateResponse> {
    Json(scene.apply_update(request).await.unwrap_or_default())
}

/// Handler for the `/api/rpc` endpoint.
async fn rpc_handler(
    State(scene): State<Arc<Scene>>,
    Json(request): Json<RpcRequest>,
) -> Json<RpcResponse> {
    Json(scene.handle_rpc(request).await)
}

/// Receives the next text frame and decodes it as `T`.
///
/// Returns `Ok(None)` once the socket has closed.
async fn recv_json<T: serde::de::DeserializeOwned>(
    socket: &mut WebSocket,
) -> anyhow::Result<Option<T>> {
    while let Some(message) = socket.recv().await {
        match message? {
            Message::Text(text) => return Ok(Some(serde_json::from_str(&text)?)),
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}
