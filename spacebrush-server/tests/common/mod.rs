use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use axum::http::StatusCode;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use spacebrush_server::{Scene, server};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// A test WebSocket client that sends and receives JSON messages.
pub struct JsonSocket(WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>);

impl JsonSocket {
    pub async fn send(&mut self, msg: &Value) {
        self.0.send(msg.to_string().into()).await.unwrap();
    }

    pub async fn recv(&mut self) -> Result<Value> {
        let msg = self
            .0
            .next()
            .await
            .ok_or_else(|| anyhow!("WebSocket closed"))??;
        let msg = msg.to_text().map_err(|_| anyhow!("non-string message"))?;
        Ok(serde_json::from_str(msg)?)
    }

    /// Receives frames until one carries `field`, skipping heartbeats and
    /// frames with only other content.
    pub async fn recv_with(&mut self, field: &str) -> Result<Value> {
        for _ in 0..10 {
            let msg = self.recv().await?;
            if msg.get(field).is_some() {
                return Ok(msg);
            }
        }
        Err(anyhow!("no frame carrying {field} arrived"))
    }

    /// Receives `frames` frames and asserts that none of them carries
    /// `field`.
    pub async fn expect_absent(&mut self, field: &str, frames: usize) -> Result<()> {
        for _ in 0..frames {
            let msg = self.recv().await?;
            if msg.get(field).is_some() {
                return Err(anyhow!("unexpected frame carrying {field}: {msg}"));
            }
        }
        Ok(())
    }

    /// Waits for the stream to end. A close frame, a reset, and a plain
    /// end-of-stream all count as closed.
    pub async fn recv_closed(&mut self) -> Result<()> {
        while let Some(msg) = self.0.next().await {
            match msg {
                Ok(Message::Close(_)) => return Ok(()),
                Ok(_) => {}
                Err(_) => return Ok(()),
            }
        }
        Ok(())
    }
}

pub struct TestClient {
    client: reqwest::Client,
    addr: SocketAddr,
}

impl TestClient {
    pub async fn start(router: axum::Router) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, router.layer(TraceLayer::new_for_http())).into_future());
        let client = reqwest::Client::new();
        Ok(Self { client, addr })
    }

    /// Opens a listen stream for `user_name`.
    pub async fn listen(&self, user_name: &str) -> Result<JsonSocket> {
        let (socket, _response) =
            tokio_tungstenite::connect_async(format!("ws://{}/api/listen", self.addr))
                .await
                .unwrap();
        let mut socket = JsonSocket(socket);
        socket
            .send(&json!({ "user_name": user_name, "app_version": "test" }))
            .await;
        Ok(socket)
    }

    /// Opens an update stream.
    pub async fn updates(&self) -> Result<JsonSocket> {
        let (socket, _response) =
            tokio_tungstenite::connect_async(format!("ws://{}/api/updates", self.addr))
                .await
                .unwrap();
        Ok(JsonSocket(socket))
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("http://{}/{}", self.addr, path);
        info!("POST {url}");
        let resp = self.client.post(&url).json(body).send().await?;
        assert_eq!(resp.status(), StatusCode::OK);
        Ok(resp.json().await?)
    }

    /// Sends one update over the deprecated unary endpoint.
    pub async fn update(&self, body: &Value) -> Result<Value> {
        self.post("api/update", body).await
    }

    pub async fn rpc(&self, body: &Value) -> Result<Value> {
        self.post("api/rpc", body).await
    }

    pub async fn stats(&self) -> Result<Value> {
        let url = format!("http://{}/api/stats", self.addr);
        let resp = self.client.get(&url).send().await?;
        assert_eq!(resp.status(), StatusCode::OK);
        Ok(resp.json().await?)
    }
}

/// Builds a fresh scene plus its router for one test.
pub fn test_server() -> (Arc<Scene>, axum::Router) {
    let scene = Arc::new(Scene::new());
    (Arc::clone(&scene), server(scene))
}

pub fn user_state(name: &str) -> Value {
    json!({
        "user_name": name,
        "user_display_name": name,
        "device_type": "headset",
    })
}

/// An update that reports `name` as localized into `anchors`, in order.
pub fn space_update(name: &str, anchors: &[&str]) -> Value {
    let anchors: Vec<Value> = anchors.iter().map(|id| json!({ "id": id })).collect();
    json!({
        "user_state": user_state(name),
        "space_info": { "space_id": "sp1", "space_name": "lab", "anchors": anchors },
    })
}

pub fn pose(x: f64) -> Value {
    json!({ "position": [x, 0.0, 0.0], "rotation": [0.0, 0.0, 0.0, 1.0] })
}

pub fn logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spacebrush_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .try_init()
        .ok();
}
