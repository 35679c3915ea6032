//! HTTP and websocket endpoints.
//!
//! `/ui` and `/sensor` upgrade to websockets speaking the `{method, data}`
//! JSON protocol. Each socket gets an outbound channel drained by its own
//! writer task, so bus handlers never wait on a socket.

use crate::clients::{ClientError, SensorClient, UiClient};
use crate::engine::AggregatorHandle;
use crate::source::SourceRegistry;
use aliceproto::{SensorMessage, ServerMessage, UiMessage};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long a closing socket's writer may take to flush.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Shared state for web handlers
#[derive(Clone)]
pub struct WebState {
    pub engine: AggregatorHandle,
    pub registry: Arc<SourceRegistry>,
    pub field_aliases: Arc<BTreeMap<String, String>>,
    pub started: Instant,
}

impl WebState {
    pub fn new(
        engine: AggregatorHandle,
        registry: Arc<SourceRegistry>,
        field_aliases: BTreeMap<String, String>,
    ) -> Self {
        Self {
            engine,
            registry,
            field_aliases: Arc::new(field_aliases),
            started: Instant::now(),
        }
    }
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/ui", get(ui_ws))
        .route("/sensor", get(sensor_ws))
        .route("/health", get(health))
        .route("/", get(serve_root))
        .with_state(state)
}

/// Serve root discovery endpoint
async fn serve_root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "ALICE",
        "version": env!("CARGO_PKG_VERSION"),
        "links": {
            "ui": "/ui",
            "sensor": "/sensor",
            "health": "/health",
        }
    }))
}

async fn health(State(state): State<WebState>) -> impl IntoResponse {
    let uptime_secs = state.started.elapsed().as_secs();
    match state.engine.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_secs": uptime_secs,
                "engine": stats,
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unavailable",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_secs": uptime_secs,
                "error": e.to_string(),
            })),
        ),
    }
}

async fn ui_ws(State(state): State<WebState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = UiClient::new(state.engine.clone(), state.field_aliases.clone(), tx);
        serve_socket(socket, client, rx).await;
    })
}

async fn sensor_ws(State(state): State<WebState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = SensorClient::new(state.engine.clone(), state.registry.clone(), tx);
        serve_socket(socket, client, rx).await;
    })
}

/// What `serve_socket` needs from a connection handler.
#[async_trait]
trait SocketClient: Send {
    type Inbound: DeserializeOwned + Send;

    const KIND: &'static str;

    async fn handle(&mut self, message: Self::Inbound) -> Result<(), ClientError>;

    async fn shutdown(&mut self);
}

#[async_trait]
impl SocketClient for UiClient {
    type Inbound = UiMessage;

    const KIND: &'static str = "ui";

    async fn handle(&mut self, message: UiMessage) -> Result<(), ClientError> {
        UiClient::handle(self, message).await
    }

    async fn shutdown(&mut self) {
        UiClient::shutdown(self).await
    }
}

#[async_trait]
impl SocketClient for SensorClient {
    type Inbound = SensorMessage;

    const KIND: &'static str = "sensor";

    async fn handle(&mut self, message: SensorMessage) -> Result<(), ClientError> {
        SensorClient::handle(self, message).await
    }

    async fn shutdown(&mut self) {
        SensorClient::shutdown(self).await
    }
}

async fn serve_socket<C: SocketClient>(
    socket: WebSocket,
    mut client: C,
    mut outbound: mpsc::UnboundedReceiver<ServerMessage>,
) {
    let conn = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    info!(%conn, kind = C::KIND, "client connected");

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match aliceproto::encode(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(%conn, error = %e, "failed to encode message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
            if message.is_fatal() {
                let _ = sink.close().await;
                break;
            }
        }
    });
    let abort = writer.abort_handle();

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(%conn, error = %e, "socket read failed");
                break;
            }
        };
        let message = match aliceproto::decode::<C::Inbound>(text.as_str()) {
            Ok(message) => message,
            Err(e) => {
                warn!(%conn, error = %e, "ignoring malformed message");
                continue;
            }
        };
        if let Err(e) = client.handle(message).await {
            info!(%conn, error = %e, "closing connection");
            break;
        }
    }

    client.shutdown().await;
    drop(client);
    if tokio::time::timeout(WRITER_GRACE, writer).await.is_err() {
        abort.abort();
    }
    info!(%conn, kind = C::KIND, "client disconnected");
}
