//! Client-facing HTTP/WebSocket interface (C11).
//!
//! Two channels to the client: `/action` (and `/ws`'s inbound half) for
//! request/response, and `/ws`'s outbound half for unsolicited pushes
//! forwarding the gateway registry's broadcast events.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use cp02_aggregator::RegistryEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::dispatcher;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub action: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: u64,
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

async fn run_action(state: &AppState, action: &str, params: Value) -> ActionResponse {
    match dispatcher::dispatch(state, action, params).await {
        Ok(data) => ActionResponse {
            kind: "response",
            action: action.to_string(),
            success: true,
            data: Some(data),
            message: None,
            timestamp: now_unix(),
        },
        Err(err) => ActionResponse {
            kind: "response",
            action: action.to_string(),
            success: false,
            data: None,
            message: Some(err.client_message()),
            timestamp: now_unix(),
        },
    }
}

/// Constant-time comparison against the configured shared secret. An empty
/// `api_key` disables authentication entirely.
fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    if state.config.api_key.is_empty() {
        return true;
    }
    let provided = headers
        .get(state.config.api_key_header.as_str())
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let expected = state.config.api_key.as_bytes();
    provided.as_bytes().ct_eq(expected).into()
}

async fn http_action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ActionRequest>,
) -> impl IntoResponse {
    if !authorized(&state, &headers) {
        let body = ActionResponse {
            kind: "response",
            action: request.action,
            success: false,
            data: None,
            message: Some("unauthorized".to_string()),
            timestamp: now_unix(),
        };
        return (StatusCode::UNAUTHORIZED, Json(body));
    }
    let response = run_action(&state, &request.action, request.params).await;
    (StatusCode::OK, Json(response))
}

async fn list_actions_handler() -> impl IntoResponse {
    Json(dispatcher::list_actions())
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Shapes a `RegistryEvent` into the client-facing push envelope
/// `{type, gateway_id, data, timestamp}`. The event's own `type`/`gateway_id`
/// fields are pulled out; everything else lands under `data`.
fn push_envelope(event: &RegistryEvent) -> Value {
    let mut value = serde_json::to_value(event).unwrap_or(Value::Null);
    let Some(obj) = value.as_object_mut() else {
        return Value::Null;
    };
    let kind = obj.remove("type").unwrap_or(Value::Null);
    let gateway_id = obj.remove("gateway_id").unwrap_or(Value::Null);
    serde_json::json!({
        "type": kind,
        "gateway_id": gateway_id,
        "data": obj,
        "timestamp": now_unix(),
    })
}

/// Awaits the next registry event, skipping over `Lagged` gaps. Never
/// resolves when `events` is `None` (no registry configured on this node),
/// so it can sit unconditionally in a `tokio::select!` arm.
async fn next_event(events: &mut Option<broadcast::Receiver<RegistryEvent>>) -> Option<RegistryEvent> {
    match events {
        Some(rx) => loop {
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        },
        None => std::future::pending().await,
    }
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut events = state.registry.as_ref().map(|registry| registry.subscribe());

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let request: ActionRequest = match serde_json::from_str(&text) {
                    Ok(request) => request,
                    Err(err) => {
                        warn!(%err, "malformed action request over websocket");
                        continue;
                    }
                };
                let response = run_action(&state, &request.action, request.params).await;
                let Ok(encoded) = serde_json::to_string(&response) else { continue };
                if socket.send(Message::Text(encoded)).await.is_err() {
                    break;
                }
            }
            event = next_event(&mut events) => {
                let Some(event) = event else { continue };
                let envelope = push_envelope(&event);
                let Ok(encoded) = serde_json::to_string(&envelope) else { continue };
                if socket.send(Message::Text(encoded)).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Stages an uploaded firmware image under `ota_upload_dir` and kicks off the
/// `start_ota` action once the file is fully written.
async fn firmware_upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> impl IntoResponse {
    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"success": false}))).into_response();
    }

    let field = match multipart.next_field().await {
        Ok(Some(field)) => field,
        _ => return (StatusCode::BAD_REQUEST, "missing firmware field").into_response(),
    };
    let data = match field.bytes().await {
        Ok(data) => data,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    if data.len() as u64 > state.config.max_firmware_size {
        return (StatusCode::PAYLOAD_TOO_LARGE, "firmware exceeds configured size limit").into_response();
    }

    if let Err(err) = tokio::fs::create_dir_all(&state.config.ota_upload_dir).await {
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }
    let path = state.config.ota_upload_dir.join("staged.bin");
    if let Err(err) = tokio::fs::write(&path, &data).await {
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }

    info!(bytes = data.len(), path = %path.display(), "firmware staged");
    let response = run_action(&state, "start_ota", serde_json::json!({})).await;
    Json(response).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any);

    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/action", post(http_action))
        .route("/actions", get(list_actions_handler))
        .route("/firmware", post(firmware_upload))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(state);
    info!(%addr, "client interface listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
