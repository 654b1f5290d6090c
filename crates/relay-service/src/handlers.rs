//! HTTP API surface (C13): everything besides `/chat/completions`
//! (handled by [`crate::pipeline::chat_completions`]).

use axum::Json;
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::extract::ws::{Message, WebSocket};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_core::rpc::RpcRequest;
use serde::Deserialize;
use serde_json::json;

use crate::pipeline::now_unix_secs;
use crate::state::AppState;
use crate::ws::hello_frame;

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "ts": now_unix_secs()}))
}

pub async fn list_models_openai(State(state): State<AppState>) -> impl IntoResponse {
    let data: Vec<_> = state
        .config
        .routes
        .providers()
        .map(|p| {
            json!({
                "id": p.key,
                "object": "model",
                "created": 0,
                "owned_by": p.provider_type,
            })
        })
        .collect();
    Json(json!({"object": "list", "data": data}))
}

pub async fn list_models_dashboard(State(state): State<AppState>) -> impl IntoResponse {
    let data: Vec<_> = state
        .config
        .routes
        .providers()
        .map(|p| {
            json!({
                "key": p.key,
                "name": p.key,
                "provider": p.provider_type,
                "model": p.upstream_model,
            })
        })
        .collect();
    Json(data)
}

pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let data: Vec<_> = state
        .config
        .routes
        .providers()
        .map(|p| {
            json!({
                "key": p.key,
                "type": p.provider_type,
                "base_url": p.base_url,
                "max_context": p.max_context,
            })
        })
        .collect();
    Json(data)
}

pub async fn mcp_gateway_rpc(
    State(state): State<AppState>,
    Path(server_name): Path<String>,
    Json(request): Json<RpcRequest>,
) -> impl IntoResponse {
    let response = state.gateway.forward(&server_name, request).await;
    if response.error.is_some() {
        (StatusCode::BAD_GATEWAY, Json(response)).into_response()
    } else {
        Json(response).into_response()
    }
}

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sessions.list())
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub provider: String,
    pub model: String,
}

/// Creates (or reuses, per [`relay_core::session::should_auto_create`]) the
/// active session for `(provider, model)`.
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    let session = state.sessions.ensure_session(&req.provider, &req.model, now_unix_secs());
    (StatusCode::CREATED, Json(session))
}

pub async fn active_session(State(state): State<AppState>) -> Response {
    match state.sessions.active() {
        Some(session) => Json(session).into_response(),
        None => (StatusCode::NOT_FOUND, "no active session").into_response(),
    }
}

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (client_id, mut rx) = state.hub.connect();

    if socket
        .send(Message::Text(hello_frame(&client_id).to_string()))
        .await
        .is_err()
    {
        state.hub.disconnect(&client_id);
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        if socket.send(Message::Text(event.to_string())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.hub.disconnect(&client_id);
}
