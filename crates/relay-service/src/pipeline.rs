//! Streaming pipeline (C10): C15 sanitize -> C9 session -> C4 mask -> C5
//! prune -> C2 resolve -> C3 upstream, tee-ing usage extraction and metric
//! broadcast into the forwarded byte stream.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use relay_core::config::RelayConfig;
use relay_core::masking::mask;
use relay_core::message::{WireMessage, messages_from_wire, messages_to_wire};
use relay_core::sanitizer::{CircuitBreaker, sanitize_messages};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::metrics::{Metric, MetricStatus};
use crate::state::AppState;
use crate::upstream::{UpstreamRequestConfig, UpstreamResponse};
use crate::usage::{extract_usage, frame_json_payload, split_sse_frames};
use crate::ws::now_unix_millis;

pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn authorize(config: &RelayConfig, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let Some(expected) = &config.server.auth_key else {
        return Ok(());
    };

    let header = headers
        .get("authorization")
        .ok_or((StatusCode::UNAUTHORIZED, "missing authorization".to_string()))?;
    let value = header
        .to_str()
        .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid authorization header".to_string()))?;

    match value.strip_prefix("Bearer ") {
        Some(token) if token == expected => Ok(()),
        _ => Err((StatusCode::UNAUTHORIZED, "invalid bearer token".to_string())),
    }
}

fn resolve_api_key(config: &RelayConfig, provider_key: &str) -> Option<String> {
    let entry = config.routes.providers().find(|p| p.key == provider_key)?;
    let env_name = entry.api_key_env.as_ref()?;
    std::env::var(env_name).ok()
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Result<Response, (StatusCode, String)> {
    authorize(&state.config, &headers)?;

    let model_id = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or((StatusCode::BAD_REQUEST, "model is required".to_string()))?
        .to_string();
    let stream_requested = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let wire_messages: Vec<WireMessage> = serde_json::from_value(
        body.get("messages").cloned().unwrap_or(Value::Array(Vec::new())),
    )
    .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid messages: {e}")))?;

    let mut breaker = CircuitBreaker::new(state.sanitizer_breaker.clone());
    let messages = messages_from_wire(wire_messages);
    let messages = sanitize_messages(&messages, &mut breaker);

    let resolved = state
        .config
        .routes
        .resolve(&model_id)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let session = state.sessions.ensure_session(
        &resolved.provider_type,
        &resolved.upstream_model,
        now_unix_secs(),
    );

    let messages = mask(&messages, &state.config.masking);
    let messages = state.pruner_client.prune(&messages).await;
    let estimated_prompt_tokens = relay_core::tokens::count_chat(&messages) as u64;

    let outgoing_messages = messages_to_wire(messages);
    if let Value::Object(map) = &mut body {
        map.insert("model".to_string(), json!(resolved.upstream_model));
        map.insert(
            "messages".to_string(),
            serde_json::to_value(&outgoing_messages).expect("wire messages always serialize"),
        );
    }

    let metric_id = format!("metric_{}", Uuid::new_v4());
    state.metrics.create_metric(Metric {
        id: metric_id.clone(),
        session_id: session.id.clone(),
        provider: resolved.provider_type.clone(),
        model: resolved.upstream_model.clone(),
        request_ts: now_unix_secs(),
        finish_ts: None,
        prompt_tokens: 0,
        completion_tokens: 0,
        total_tokens: 0,
        status: MetricStatus::Created,
        error_kind: None,
    });
    state.hub.broadcast(
        json!({"type": "metric_created", "metric_id": metric_id, "session_id": session.id}),
        now_unix_millis(),
    );

    let mut request_headers = HashMap::new();
    request_headers.insert("content-type".to_string(), "application/json".to_string());
    if let Some(api_key) = resolve_api_key(&state.config, &resolved.provider_type) {
        request_headers.insert("authorization".to_string(), format!("Bearer {api_key}"));
    }

    let url = format!("{}/chat/completions", resolved.base_url.trim_end_matches('/'));
    let body_bytes =
        serde_json::to_vec(&body).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let upstream_cfg = UpstreamRequestConfig::default();
    let upstream_response = match state
        .upstream
        .send("POST", &url, &request_headers, body_bytes, &upstream_cfg)
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            let kind = e.kind();
            state.metrics.finalize_metric(
                &metric_id,
                now_unix_secs(),
                MetricStatus::Error,
                Some(kind.as_str().to_string()),
            );
            state.hub.broadcast(
                json!({"type": "streaming_error", "metric_id": metric_id, "error_kind": kind.as_str()}),
                now_unix_millis(),
            );
            return Err((StatusCode::BAD_GATEWAY, format!("upstream error: {e:?}")));
        }
    };

    if stream_requested {
        Ok(stream_response(state, metric_id, upstream_response, estimated_prompt_tokens))
    } else {
        Ok(non_stream_response(state, metric_id, upstream_response).await)
    }
}

/// Forwards upstream bytes verbatim to the client while tee-ing an SSE
/// parser that extracts usage and emits `metric_updated`/`streaming_error`
/// WS events. Runs on a single spawned task so byte order and WS event
/// order for this `metric_id` are both preserved.
fn stream_response(
    state: AppState,
    metric_id: String,
    upstream: UpstreamResponse,
    estimated_prompt_tokens: u64,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<bytes::Bytes, std::io::Error>>(16);
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK);

    tokio::spawn(async move {
        let mut body_stream = upstream.body_stream;
        let mut buffer = String::new();
        let mut usage_seen = false;

        loop {
            match body_stream.next().await {
                Some(Ok(chunk)) => {
                    if tx.send(Ok(chunk.clone())).await.is_err() {
                        state.metrics.finalize_metric(
                            &metric_id,
                            now_unix_secs(),
                            MetricStatus::Cancelled,
                            None,
                        );
                        state.hub.broadcast(
                            json!({"type": "metric_finalized", "metric_id": metric_id, "status": "cancelled"}),
                            now_unix_millis(),
                        );
                        return;
                    }
                    if let Ok(text) = std::str::from_utf8(&chunk) {
                        buffer.push_str(text);
                        let (frames, rest) = split_sse_frames(&buffer);
                        let rest = rest.to_string();
                        for frame in &frames {
                            if let Some(payload) = frame_json_payload(frame) {
                                if let Some(usage) = extract_usage(&payload) {
                                    usage_seen = true;
                                    state.metrics.update_metric_usage(
                                        &metric_id,
                                        usage.prompt_tokens,
                                        usage.completion_tokens,
                                        usage.total_tokens,
                                    );
                                    state.hub.broadcast(
                                        json!({
                                            "type": "metric_updated",
                                            "metric_id": metric_id,
                                            "prompt_tokens": usage.prompt_tokens,
                                            "completion_tokens": usage.completion_tokens,
                                            "total_tokens": usage.total_tokens,
                                        }),
                                        now_unix_millis(),
                                    );
                                }
                            }
                        }
                        buffer = rest;
                    }
                }
                Some(Err(kind)) => {
                    state.metrics.finalize_metric(
                        &metric_id,
                        now_unix_secs(),
                        MetricStatus::Error,
                        Some(kind.as_str().to_string()),
                    );
                    state.hub.broadcast(
                        json!({"type": "streaming_error", "metric_id": metric_id, "error_kind": kind.as_str()}),
                        now_unix_millis(),
                    );
                    return;
                }
                None => break,
            }
        }

        if !usage_seen {
            state.metrics.update_metric_usage(
                &metric_id,
                estimated_prompt_tokens,
                0,
                estimated_prompt_tokens,
            );
        }
        state
            .metrics
            .finalize_metric(&metric_id, now_unix_secs(), MetricStatus::Finalized, None);
        state.hub.broadcast(
            json!({"type": "metric_finalized", "metric_id": metric_id}),
            now_unix_millis(),
        );
    });

    let body_stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });

    Response::builder()
        .status(status)
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(body_stream))
        .expect("building a streaming response never fails for well-formed headers")
}

async fn non_stream_response(
    state: AppState,
    metric_id: String,
    upstream: UpstreamResponse,
) -> Response {
    let mut bytes = Vec::new();
    let mut body_stream = upstream.body_stream;
    let mut transport_error = None;

    while let Some(chunk) = body_stream.next().await {
        match chunk {
            Ok(b) => bytes.extend_from_slice(&b),
            Err(kind) => {
                transport_error = Some(kind);
                break;
            }
        }
    }

    if let Some(kind) = transport_error {
        state.metrics.finalize_metric(
            &metric_id,
            now_unix_secs(),
            MetricStatus::Error,
            Some(kind.as_str().to_string()),
        );
        state.hub.broadcast(
            json!({"type": "streaming_error", "metric_id": metric_id, "error_kind": kind.as_str()}),
            now_unix_millis(),
        );
        return (StatusCode::BAD_GATEWAY, "upstream read error").into_response();
    }

    if let Ok(payload) = serde_json::from_slice::<Value>(&bytes) {
        if let Some(usage) = extract_usage(&payload) {
            state.metrics.update_metric_usage(
                &metric_id,
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens,
            );
            state.hub.broadcast(
                json!({
                    "type": "metric_updated",
                    "metric_id": metric_id,
                    "prompt_tokens": usage.prompt_tokens,
                    "completion_tokens": usage.completion_tokens,
                    "total_tokens": usage.total_tokens,
                }),
                now_unix_millis(),
            );
        }
    }

    state
        .metrics
        .finalize_metric(&metric_id, now_unix_secs(), MetricStatus::Finalized, None);
    state.hub.broadcast(
        json!({"type": "metric_finalized", "metric_id": metric_id}),
        now_unix_millis(),
    );

    (
        StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK),
        [("content-type", "application/json")],
        bytes,
    )
        .into_response()
}
