//! JSON-RPC dispatch (C6): `initialize`, `tools/list`, `tools/call`, and
//! the empty-list discovery methods, wired to the `prune_text`,
//! `recover_text`, and `health` tools.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use relay_core::config::{McpPrunerServerConfig, PrunerBackend};
use relay_core::rpc::{RpcRequest, RpcResponse};
use reqwest::Client;
use serde_json::{Value, json};

use crate::cache::{CacheKey, CachedPrune, PruneCache, policy_fingerprint};
use crate::deepinfra::{DeepInfraClient, DeepInfraConfig, prune_text_with_deepinfra};
use crate::heuristic::baseline_prune;
use crate::store::PruneStore;
pub use crate::types::SourceType;
use crate::types::{
    PruneTextArgs, PruneTextPayload, RecoverMetadata, RecoverRangeOut, RecoverTextArgs, RecoverTextPayload, Stats,
};

const CACHE_CAPACITY: usize = 256;
const MCP_PROTOCOL_VERSION: &str = "2025-11-25";

pub struct PrunerState {
    pub config: McpPrunerServerConfig,
    pub store: PruneStore,
    pub cache: PruneCache,
    pub http: Client,
}

impl PrunerState {
    pub fn new(config: McpPrunerServerConfig) -> Self {
        let ttl = Duration::from_secs(config.prune_id_ttl_s);
        PrunerState {
            store: PruneStore::new(ttl),
            cache: PruneCache::new(CACHE_CAPACITY),
            http: Client::new(),
            config,
        }
    }
}

pub type SharedState = Arc<PrunerState>;

fn now_iso() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{secs}")
}

fn health_payload() -> Value {
    json!({
        "status": "healthy",
        "server": "mcp-pruner",
        "version": "0.1.0",
        "capabilities": ["prune_text", "recover_text", "annotations", "markers"],
        "timestamp": now_iso(),
    })
}

fn tools_list() -> Value {
    json!({
        "tools": [
            {
                "name": "prune_text",
                "description": "Prunes text with the configured backend, emitting annotations and markers.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "text": {"type": "string"},
                        "goal_hint": {"type": "string"},
                        "source_type": {"type": "string", "enum": ["code", "logs", "docs"]},
                        "options": {
                            "type": "object",
                            "properties": {
                                "max_prune_ratio": {"type": "number", "minimum": 0, "maximum": 1},
                                "min_keep_lines": {"type": "integer", "minimum": 0},
                                "timeout_ms": {"type": "integer", "minimum": 1},
                                "annotate_lines": {"type": "boolean"},
                                "include_markers": {"type": "boolean"},
                            },
                            "required": ["max_prune_ratio", "min_keep_lines", "timeout_ms", "annotate_lines", "include_markers"],
                        },
                    },
                    "required": ["text", "goal_hint", "source_type", "options"],
                },
            },
            {
                "name": "recover_text",
                "description": "Recovers original line ranges for a prune_id.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "prune_id": {"type": "string"},
                        "ranges": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "start_line": {"type": "integer", "minimum": 1},
                                    "end_line": {"type": "integer", "minimum": 1},
                                },
                                "required": ["start_line", "end_line"],
                            },
                        },
                        "include_line_numbers": {"type": "boolean"},
                    },
                    "required": ["prune_id", "ranges", "include_line_numbers"],
                },
            },
            {
                "name": "health",
                "description": "Returns server health and capabilities.",
                "inputSchema": {"type": "object", "properties": {}},
            },
        ]
    })
}

pub async fn get_health() -> impl IntoResponse {
    Json(health_payload())
}

pub async fn post_rpc(State(state): State<SharedState>, Json(request): Json<RpcRequest>) -> impl IntoResponse {
    Json(dispatch(&state, request).await)
}

async fn dispatch(state: &SharedState, request: RpcRequest) -> RpcResponse {
    match request.method.as_str() {
        "initialize" => {
            let protocol_version = request
                .params
                .get("protocolVersion")
                .and_then(Value::as_str)
                .unwrap_or(MCP_PROTOCOL_VERSION);
            RpcResponse::ok(
                request.id,
                json!({
                    "protocolVersion": protocol_version,
                    "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
                    "serverInfo": {"name": "mcp-pruner", "version": "0.1.0"},
                }),
            )
        }
        "notifications/initialized" => RpcResponse::ok(request.id, json!({"ok": true})),
        "tools/list" => RpcResponse::ok(request.id, tools_list()),
        "resources/list" => RpcResponse::ok(request.id, json!({"resources": []})),
        "resources/templates/list" => RpcResponse::ok(request.id, json!({"resourceTemplates": []})),
        "prompts/list" => RpcResponse::ok(request.id, json!({"prompts": []})),
        "tools/call" => dispatch_tool_call(state, request).await,
        "health" => RpcResponse::ok(request.id, health_payload()),
        other => RpcResponse::err(request.id, relay_core::rpc::METHOD_NOT_FOUND, format!("Method not found: {other}")),
    }
}

async fn dispatch_tool_call(state: &SharedState, request: RpcRequest) -> RpcResponse {
    let Some(name) = request.params.get("name").and_then(Value::as_str) else {
        return RpcResponse::err(request.id, relay_core::rpc::INVALID_PARAMS, "Invalid params: missing tool name");
    };
    let args = request.params.get("arguments").cloned().unwrap_or(Value::Null);

    match name {
        "prune_text" => tool_prune_text(state, request.id, args).await,
        "recover_text" | "recover_range" => tool_recover_text(state, request.id, args).await,
        "health" => RpcResponse::ok(request.id, relay_core::rpc::wrap_tool_result(&health_payload())),
        other => RpcResponse::err(
            request.id,
            relay_core::rpc::INVALID_PARAMS,
            format!("Invalid params: unknown tool '{other}'"),
        ),
    }
}

async fn tool_prune_text(state: &SharedState, id: Value, args: Value) -> RpcResponse {
    let parsed: PruneTextArgs = match serde_json::from_value(args) {
        Ok(v) => v,
        Err(e) => {
            return RpcResponse::err(
                id,
                relay_core::rpc::INVALID_PARAMS,
                format!("Invalid params: expected {{text, goal_hint, source_type, options}} ({e})"),
            );
        }
    };

    let opts = &parsed.options;
    if !(0.0..=1.0).contains(&opts.max_prune_ratio) {
        return RpcResponse::err(id, relay_core::rpc::INVALID_PARAMS, "Invalid params: options.max_prune_ratio must be between 0 and 1");
    }
    if opts.timeout_ms < 1 {
        return RpcResponse::err(id, relay_core::rpc::INVALID_PARAMS, "Invalid params: options.timeout_ms must be >= 1");
    }

    let prune_id = format!("prn_{}", uuid::Uuid::new_v4().simple());

    if parsed.text.chars().count() > state.config.max_input_chars {
        let lines: Vec<String> = parsed.text.lines().map(|l| l.to_string()).collect();
        state.store.put(prune_id.clone(), lines.clone()).await;
        let stats = Stats::new("heuristic", lines.len(), lines.len(), 0);
        let mut stats = stats;
        stats.used_fallback = true;
        let payload = PruneTextPayload {
            prune_id,
            pruned_text: parsed.text.clone(),
            annotations: Vec::new(),
            stats,
            warnings: vec!["input_too_large".to_string()],
        };
        return RpcResponse::ok(id, relay_core::rpc::wrap_tool_result(&serde_json::to_value(payload).expect("payload always serializes")));
    }

    let backend_name = match state.config.backend {
        PrunerBackend::Heuristic => "heuristic",
        PrunerBackend::DeepInfra => "deepinfra",
    };
    let fingerprint = policy_fingerprint(
        backend_name,
        opts.max_prune_ratio,
        opts.min_keep_lines,
        opts.annotate_lines,
        opts.include_markers,
    );
    let cache_key = CacheKey::new(&parsed.text, &parsed.goal_hint, parsed.source_type, fingerprint);

    if let Some(cached) = state.cache.get(&cache_key).await {
        let lines: Vec<String> = parsed.text.lines().map(|l| l.to_string()).collect();
        state.store.put(prune_id.clone(), lines).await;
        let pruned_text = cached
            .pruned_text
            .replace("prune_id=<pending>", &format!("prune_id={prune_id}"));
        let annotations: Vec<_> = cached
            .annotations
            .into_iter()
            .map(|mut a| {
                a.marker = a.marker.replace("prune_id=<pending>", &format!("prune_id={prune_id}"));
                a
            })
            .collect();
        let mut stats = cached.stats;
        stats.deepinfra_cached = Some(true);
        stats.deepinfra_latency_ms = Some(0);
        let payload = PruneTextPayload {
            prune_id,
            pruned_text,
            annotations,
            stats,
            warnings: vec!["cache_hit".to_string()],
        };
        return RpcResponse::ok(id, relay_core::rpc::wrap_tool_result(&serde_json::to_value(payload).expect("payload always serializes")));
    }

    let (pruned_text, annotations, mut stats, mut warnings) = match state.config.backend {
        PrunerBackend::DeepInfra => match DeepInfraConfig::from_env() {
            Some(cfg) => {
                let client = DeepInfraClient::new(state.http.clone(), cfg);
                match prune_text_with_deepinfra(
                    &client,
                    "<pending>",
                    &parsed.text,
                    &parsed.goal_hint,
                    parsed.source_type,
                    opts.max_prune_ratio,
                    opts.min_keep_lines,
                    opts.annotate_lines,
                    opts.include_markers,
                )
                .await
                {
                    Ok((text, annotations, stats, warnings)) => (text, annotations, stats, warnings),
                    Err(_) => {
                        let (text, annotations, mut stats) = baseline_prune(
                            "<pending>",
                            &parsed.text,
                            &parsed.goal_hint,
                            parsed.source_type,
                            opts.max_prune_ratio,
                            opts.min_keep_lines,
                            opts.annotate_lines,
                            opts.include_markers,
                        );
                        stats.used_fallback = true;
                        (text, annotations, stats, vec!["deepinfra_call_failed".to_string()])
                    }
                }
            }
            None => {
                let (text, annotations, mut stats) = baseline_prune(
                    "<pending>",
                    &parsed.text,
                    &parsed.goal_hint,
                    parsed.source_type,
                    opts.max_prune_ratio,
                    opts.min_keep_lines,
                    opts.annotate_lines,
                    opts.include_markers,
                );
                stats.used_fallback = true;
                (text, annotations, stats, vec!["deepinfra_api_key_missing".to_string()])
            }
        },
        PrunerBackend::Heuristic => {
            let (text, annotations, stats) = baseline_prune(
                "<pending>",
                &parsed.text,
                &parsed.goal_hint,
                parsed.source_type,
                opts.max_prune_ratio,
                opts.min_keep_lines,
                opts.annotate_lines,
                opts.include_markers,
            );
            (text, annotations, stats, Vec::new())
        }
    };

    let cacheable = CachedPrune {
        pruned_text: pruned_text.clone(),
        annotations: annotations.clone(),
        stats: stats.clone(),
    };
    state.cache.put(cache_key, cacheable).await;

    let pruned_text = pruned_text.replace("prune_id=<pending>", &format!("prune_id={prune_id}"));
    let annotations: Vec<_> = annotations
        .into_iter()
        .map(|mut a| {
            a.marker = a.marker.replace("prune_id=<pending>", &format!("prune_id={prune_id}"));
            a
        })
        .collect();

    let lines: Vec<String> = parsed.text.lines().map(|l| l.to_string()).collect();
    state.store.put(prune_id.clone(), lines).await;

    warnings.dedup();
    let payload = PruneTextPayload {
        prune_id,
        pruned_text,
        annotations,
        stats,
        warnings,
    };
    RpcResponse::ok(id, relay_core::rpc::wrap_tool_result(&serde_json::to_value(payload).expect("payload always serializes")))
}

async fn tool_recover_text(state: &SharedState, id: Value, args: Value) -> RpcResponse {
    let parsed: RecoverTextArgs = match serde_json::from_value(args) {
        Ok(v) => v,
        Err(e) => {
            return RpcResponse::err(
                id,
                relay_core::rpc::INVALID_PARAMS,
                format!("Invalid params: expected {{prune_id, ranges, include_line_numbers}} ({e})"),
            );
        }
    };

    let Some(stored_lines) = state.store.get(&parsed.prune_id).await else {
        return RpcResponse::err(id, relay_core::rpc::PRUNE_ID_NOT_FOUND, "prune_id_not_found");
    };

    let mut chunks = Vec::new();
    for range in &parsed.ranges {
        if range.start_line < 1 || range.end_line < 1 || range.start_line > range.end_line {
            return RpcResponse::err(id, relay_core::rpc::INVALID_RANGE, "invalid_range");
        }
        if range.start_line > stored_lines.len() {
            return RpcResponse::err(id, relay_core::rpc::INVALID_RANGE, "invalid_range");
        }
        let start_idx = range.start_line - 1;
        let end_idx = range.end_line.min(stored_lines.len());
        for idx in start_idx..end_idx {
            if parsed.include_line_numbers {
                chunks.push(format!("{}│ {}", idx + 1, stored_lines[idx]));
            } else {
                chunks.push(stored_lines[idx].clone());
            }
        }
    }

    let payload = RecoverTextPayload {
        raw_text: chunks.join("\n"),
        metadata: RecoverMetadata {
            prune_id: parsed.prune_id,
            ranges: parsed
                .ranges
                .iter()
                .map(|r| RecoverRangeOut {
                    start_line: r.start_line,
                    end_line: r.end_line,
                })
                .collect(),
            line_numbering: "original",
        },
    };
    RpcResponse::ok(id, relay_core::rpc::wrap_tool_result(&serde_json::to_value(payload).expect("payload always serializes")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::config::McpPrunerServerConfig;

    fn test_state() -> SharedState {
        Arc::new(PrunerState::new(McpPrunerServerConfig {
            backend: PrunerBackend::Heuristic,
            ..McpPrunerServerConfig::default()
        }))
    }

    #[tokio::test]
    async fn initialize_echoes_protocol_version() {
        let state = test_state();
        let req = RpcRequest::new(Value::from(1), "initialize", json!({"protocolVersion": "2025-01-01"}));
        let resp = dispatch(&state, req).await;
        assert_eq!(resp.result.unwrap()["protocolVersion"], "2025-01-01");
    }

    #[tokio::test]
    async fn tools_list_includes_prune_and_recover() {
        let state = test_state();
        let req = RpcRequest::new(Value::from(1), "tools/list", Value::Null);
        let resp = dispatch(&state, req).await;
        let tools = resp.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, 3);
    }

    #[tokio::test]
    async fn resources_list_is_empty() {
        let state = test_state();
        let req = RpcRequest::new(Value::from(1), "resources/list", Value::Null);
        let resp = dispatch(&state, req).await;
        assert_eq!(resp.result.unwrap()["resources"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn prune_text_round_trips_through_recover_text() {
        let state = test_state();
        let lines: Vec<String> = (0..50).map(|i| format!("line {i}")).collect();
        let text = lines.join("\n");

        let prune_req = RpcRequest::new(
            Value::from(1),
            "tools/call",
            json!({
                "name": "prune_text",
                "arguments": {
                    "text": text,
                    "goal_hint": "objectif principal",
                    "source_type": "docs",
                    "options": {
                        "max_prune_ratio": 0.5,
                        "min_keep_lines": 5,
                        "timeout_ms": 1000,
                        "annotate_lines": false,
                        "include_markers": true,
                    }
                }
            }),
        );
        let prune_resp = dispatch(&state, prune_req).await;
        let result = prune_resp.result.unwrap();
        let payload_text = result["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(payload_text).unwrap();
        let prune_id = payload["prune_id"].as_str().unwrap().to_string();
        assert!(prune_id.starts_with("prn_"));

        let recover_req = RpcRequest::new(
            Value::from(2),
            "tools/call",
            json!({
                "name": "recover_text",
                "arguments": {
                    "prune_id": prune_id,
                    "ranges": [{"start_line": 1, "end_line": 2}],
                    "include_line_numbers": false,
                }
            }),
        );
        let recover_resp = dispatch(&state, recover_req).await;
        let result = recover_resp.result.unwrap();
        let payload_text = result["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(payload_text).unwrap();
        assert_eq!(payload["raw_text"], "line 0\nline 1");
    }

    #[tokio::test]
    async fn recover_text_unknown_id_is_error() {
        let state = test_state();
        let req = RpcRequest::new(
            Value::from(1),
            "tools/call",
            json!({
                "name": "recover_text",
                "arguments": {"prune_id": "prn_missing", "ranges": [], "include_line_numbers": false}
            }),
        );
        let resp = dispatch(&state, req).await;
        assert_eq!(resp.error.unwrap().code, relay_core::rpc::PRUNE_ID_NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_input_fails_open() {
        let mut config = McpPrunerServerConfig {
            backend: PrunerBackend::Heuristic,
            ..McpPrunerServerConfig::default()
        };
        config.max_input_chars = 10;
        let state = Arc::new(PrunerState::new(config));

        let req = RpcRequest::new(
            Value::from(1),
            "tools/call",
            json!({
                "name": "prune_text",
                "arguments": {
                    "text": "this text is much longer than ten characters",
                    "goal_hint": "goal",
                    "source_type": "docs",
                    "options": {
                        "max_prune_ratio": 0.5,
                        "min_keep_lines": 1,
                        "timeout_ms": 1000,
                        "annotate_lines": false,
                        "include_markers": true,
                    }
                }
            }),
        );
        let resp = dispatch(&state, req).await;
        let result = resp.result.unwrap();
        let payload_text = result["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(payload_text).unwrap();
        assert_eq!(payload["warnings"][0], "input_too_large");
        assert_eq!(payload["stats"]["used_fallback"], true);
    }

    #[tokio::test]
    async fn invalid_max_prune_ratio_is_rejected() {
        let state = test_state();
        let req = RpcRequest::new(
            Value::from(1),
            "tools/call",
            json!({
                "name": "prune_text",
                "arguments": {
                    "text": "hello",
                    "goal_hint": "goal",
                    "source_type": "docs",
                    "options": {
                        "max_prune_ratio": 2.0,
                        "min_keep_lines": 1,
                        "timeout_ms": 1000,
                        "annotate_lines": false,
                        "include_markers": true,
                    }
                }
            }),
        );
        let resp = dispatch(&state, req).await;
        assert_eq!(resp.error.unwrap().code, relay_core::rpc::INVALID_PARAMS);
    }
}
