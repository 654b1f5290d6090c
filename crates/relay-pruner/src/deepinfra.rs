//! DeepInfra reranker backend: scores each line against `goal_hint` via a
//! pooled `reqwest::Client` and selects the top-K lines to keep.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use relay_core::tokens::count_text;
use reqwest::Client;
use serde_json::Value;

use crate::reconstruct::{Annotation, prune_reason, reconstruct};
use crate::types::{SourceType, Stats};

pub const DEFAULT_ENDPOINT_URL: &str = "https://api.deepinfra.com/v1/inference/Qwen/Qwen3-Reranker-0.6B";

#[derive(Debug, Clone)]
pub struct DeepInfraConfig {
    pub endpoint_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub max_docs: usize,
}

impl DeepInfraConfig {
    /// Reads `DEEPINFRA_{ENDPOINT_URL,API_KEY,TIMEOUT_MS,MAX_DOCS}`; `None`
    /// when `DEEPINFRA_API_KEY` is unset (the caller falls back to
    /// heuristic in that case).
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("DEEPINFRA_API_KEY").ok().filter(|k| !k.is_empty())?;
        let endpoint_url = std::env::var("DEEPINFRA_ENDPOINT_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT_URL.to_string());
        let timeout_ms = std::env::var("DEEPINFRA_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(20_000)
            .clamp(1, 120_000);
        let max_docs = std::env::var("DEEPINFRA_MAX_DOCS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(64)
            .clamp(1, 512);
        Some(DeepInfraConfig {
            endpoint_url,
            api_key,
            timeout_ms,
            max_docs,
        })
    }
}

#[derive(Debug)]
pub enum DeepInfraError {
    Http(Option<u16>, String),
    Parse(String),
}

pub struct RerankResult {
    pub scores_by_index: BTreeMap<usize, f64>,
    pub elapsed_ms: u64,
    pub http_status: u16,
}

pub struct DeepInfraClient {
    http: Client,
    config: DeepInfraConfig,
}

impl DeepInfraClient {
    pub fn new(http: Client, config: DeepInfraConfig) -> Self {
        DeepInfraClient { http, config }
    }

    pub async fn rerank(&self, query: &str, documents: &[&str]) -> Result<RerankResult, DeepInfraError> {
        if documents.is_empty() {
            return Ok(RerankResult {
                scores_by_index: BTreeMap::new(),
                elapsed_ms: 0,
                http_status: 200,
            });
        }

        let payload = serde_json::json!({
            "input": { "query": query, "documents": documents }
        });

        let started = Instant::now();
        let send = self
            .http
            .post(&self.config.endpoint_url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send();

        let response = tokio::time::timeout(Duration::from_millis(self.config.timeout_ms), send)
            .await
            .map_err(|_| DeepInfraError::Http(None, "timeout".to_string()))?
            .map_err(|e| DeepInfraError::Http(None, e.to_string()))?;

        let status = response.status().as_u16();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if status != 200 {
            return Err(DeepInfraError::Http(Some(status), format!("deepinfra http {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DeepInfraError::Parse(e.to_string()))?;
        let scores_by_index = parse_scores_best_effort(&body, documents.len())?;

        Ok(RerankResult {
            scores_by_index,
            elapsed_ms,
            http_status: status,
        })
    }
}

fn as_float_list(value: &Value) -> Option<Vec<f64>> {
    let arr = value.as_array()?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        out.push(item.as_f64()?);
    }
    Some(out)
}

fn as_index_score_mapping(value: &Value) -> Option<BTreeMap<usize, f64>> {
    let arr = value.as_array()?;
    let mut mapping = BTreeMap::new();
    for item in arr {
        let obj = item.as_object()?;
        let idx = obj.get("index")?.as_u64()? as usize;
        let score = obj.get("score")?.as_f64()?;
        mapping.insert(idx, score);
    }
    if mapping.is_empty() { None } else { Some(mapping) }
}

fn scores_from_float_list(floats: &[f64], expected_docs: usize) -> Result<BTreeMap<usize, f64>, DeepInfraError> {
    if floats.is_empty() {
        return Err(DeepInfraError::Parse("empty scores list".to_string()));
    }
    Ok((0..floats.len().min(expected_docs)).map(|i| (i, floats[i])).collect())
}

/// Accepts several response shapes: a bare float array, `{"scores":[...]}`,
/// `[{"index","score"}, ...]`, or one level of nesting under
/// `result|results|output|data`.
fn parse_scores_best_effort(data: &Value, expected_docs: usize) -> Result<BTreeMap<usize, f64>, DeepInfraError> {
    if let Some(floats) = as_float_list(data) {
        return scores_from_float_list(&floats, expected_docs);
    }

    let Some(obj) = data.as_object() else {
        return Err(DeepInfraError::Parse("unexpected response shape".to_string()));
    };

    if let Some(scores) = obj.get("scores").and_then(as_float_list) {
        return scores_from_float_list(&scores, expected_docs);
    }

    for key in ["scores", "results", "result", "output", "data"] {
        let Some(candidate) = obj.get(key) else { continue };
        if let Some(mapping) = as_index_score_mapping(candidate) {
            return Ok(mapping.into_iter().filter(|(i, _)| *i < expected_docs).collect());
        }
        if let Some(floats) = as_float_list(candidate) {
            return scores_from_float_list(&floats, expected_docs);
        }
        if let Some(sub_obj) = candidate.as_object() {
            for subkey in ["scores", "results", "result", "output", "data"] {
                let Some(sub) = sub_obj.get(subkey) else { continue };
                if let Some(mapping) = as_index_score_mapping(sub) {
                    return Ok(mapping.into_iter().filter(|(i, _)| *i < expected_docs).collect());
                }
                if let Some(floats) = as_float_list(sub) {
                    return scores_from_float_list(&floats, expected_docs);
                }
            }
        }
    }

    Err(DeepInfraError::Parse("scores not found in response".to_string()))
}

fn compute_keep_target(n_lines: usize, max_prune_ratio: f64, min_keep_lines: usize) -> usize {
    if n_lines == 0 {
        return 0;
    }
    let ratio = max_prune_ratio.clamp(0.0, 1.0);
    let keep_by_ratio = ((n_lines as f64) * (1.0 - ratio)).ceil() as usize;
    min_keep_lines.max(keep_by_ratio).min(n_lines)
}

/// Uniform, deterministic subsample of `0..n_lines` down to at most
/// `max_docs` indices, rounding `j*(n-1)/(m-1)` and topping up by forward
/// scan if rounding produced duplicates.
fn select_doc_indices(n_lines: usize, max_docs: usize) -> Vec<usize> {
    if n_lines == 0 {
        return Vec::new();
    }
    let m = max_docs.max(1);
    if m >= n_lines {
        return (0..n_lines).collect();
    }
    if m == 1 {
        return vec![0];
    }

    let mut indices = Vec::with_capacity(m);
    for j in 0..m {
        let idx = ((j as f64) * ((n_lines - 1) as f64) / ((m - 1) as f64)).round() as usize;
        let idx = idx.min(n_lines - 1);
        if !indices.contains(&idx) {
            indices.push(idx);
        }
    }

    let mut cursor = 0;
    while indices.len() < m && cursor < n_lines {
        if !indices.contains(&cursor) {
            indices.push(cursor);
        }
        cursor += 1;
    }

    indices.sort_unstable();
    indices.truncate(m);
    indices
}

#[allow(clippy::too_many_arguments)]
pub async fn prune_text_with_deepinfra(
    client: &DeepInfraClient,
    prune_id: &str,
    text: &str,
    goal_hint: &str,
    _source_type: SourceType,
    max_prune_ratio: f64,
    min_keep_lines: usize,
    annotate_lines: bool,
    include_markers: bool,
) -> Result<(String, Vec<Annotation>, Stats, Vec<String>), DeepInfraError> {
    let started = Instant::now();
    let lines: Vec<&str> = text.lines().collect();
    let n = lines.len();

    if n == 0 {
        return Ok((String::new(), Vec::new(), Stats::new("deepinfra", 0, 0, 0), Vec::new()));
    }

    let keep_target = compute_keep_target(n, max_prune_ratio, min_keep_lines);
    let doc_indices = select_doc_indices(n, client.config.max_docs);
    let truncated = doc_indices.len() < n;

    let docs: Vec<&str> = doc_indices.iter().map(|&i| lines[i]).collect();
    let rerank = client.rerank(goal_hint, &docs).await?;

    let mut line_scores: BTreeMap<usize, f64> = BTreeMap::new();
    for (doc_i, &line_i) in doc_indices.iter().enumerate() {
        let score = rerank.scores_by_index.get(&doc_i).copied().unwrap_or(0.0);
        line_scores.insert(line_i, score);
    }

    let mut scored_indices: Vec<usize> = (0..n).collect();
    scored_indices.sort_by(|&a, &b| {
        let score_a = line_scores.get(&a).copied().unwrap_or(0.0);
        let score_b = line_scores.get(&b).copied().unwrap_or(0.0);
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    let keep: std::collections::BTreeSet<usize> = scored_indices.into_iter().take(keep_target).collect();

    let reason = prune_reason(goal_hint);
    let (pruned_text, annotations) = reconstruct(&lines, &keep, prune_id, &reason, annotate_lines, include_markers);

    let kept_lines = keep.len();
    let pruned_lines = n - kept_lines;
    let mut stats = Stats::new("deepinfra", n, kept_lines, pruned_lines);
    stats.tokens_est_before = count_text(text);
    stats.tokens_est_after = count_text(&pruned_text);
    stats.finalize_tokens_saved();
    stats.elapsed_ms = started.elapsed().as_millis() as u64;
    stats.deepinfra_latency_ms = Some(rerank.elapsed_ms);
    stats.deepinfra_docs_scored = Some(doc_indices.len());
    stats.deepinfra_docs_total = Some(n);
    stats.deepinfra_http_status = Some(rerank.http_status);
    stats.deepinfra_cached = Some(false);

    let mut warnings = Vec::new();
    if truncated {
        warnings.push("deepinfra_docs_truncated".to_string());
    }

    Ok((pruned_text, annotations, stats, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_doc_indices_returns_all_when_under_cap() {
        assert_eq!(select_doc_indices(5, 10), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn select_doc_indices_covers_both_ends() {
        let indices = select_doc_indices(100, 10);
        assert_eq!(indices.first(), Some(&0));
        assert_eq!(indices.last(), Some(&99));
        assert_eq!(indices.len(), 10);
    }

    #[test]
    fn select_doc_indices_single_doc_is_first_line() {
        assert_eq!(select_doc_indices(50, 1), vec![0]);
    }

    #[test]
    fn compute_keep_target_respects_min_keep_lines() {
        assert_eq!(compute_keep_target(10, 1.0, 3), 3);
    }

    #[test]
    fn compute_keep_target_respects_ratio() {
        assert_eq!(compute_keep_target(10, 0.5, 0), 5);
    }

    #[test]
    fn parse_scores_accepts_bare_float_array() {
        let data = serde_json::json!([0.1, 0.9, 0.3]);
        let scores = parse_scores_best_effort(&data, 3).unwrap();
        assert_eq!(scores.get(&1), Some(&0.9));
    }

    #[test]
    fn parse_scores_accepts_index_score_objects() {
        let data = serde_json::json!({"results": [{"index": 1, "score": 0.5}, {"index": 0, "score": 0.2}]});
        let scores = parse_scores_best_effort(&data, 2).unwrap();
        assert_eq!(scores.get(&1), Some(&0.5));
    }

    #[test]
    fn parse_scores_rejects_unknown_shape() {
        let data = serde_json::json!({"unexpected": "shape"});
        assert!(parse_scores_best_effort(&data, 2).is_err());
    }
}
