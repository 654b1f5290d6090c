//! Wire types shared by the `prune_text`/`recover_text` tool handlers and
//! both pruning backends.

use serde::{Deserialize, Serialize};

use crate::reconstruct::Annotation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Code,
    Logs,
    Docs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PruneOptions {
    pub max_prune_ratio: f64,
    pub min_keep_lines: usize,
    pub timeout_ms: u64,
    pub annotate_lines: bool,
    pub include_markers: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PruneTextArgs {
    pub text: String,
    pub goal_hint: String,
    pub source_type: SourceType,
    pub options: PruneOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoverRange {
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoverTextArgs {
    pub prune_id: String,
    pub ranges: Vec<RecoverRange>,
    pub include_line_numbers: bool,
}

/// A fixed per-token USD rate used only to produce an order-of-magnitude
/// dashboard estimate; not a billing figure.
const COST_PER_TOKEN_USD: f64 = 0.00000001;

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub backend: &'static str,
    pub original_lines: usize,
    pub kept_lines: usize,
    pub pruned_lines: usize,
    pub pruned_ratio: f64,
    pub tokens_est_before: usize,
    pub tokens_est_after: usize,
    pub elapsed_ms: u64,
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deepinfra_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deepinfra_docs_scored: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deepinfra_docs_total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deepinfra_http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deepinfra_cached: Option<bool>,
    pub tokens_saved_est: usize,
    pub cost_estimated_usd: f64,
}

impl Stats {
    pub fn new(backend: &'static str, original_lines: usize, kept_lines: usize, pruned_lines: usize) -> Self {
        let pruned_ratio = if original_lines > 0 {
            pruned_lines as f64 / original_lines as f64
        } else {
            0.0
        };
        Stats {
            backend,
            original_lines,
            kept_lines,
            pruned_lines,
            pruned_ratio: (pruned_ratio * 1_000_000.0).round() / 1_000_000.0,
            tokens_est_before: 0,
            tokens_est_after: 0,
            elapsed_ms: 0,
            used_fallback: false,
            deepinfra_latency_ms: None,
            deepinfra_docs_scored: None,
            deepinfra_docs_total: None,
            deepinfra_http_status: None,
            deepinfra_cached: None,
            tokens_saved_est: 0,
            cost_estimated_usd: 0.0,
        }
    }

    pub fn finalize_tokens_saved(&mut self) {
        self.tokens_saved_est = self.tokens_est_before.saturating_sub(self.tokens_est_after);
        self.cost_estimated_usd = self.tokens_saved_est as f64 * COST_PER_TOKEN_USD;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PruneTextPayload {
    pub prune_id: String,
    pub pruned_text: String,
    pub annotations: Vec<Annotation>,
    pub stats: Stats,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoverTextPayload {
    pub raw_text: String,
    pub metadata: RecoverMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoverMetadata {
    pub prune_id: String,
    pub ranges: Vec<RecoverRangeOut>,
    pub line_numbering: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoverRangeOut {
    pub start_line: usize,
    pub end_line: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_computes_pruned_ratio() {
        let stats = Stats::new("heuristic", 100, 40, 60);
        assert_eq!(stats.pruned_ratio, 0.6);
    }

    #[test]
    fn finalize_tokens_saved_is_non_negative() {
        let mut stats = Stats::new("heuristic", 10, 10, 0);
        stats.tokens_est_before = 5;
        stats.tokens_est_after = 20;
        stats.finalize_tokens_saved();
        assert_eq!(stats.tokens_saved_est, 0);
    }
}
