//! Heuristic pruning backend: head/tail retention, structural and
//! goal-keyword line matching, no network calls.

use std::collections::BTreeSet;
use std::time::Instant;

use relay_core::tokens::count_text;

use crate::reconstruct::{Annotation, prune_reason, reconstruct};
use crate::types::{SourceType, Stats};

const HEAD_TAIL_LINES: usize = 30;

/// 4+ char alnum/underscore tokens, lower-cased, deduped, capped at 8.
fn parse_goal_keywords(goal_hint: &str) -> Vec<String> {
    let lower = goal_hint.to_lowercase();
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in lower.chars().chain(std::iter::once(' ')) {
        if ch.is_alphanumeric() || ch == '_' {
            current.push(ch);
        } else {
            if current.chars().count() >= 4 && !tokens.contains(&current) {
                tokens.push(current.clone());
            }
            current.clear();
            if tokens.len() >= 8 {
                break;
            }
        }
    }
    tokens
}

fn is_structural_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("def ")
        || trimmed.starts_with("class ")
        || trimmed.starts_with("import ")
        || (trimmed.starts_with("from ") && trimmed.contains(" import "))
}

#[allow(clippy::too_many_arguments)]
pub fn baseline_prune(
    prune_id: &str,
    text: &str,
    goal_hint: &str,
    source_type: SourceType,
    max_prune_ratio: f64,
    min_keep_lines: usize,
    annotate_lines: bool,
    include_markers: bool,
) -> (String, Vec<Annotation>, Stats) {
    let started = Instant::now();
    let lines: Vec<&str> = text.lines().collect();

    if lines.is_empty() {
        let stats = Stats::new("heuristic", 0, 0, 0);
        return (String::new(), Vec::new(), stats);
    }

    let keywords = parse_goal_keywords(goal_hint);
    let mut keep: BTreeSet<usize> = BTreeSet::new();

    let head = HEAD_TAIL_LINES.min(lines.len());
    let tail = HEAD_TAIL_LINES.min(lines.len());
    keep.extend(0..head);
    keep.extend(lines.len().saturating_sub(tail)..lines.len());

    for (idx, line) in lines.iter().enumerate() {
        if is_structural_line(line) {
            keep.insert(idx);
            continue;
        }
        let low = line.to_lowercase();
        if keywords.iter().any(|k| low.contains(k.as_str())) {
            keep.insert(idx);
            continue;
        }
        if source_type == SourceType::Logs
            && (low.contains("error") || low.contains("exception") || low.contains("traceback"))
        {
            keep.insert(idx);
        }
    }

    let min_keep_lines = min_keep_lines.min(lines.len());
    if keep.len() < min_keep_lines {
        for idx in 0..lines.len() {
            keep.insert(idx);
            if keep.len() >= min_keep_lines {
                break;
            }
        }
    }

    let ratio = max_prune_ratio.clamp(0.0, 1.0);
    let min_keep_by_ratio = ((lines.len() as f64) * (1.0 - ratio)).ceil() as usize;
    if keep.len() < min_keep_by_ratio {
        for idx in 0..lines.len() {
            keep.insert(idx);
            if keep.len() >= min_keep_by_ratio {
                break;
            }
        }
    }

    let reason = prune_reason(goal_hint);
    let (pruned_text, annotations) = reconstruct(&lines, &keep, prune_id, &reason, annotate_lines, include_markers);

    let kept_lines = keep.len();
    let pruned_lines = lines.len() - kept_lines;
    let mut stats = Stats::new("heuristic", lines.len(), kept_lines, pruned_lines);
    stats.tokens_est_before = count_text(text);
    stats.tokens_est_after = count_text(&pruned_text);
    stats.finalize_tokens_saved();
    stats.elapsed_ms = started.elapsed().as_millis() as u64;

    (pruned_text, annotations, stats)
}
