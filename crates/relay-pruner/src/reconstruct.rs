//! Shared reconstruction logic for both the heuristic and DeepInfra
//! backends: turns a kept-line set into `pruned_text` plus annotation
//! records, in the canonical marker format.

use std::collections::BTreeSet;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Annotation {
    pub kind: &'static str,
    pub original_start_line: usize,
    pub original_end_line: usize,
    pub pruned_line_count: usize,
    pub reason: String,
    pub marker: String,
}

/// First distinct 4+-char alphanumeric token of the lower-cased goal hint.
pub fn first_goal_keyword(goal_hint: &str) -> Option<String> {
    let lower = goal_hint.to_lowercase();
    let mut token = String::new();
    for ch in lower.chars().chain(std::iter::once(' ')) {
        if ch.is_alphanumeric() || ch == '_' {
            token.push(ch);
        } else {
            if token.chars().count() >= 4 {
                return Some(token);
            }
            token.clear();
        }
    }
    None
}

pub fn prune_reason(goal_hint: &str) -> String {
    match first_goal_keyword(goal_hint) {
        Some(keyword) => format!("hors focus: {keyword}"),
        None => "hors focus".to_string(),
    }
}

fn marker_text(prune_id: &str, start_line: usize, end_line: usize, count: usize, reason: &str) -> String {
    format!("⟦PRUNÉ: prune_id={prune_id} lignes {start_line}-{end_line} ({count}) raison={reason}⟧")
}

/// Emits contiguous kept-line runs in original order, with a single marker
/// line (never annotated) for each maximal pruned run.
pub fn reconstruct(
    lines: &[&str],
    keep: &BTreeSet<usize>,
    prune_id: &str,
    reason: &str,
    annotate_lines: bool,
    include_markers: bool,
) -> (String, Vec<Annotation>) {
    let n = lines.len();
    let mut out_lines: Vec<String> = Vec::new();
    let mut annotations: Vec<Annotation> = Vec::new();

    if keep.is_empty() {
        if n > 0 {
            emit_pruned_block(0, n - 1, prune_id, reason, include_markers, &mut out_lines, &mut annotations);
        }
        return (out_lines.join("\n"), annotations);
    }

    let mut last_kept: isize = -1;
    for &k in keep {
        if k as isize > last_kept + 1 {
            emit_pruned_block(
                (last_kept + 1) as usize,
                k - 1,
                prune_id,
                reason,
                include_markers,
                &mut out_lines,
                &mut annotations,
            );
        }
        if annotate_lines {
            out_lines.push(format!("{}│ {}", k + 1, lines[k]));
        } else {
            out_lines.push(lines[k].to_string());
        }
        last_kept = k as isize;
    }
    if (last_kept as usize) < n.saturating_sub(1) {
        emit_pruned_block(
            (last_kept + 1) as usize,
            n - 1,
            prune_id,
            reason,
            include_markers,
            &mut out_lines,
            &mut annotations,
        );
    }

    (out_lines.join("\n"), annotations)
}

#[allow(clippy::too_many_arguments)]
fn emit_pruned_block(
    start_idx: usize,
    end_idx: usize,
    prune_id: &str,
    reason: &str,
    include_markers: bool,
    out: &mut Vec<String>,
    annotations: &mut Vec<Annotation>,
) {
    let count = end_idx - start_idx + 1;
    let marker = marker_text(prune_id, start_idx + 1, end_idx + 1, count, reason);
    annotations.push(Annotation {
        kind: "pruned_block",
        original_start_line: start_idx + 1,
        original_end_line: end_idx + 1,
        pruned_line_count: count,
        reason: reason.to_string(),
        marker: marker.clone(),
    });
    if include_markers {
        out.push(marker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_all_lines_when_keep_set_is_full() {
        let lines = vec!["a", "b", "c"];
        let keep: BTreeSet<usize> = (0..3).collect();
        let (text, annotations) = reconstruct(&lines, &keep, "prn_1", "hors focus", false, true);
        assert_eq!(text, "a\nb\nc");
        assert!(annotations.is_empty());
    }

    #[test]
    fn emits_one_marker_for_a_middle_gap() {
        let lines = vec!["a", "b", "c", "d", "e"];
        let keep: BTreeSet<usize> = [0, 4].into_iter().collect();
        let (text, annotations) = reconstruct(&lines, &keep, "prn_1", "hors focus", false, true);
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].original_start_line, 2);
        assert_eq!(annotations[0].original_end_line, 4);
        assert!(text.contains("⟦PRUNÉ: prune_id=prn_1 lignes 2-4 (3) raison=hors focus⟧"));
    }

    #[test]
    fn annotate_lines_prefixes_kept_lines_only() {
        let lines = vec!["a", "b"];
        let keep: BTreeSet<usize> = [0].into_iter().collect();
        let (text, _annotations) = reconstruct(&lines, &keep, "prn_1", "hors focus", true, true);
        assert!(text.starts_with("1│ a"));
        assert!(!text.contains("2│"));
    }

    #[test]
    fn first_goal_keyword_skips_tokens_under_four_chars() {
        assert_eq!(first_goal_keyword("fix the bug"), None);
    }

    #[test]
    fn first_goal_keyword_finds_first_four_char_token() {
        assert_eq!(first_goal_keyword("fix the flaky retry test"), Some("flaky".to_string()));
    }

    #[test]
    fn empty_keep_set_prunes_everything() {
        let lines = vec!["a", "b"];
        let keep = BTreeSet::new();
        let (text, annotations) = reconstruct(&lines, &keep, "prn_1", "hors focus", false, true);
        assert_eq!(annotations.len(), 1);
        assert!(text.contains("lignes 1-2"));
    }
}
