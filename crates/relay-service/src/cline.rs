//! Cline usage polling (C14): periodically compares a latest-timestamp
//! watermark from an allowlisted ledger file and broadcasts on change.
//! Ledger access is allowlisted: the configured path must resolve, after
//! canonicalization, to exactly the configured canonical path — symlinks
//! are refused.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use crate::ws::{WsHub, now_unix_millis};

#[derive(Debug)]
pub enum ClineLedgerError {
    NotAllowlisted,
    Io(String),
}

/// Verifies `configured_path` is not a symlink and canonicalizes to exactly
/// `allowed_canonical` before any read is attempted.
pub fn check_allowlisted(configured_path: &Path, allowed_canonical: &Path) -> Result<PathBuf, ClineLedgerError> {
    let metadata = std::fs::symlink_metadata(configured_path)
        .map_err(|e| ClineLedgerError::Io(e.to_string()))?;
    if metadata.file_type().is_symlink() {
        return Err(ClineLedgerError::NotAllowlisted);
    }
    let canonical =
        std::fs::canonicalize(configured_path).map_err(|e| ClineLedgerError::Io(e.to_string()))?;
    if canonical != allowed_canonical {
        return Err(ClineLedgerError::NotAllowlisted);
    }
    Ok(canonical)
}

/// Reads one JSON object per line, returning rows whose `ts` field is
/// strictly greater than `after_ts`, plus the newest `ts` seen overall.
pub fn read_rows_after(path: &Path, after_ts: u64) -> Result<(Vec<Value>, u64), ClineLedgerError> {
    let file = std::fs::File::open(path).map_err(|e| ClineLedgerError::Io(e.to_string()))?;
    let reader = BufReader::new(file);

    let mut latest_ts = after_ts;
    let mut new_rows = Vec::new();

    for line in reader.lines() {
        let line = line.map_err(|e| ClineLedgerError::Io(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(row) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let Some(ts) = row.get("ts").and_then(Value::as_u64) else {
            continue;
        };
        latest_ts = latest_ts.max(ts);
        if ts > after_ts {
            new_rows.push(row);
        }
    }

    Ok((new_rows, latest_ts))
}

/// Runs until cancelled: every `interval`, re-reads the ledger and
/// broadcasts `cline_usage_updated` if the watermark advanced.
pub async fn poll_cline_ledger(
    hub: &WsHub,
    ledger_path: &Path,
    allowed_canonical: &Path,
    watermark: &AtomicU64,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        let canonical = match check_allowlisted(ledger_path, allowed_canonical) {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!(path = %ledger_path.display(), "cline ledger path is not allowlisted, skipping poll");
                continue;
            }
        };

        let after_ts = watermark.load(Ordering::SeqCst);
        match read_rows_after(&canonical, after_ts) {
            Ok((rows, latest_ts)) if latest_ts > after_ts => {
                watermark.store(latest_ts, Ordering::SeqCst);
                hub.broadcast(
                    json!({
                        "type": "cline_usage_updated",
                        "latest_ts": latest_ts,
                        "imported_count": rows.len(),
                    }),
                    now_unix_millis(),
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = ?e, "failed to read cline ledger");
            }
        }
    }
}
