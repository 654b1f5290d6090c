//! Metrics & session store adapter (C12): narrow interface the pipeline
//! uses to persist requests/sessions/token metrics. The bundled adapter
//! keeps everything in memory behind an `RwLock` (single writer, many
//! readers) for the lifetime of the process; a durable backend can be
//! swapped in behind the same trait without touching the pipeline.

use std::sync::RwLock;

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    Created,
    Updating,
    Finalized,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metric {
    pub id: String,
    pub session_id: String,
    pub provider: String,
    pub model: String,
    pub request_ts: u64,
    pub finish_ts: Option<u64>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub status: MetricStatus,
    pub error_kind: Option<String>,
}

/// Narrow persistence surface the pipeline (C10) drives. Implementations
/// must serialize writes and allow concurrent readers; a `finalize` call
/// supersedes all prior updates for the same `metric_id`.
pub trait MetricsStore: Send + Sync {
    fn create_metric(&self, metric: Metric);
    fn update_metric_usage(
        &self,
        metric_id: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    );
    fn finalize_metric(&self, metric_id: &str, finish_ts: u64, status: MetricStatus, error_kind: Option<String>);
    fn list_metrics(&self) -> Vec<Metric>;
    fn get_metric(&self, metric_id: &str) -> Option<Metric>;
}

#[derive(Default)]
pub struct InMemoryMetricsStore {
    metrics: RwLock<Vec<Metric>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsStore for InMemoryMetricsStore {
    fn create_metric(&self, metric: Metric) {
        self.metrics.write().expect("metrics lock poisoned").push(metric);
    }

    fn update_metric_usage(
        &self,
        metric_id: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    ) {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        if let Some(metric) = metrics.iter_mut().find(|m| m.id == metric_id) {
            if metric.status == MetricStatus::Finalized {
                return;
            }
            metric.prompt_tokens = prompt_tokens;
            metric.completion_tokens = completion_tokens;
            metric.total_tokens = total_tokens;
            metric.status = MetricStatus::Updating;
        }
    }

    fn finalize_metric(
        &self,
        metric_id: &str,
        finish_ts: u64,
        status: MetricStatus,
        error_kind: Option<String>,
    ) {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        if let Some(metric) = metrics.iter_mut().find(|m| m.id == metric_id) {
            metric.finish_ts = Some(finish_ts);
            metric.status = status;
            metric.error_kind = error_kind;
        }
    }

    fn list_metrics(&self) -> Vec<Metric> {
        self.metrics.read().expect("metrics lock poisoned").clone()
    }

    fn get_metric(&self, metric_id: &str) -> Option<Metric> {
        self.metrics
            .read()
            .expect("metrics lock poisoned")
            .iter()
            .find(|m| m.id == metric_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> Metric {
        Metric {
            id: id.to_string(),
            session_id: "s1".to_string(),
            provider: "kimi".to_string(),
            model: "moonshot-v1-128k".to_string(),
            request_ts: 1,
            finish_ts: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            status: MetricStatus::Created,
            error_kind: None,
        }
    }

    #[test]
    fn finalize_supersedes_later_usage_updates() {
        let store = InMemoryMetricsStore::new();
        store.create_metric(sample("m1"));
        store.finalize_metric("m1", 2, MetricStatus::Finalized, None);
        store.update_metric_usage("m1", 10, 20, 30);

        let metric = store.get_metric("m1").unwrap();
        assert_eq!(metric.status, MetricStatus::Finalized);
        assert_eq!(metric.total_tokens, 0);
    }

    #[test]
    fn usage_update_marks_metric_updating() {
        let store = InMemoryMetricsStore::new();
        store.create_metric(sample("m1"));
        store.update_metric_usage("m1", 5, 5, 10);
        let metric = store.get_metric("m1").unwrap();
        assert_eq!(metric.status, MetricStatus::Updating);
        assert_eq!(metric.total_tokens, 10);
    }
}
