//! Metrics
//!
//! Client metrics collection interfaces and implementations.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Metric labels.
pub type MetricLabels = HashMap<String, String>;

/// Client metrics interface.
pub trait ClientMetrics: Send + Sync {
    /// Record a token endpoint call.
    fn record_token_request(&self, grant_type: &str, success: bool);

    /// Record a reactive token refresh.
    fn record_token_refresh(&self, success: bool);

    /// Record a retry of a domain request.
    fn record_retry(&self, method: &str, status: Option<u16>);

    /// Record the duration of a domain request, retries included.
    fn record_request_duration(&self, method: &str, status: Option<u16>, duration_ms: f64);

    /// Record a failed domain request.
    fn record_error(&self, error_code: &str);
}

/// No-op metrics implementation.
pub struct NoOpMetrics;

impl ClientMetrics for NoOpMetrics {
    fn record_token_request(&self, _grant_type: &str, _success: bool) {}
    fn record_token_refresh(&self, _success: bool) {}
    fn record_retry(&self, _method: &str, _status: Option<u16>) {}
    fn record_request_duration(&self, _method: &str, _status: Option<u16>, _duration_ms: f64) {}
    fn record_error(&self, _error_code: &str) {}
}

/// Shared no-op metrics.
pub fn no_op_metrics() -> Arc<dyn ClientMetrics> {
    Arc::new(NoOpMetrics)
}

/// Metric entry for in-memory storage.
#[derive(Debug, Clone)]
pub struct MetricEntry {
    pub name: String,
    pub value: f64,
    pub labels: MetricLabels,
    pub timestamp: u64,
}

/// In-memory metrics for testing.
#[derive(Default)]
pub struct InMemoryMetrics {
    entries: Mutex<Vec<MetricEntry>>,
}

impl InMemoryMetrics {
    /// Create new in-memory metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded entries.
    pub fn get_entries(&self) -> Vec<MetricEntry> {
        self.entries.lock().clone()
    }

    /// Get entries by name.
    pub fn get_entries_by_name(&self, name: &str) -> Vec<MetricEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    /// Count entries by name.
    pub fn count(&self, name: &str) -> usize {
        self.entries.lock().iter().filter(|e| e.name == name).count()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn record(&self, name: &str, value: f64, labels: &[(&str, String)]) {
        let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        self.entries.lock().push(MetricEntry {
            name: name.to_string(),
            value,
            labels,
            timestamp,
        });
    }
}

fn status_label(status: Option<u16>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl ClientMetrics for InMemoryMetrics {
    fn record_token_request(&self, grant_type: &str, success: bool) {
        self.record(
            "sharedo_token_requests_total",
            1.0,
            &[
                ("grant_type", grant_type.to_string()),
                ("success", success.to_string()),
            ],
        );
    }

    fn record_token_refresh(&self, success: bool) {
        self.record(
            "sharedo_token_refreshes_total",
            1.0,
            &[("success", success.to_string())],
        );
    }

    fn record_retry(&self, method: &str, status: Option<u16>) {
        self.record(
            "sharedo_request_retries_total",
            1.0,
            &[("method", method.to_string()), ("status", status_label(status))],
        );
    }

    fn record_request_duration(&self, method: &str, status: Option<u16>, duration_ms: f64) {
        self.record(
            "sharedo_request_duration_ms",
            duration_ms,
            &[("method", method.to_string()), ("status", status_label(status))],
        );
    }

    fn record_error(&self, error_code: &str) {
        self.record(
            "sharedo_errors_total",
            1.0,
            &[("error_code", error_code.to_string())],
        );
    }
}

/// Create in-memory metrics for testing.
pub fn create_in_memory_metrics() -> Arc<InMemoryMetrics> {
    Arc::new(InMemoryMetrics::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_op_metrics() {
        let metrics = no_op_metrics();
        metrics.record_token_request("Impersonate.Specified", true);
        metrics.record_retry("GET", Some(503));
        metrics.record_error("SHAREDO_SERVER");
    }

    #[test]
    fn test_in_memory_metrics() {
        let metrics = InMemoryMetrics::new();

        metrics.record_token_request("Impersonate.Specified", true);
        metrics.record_retry("GET", Some(429));
        metrics.record_retry("GET", None);

        assert_eq!(metrics.get_entries().len(), 3);
        assert_eq!(metrics.count("sharedo_request_retries_total"), 2);

        let token_entries = metrics.get_entries_by_name("sharedo_token_requests_total");
        assert_eq!(
            token_entries[0].labels.get("grant_type"),
            Some(&"Impersonate.Specified".to_string())
        );

        let retries = metrics.get_entries_by_name("sharedo_request_retries_total");
        assert_eq!(retries[1].labels.get("status"), Some(&"none".to_string()));

        metrics.clear();
        assert!(metrics.get_entries().is_empty());
    }
}
