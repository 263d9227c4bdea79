//! Per-extension metrics collection.
//!
//! The registry owns one collector and records every routed request and every
//! hook execution against the owning extension. Latency percentiles are
//! computed from a bounded window of recent samples, sorted at read time, so
//! p99 never reads below p95. Snapshots copy out; callers never hold a
//! reference into collector state.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// How many latency samples feed the percentile window.
const LATENCY_WINDOW: usize = 512;

/// Snapshot of one extension's metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionMetrics {
    pub requests: u64,
    pub errors: u64,
    pub hooks_executed: u64,
    pub hooks_failed: u64,
    pub average_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub memory_mb: u64,
    pub worker_count: u64,
    pub db_connections: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
}

impl Default for ExtensionMetrics {
    fn default() -> Self {
        Self {
            requests: 0,
            errors: 0,
            hooks_executed: 0,
            hooks_failed: 0,
            average_latency_ms: 0.0,
            p95_latency_ms: 0.0,
            p99_latency_ms: 0.0,
            memory_mb: 0,
            worker_count: 0,
            db_connections: 0,
            last_activity: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Default)]
struct MetricsRecord {
    requests: u64,
    errors: u64,
    hooks_executed: u64,
    hooks_failed: u64,
    total_latency_ms: f64,
    latency_window: VecDeque<u64>,
    memory_mb: u64,
    worker_count: u64,
    db_connections: u64,
    last_activity: Option<DateTime<Utc>>,
    last_error: Option<DateTime<Utc>>,
}

impl MetricsRecord {
    fn push_latency(&mut self, latency_ms: u64) {
        if self.latency_window.len() == LATENCY_WINDOW {
            self.latency_window.pop_front();
        }
        self.latency_window.push_back(latency_ms);
    }

    fn snapshot(&self) -> ExtensionMetrics {
        let mut sorted: Vec<u64> = self.latency_window.iter().copied().collect();
        sorted.sort_unstable();
        let percentile = |q: f64| -> f64 {
            if sorted.is_empty() {
                return 0.0;
            }
            let idx = ((sorted.len() as f64 * q) as usize).min(sorted.len() - 1);
            sorted[idx] as f64
        };

        let average = if self.requests > 0 {
            self.total_latency_ms / self.requests as f64
        } else {
            0.0
        };

        ExtensionMetrics {
            requests: self.requests,
            errors: self.errors,
            hooks_executed: self.hooks_executed,
            hooks_failed: self.hooks_failed,
            average_latency_ms: average,
            p95_latency_ms: percentile(0.95),
            p99_latency_ms: percentile(0.99),
            memory_mb: self.memory_mb,
            worker_count: self.worker_count,
            db_connections: self.db_connections,
            last_activity: self.last_activity,
            last_error: self.last_error,
        }
    }
}

/// The host-wide collector, keyed by extension name.
#[derive(Default)]
pub struct MetricsCollector {
    records: DashMap<String, Mutex<MetricsRecord>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a record exists for the extension (called at registration so
    /// snapshots are available before the first request).
    pub fn ensure(&self, extension: &str) {
        self.records
            .entry(extension.to_string())
            .or_insert_with(|| Mutex::new(MetricsRecord::default()));
    }

    /// Record one routed request.
    pub fn record_request(
        &self,
        extension: &str,
        method: &str,
        path: &str,
        duration: Duration,
        error: Option<&str>,
    ) {
        let latency_ms = duration.as_millis() as u64;
        let entry = self
            .records
            .entry(extension.to_string())
            .or_insert_with(|| Mutex::new(MetricsRecord::default()));
        let mut record = entry.lock().unwrap();
        record.requests += 1;
        record.total_latency_ms += latency_ms as f64;
        record.push_latency(latency_ms);
        record.last_activity = Some(Utc::now());
        if let Some(error) = error {
            record.errors += 1;
            record.last_error = Some(Utc::now());
            tracing::debug!(
                extension = %extension,
                method = %method,
                path = %path,
                latency_ms,
                error = %error,
                "request recorded with error"
            );
        }
    }

    /// Record one hook execution.
    pub fn record_hook(
        &self,
        extension: &str,
        hook: &str,
        duration: Duration,
        error: Option<&str>,
    ) {
        let entry = self
            .records
            .entry(extension.to_string())
            .or_insert_with(|| Mutex::new(MetricsRecord::default()));
        let mut record = entry.lock().unwrap();
        record.hooks_executed += 1;
        record.last_activity = Some(Utc::now());
        if let Some(error) = error {
            record.hooks_failed += 1;
            record.last_error = Some(Utc::now());
            tracing::debug!(
                extension = %extension,
                hook = %hook,
                latency_ms = duration.as_millis() as u64,
                error = %error,
                "hook recorded with error"
            );
        }
    }

    /// Update resource-usage gauges.
    pub fn set_gauges(&self, extension: &str, memory_mb: u64, workers: u64, db_conns: u64) {
        let entry = self
            .records
            .entry(extension.to_string())
            .or_insert_with(|| Mutex::new(MetricsRecord::default()));
        let mut record = entry.lock().unwrap();
        record.memory_mb = memory_mb;
        record.worker_count = workers;
        record.db_connections = db_conns;
    }

    /// Snapshot for one extension.
    pub fn snapshot(&self, extension: &str) -> Option<ExtensionMetrics> {
        self.records
            .get(extension)
            .map(|record| record.lock().unwrap().snapshot())
    }

    /// Snapshot for every extension.
    pub fn all(&self) -> HashMap<String, ExtensionMetrics> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().lock().unwrap().snapshot()))
            .collect()
    }

    pub fn remove(&self, extension: &str) {
        self.records.remove(extension);
    }

    /// Prometheus text exposition of every extension's counters and
    /// latency aggregates.
    pub fn prometheus(&self) -> String {
        let mut out = String::new();
        let mut extensions: Vec<(String, ExtensionMetrics)> = self.all().into_iter().collect();
        extensions.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, m) in extensions {
            out.push_str(&format!(
                "modulith_extension_requests_total{{extension=\"{name}\"}} {}\n",
                m.requests
            ));
            out.push_str(&format!(
                "modulith_extension_errors_total{{extension=\"{name}\"}} {}\n",
                m.errors
            ));
            out.push_str(&format!(
                "modulith_extension_hooks_executed_total{{extension=\"{name}\"}} {}\n",
                m.hooks_executed
            ));
            out.push_str(&format!(
                "modulith_extension_hooks_failed_total{{extension=\"{name}\"}} {}\n",
                m.hooks_failed
            ));
            out.push_str(&format!(
                "modulith_extension_latency_avg_ms{{extension=\"{name}\"}} {}\n",
                m.average_latency_ms
            ));
            out.push_str(&format!(
                "modulith_extension_latency_p95_ms{{extension=\"{name}\"}} {}\n",
                m.p95_latency_ms
            ));
            out.push_str(&format!(
                "modulith_extension_latency_p99_ms{{extension=\"{name}\"}} {}\n",
                m.p99_latency_ms
            ));
        }
        out
    }
}
