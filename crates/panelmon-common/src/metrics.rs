//! Injectable metrics registry.
//!
//! The alerting core only writes metrics. [`MetricsSink`] is the seam to
//! whatever telemetry backend the process uses; [`AlertingMetrics`] names
//! the series the core records and is built once at startup, then shared.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::types::Severity;

pub const ALERTING_RESULT: &str = "alerting.result";
pub const ALERTING_ACTIVE_ALERTS: &str = "alerting.active_alerts";
pub const ALERTING_NOTIFICATIONS_SENT: &str = "alerting.notifications_sent";
pub const ALERTING_EXECUTION_TIME: &str = "alerting.execution_time";

/// Backend receiving counter increments and duration samples.
pub trait MetricsSink: Send + Sync {
    fn inc_counter(&self, name: &str, labels: &[(&str, &str)]);

    fn record_duration(&self, name: &str, elapsed: Duration);
}

/// The alerting series, bound to one sink.
#[derive(Clone)]
pub struct AlertingMetrics {
    sink: Arc<dyn MetricsSink>,
}

impl AlertingMetrics {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    pub fn inc_result(&self, severity: Severity) {
        self.sink
            .inc_counter(ALERTING_RESULT, &[("severity", severity.as_str())]);
    }

    pub fn inc_active_alerts(&self) {
        self.sink.inc_counter(ALERTING_ACTIVE_ALERTS, &[]);
    }

    pub fn inc_notification_sent(&self, channel_type: &str) {
        self.sink
            .inc_counter(ALERTING_NOTIFICATIONS_SENT, &[("type", channel_type)]);
    }

    pub fn record_execution_time(&self, elapsed: Duration) {
        self.sink.record_duration(ALERTING_EXECUTION_TIME, elapsed);
    }
}

impl std::fmt::Debug for AlertingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertingMetrics").finish_non_exhaustive()
    }
}

/// Running aggregate of one duration series.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DurationStats {
    pub count: u64,
    pub sum: Duration,
    pub max: Duration,
}

impl DurationStats {
    fn observe(&mut self, elapsed: Duration) {
        self.count += 1;
        self.sum += elapsed;
        self.max = self.max.max(elapsed);
    }
}

/// In-process sink keeping counters and duration aggregates in memory.
/// Memory is bounded by the number of distinct series, not by samples.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use panelmon_common::metrics::{AlertingMetrics, MemoryMetrics, ALERTING_RESULT};
/// use panelmon_common::types::Severity;
///
/// let sink = Arc::new(MemoryMetrics::default());
/// let metrics = AlertingMetrics::new(sink.clone());
/// metrics.inc_result(Severity::Critical);
/// assert_eq!(sink.counter(ALERTING_RESULT, &[("severity", "critical")]), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    counters: Mutex<HashMap<String, u64>>,
    durations: Mutex<HashMap<String, DurationStats>>,
}

impl MemoryMetrics {
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.get(&series_key(name, labels)).copied().unwrap_or(0)
    }

    pub fn durations(&self, name: &str) -> DurationStats {
        let durations = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
        durations.get(name).copied().unwrap_or_default()
    }

    /// All counters keyed as `name{label=value,...}`.
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MetricsSink for MemoryMetrics {
    fn inc_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        *counters.entry(series_key(name, labels)).or_insert(0) += 1;
    }

    fn record_duration(&self, name: &str, elapsed: Duration) {
        let mut durations = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
        durations.entry(name.to_string()).or_default().observe(elapsed);
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn inc_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}

    fn record_duration(&self, _name: &str, _elapsed: Duration) {}
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut pairs: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    format!("{name}{{{}}}", pairs.join(","))
}
