//! Process-wide metrics backend.
//!
//! The binary records alerting series through the `metrics` facade and can
//! expose them on a Prometheus scrape endpoint.

use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;
use panelmon_common::metrics::MetricsSink;
use std::net::SocketAddr;
use std::time::Duration;

/// Forwards every series to the installed `metrics` recorder. Without a
/// recorder the calls are no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl MetricsSink for RecorderMetrics {
    fn inc_counter(&self, name: &str, labels: &[(&str, &str)]) {
        metrics::counter!(name.to_owned(), to_labels(labels)).increment(1);
    }

    fn record_duration(&self, name: &str, elapsed: Duration) {
        metrics::histogram!(name.to_owned()).record(elapsed.as_secs_f64());
    }
}

fn to_labels(labels: &[(&str, &str)]) -> Vec<Label> {
    labels
        .iter()
        .map(|(k, v)| Label::new(k.to_string(), v.to_string()))
        .collect()
}

/// Installs the Prometheus recorder with its own HTTP listener on `listen`.
/// Must run inside the tokio runtime.
pub fn install_prometheus(listen: &str) -> anyhow::Result<SocketAddr> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics listen address '{}': {}", listen, e))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter on {}: {}", addr, e))?;
    Ok(addr)
}
