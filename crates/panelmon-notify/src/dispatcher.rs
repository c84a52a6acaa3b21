use panelmon_common::metrics::AlertingMetrics;
use panelmon_common::types::Severity;

use crate::NotificationChannel;

/// Outcome of one dispatch across all channels.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Names of the channels that accepted the notification.
    pub sent: Vec<String>,
    /// `(channel name, error text)` for every failed delivery.
    pub failed: Vec<(String, String)>,
}

impl DispatchReport {
    pub fn all_sent(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fans a firing notification out to every configured channel.
///
/// Channels are attempted one after another in configuration order. A
/// failing channel is logged and skipped; it never prevents delivery on the
/// others and is not retried.
pub struct NotificationDispatcher {
    channels: Vec<Box<dyn NotificationChannel>>,
    metrics: AlertingMetrics,
}

impl NotificationDispatcher {
    pub fn new(channels: Vec<Box<dyn NotificationChannel>>, metrics: AlertingMetrics) -> Self {
        Self { channels, metrics }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub async fn dispatch(&self, severity: Severity, message: &str) -> DispatchReport {
        self.metrics.inc_result(severity);

        let mut report = DispatchReport::default();
        for channel in &self.channels {
            match channel.send(severity, message).await {
                Ok(()) => {
                    self.metrics.inc_notification_sent(channel.channel_type());
                    report.sent.push(channel.name().to_string());
                }
                Err(e) => {
                    tracing::error!(
                        channel = channel.name(),
                        channel_type = channel.channel_type(),
                        error = %e,
                        "Failed to send notification"
                    );
                    report.failed.push((channel.name().to_string(), e.to_string()));
                }
            }
        }

        report
    }
}
