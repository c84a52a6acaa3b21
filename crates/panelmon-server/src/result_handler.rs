use chrono::Utc;
use panelmon_alert::context::EvalContext;
use panelmon_common::metrics::AlertingMetrics;
use panelmon_common::types::{Alert, AlertState, SetAlertStateCommand, Severity};
use panelmon_notify::dispatcher::NotificationDispatcher;
use panelmon_storage::AlertStore;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;

/// What one evaluation does to its alert.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: AlertState,
    pub severity: Severity,
    pub error: String,
    pub eval_data: Option<Value>,
    pub notify: bool,
}

impl Transition {
    /// Maps an evaluation outcome onto the alert state model.
    ///
    /// Errors win over firing. A firing rule takes the state of its
    /// configured severity; a quiet one goes back to `ok`.
    pub fn from_context(context: &EvalContext) -> Self {
        let severity = context.rule.severity;

        if let Some(err) = &context.error {
            return Self {
                state: AlertState::ExecutionError,
                severity,
                error: err.to_string(),
                eval_data: None,
                notify: false,
            };
        }

        let eval_data = if context.eval_matches.is_empty() {
            None
        } else {
            serde_json::to_value(&context.eval_matches).ok()
        };

        if context.firing {
            Self {
                state: severity.firing_state(),
                severity,
                error: String::new(),
                eval_data,
                notify: true,
            }
        } else {
            Self {
                state: AlertState::Ok,
                severity: Severity::Ok,
                error: String::new(),
                eval_data,
                notify: false,
            }
        }
    }
}

/// Persists evaluation results and triggers notifications for firing ones.
pub struct ResultHandler {
    store: Arc<dyn AlertStore>,
    dispatcher: Arc<NotificationDispatcher>,
    metrics: AlertingMetrics,
}

impl ResultHandler {
    pub fn new(
        store: Arc<dyn AlertStore>,
        dispatcher: Arc<NotificationDispatcher>,
        metrics: AlertingMetrics,
    ) -> Self {
        Self {
            store,
            dispatcher,
            metrics,
        }
    }

    /// Applies `context` to `alert`.
    ///
    /// Notifications go out only after the new state is stored; a failed
    /// write is returned and nothing is dispatched.
    pub async fn handle(&self, alert: &Alert, context: &EvalContext) -> Result<Alert> {
        let transition = Transition::from_context(context);

        if context.error.is_none() && !context.firing {
            self.metrics.inc_result(Severity::Ok);
        }

        let cmd = SetAlertStateCommand {
            alert_id: alert.id,
            org_id: alert.org_id,
            state: transition.state,
            severity: transition.severity,
            error: transition.error.clone(),
            eval_data: transition.eval_data.clone(),
            timestamp: context.end_time.unwrap_or_else(Utc::now),
        };
        let updated = self.store.set_alert_state(&cmd).await.map_err(|e| {
            tracing::error!(alert_id = alert.id, error = %e, "Failed to save alert state");
            e
        })?;

        if alert.should_update_state(transition.state) {
            tracing::info!(
                alert_id = alert.id,
                from = %alert.state,
                to = %transition.state,
                error = %transition.error,
                "Alert state changed"
            );
        }

        if transition.notify {
            let message = notification_message(&updated);
            let report = self.dispatcher.dispatch(transition.severity, &message).await;
            if !report.all_sent() {
                tracing::warn!(
                    alert_id = alert.id,
                    failed = report.failed.len(),
                    sent = report.sent.len(),
                    "Some notifications were not delivered"
                );
            }
        }

        Ok(updated)
    }
}

fn notification_message(alert: &Alert) -> String {
    if alert.message.is_empty() {
        format!("[{}] {}", alert.state, alert.name)
    } else {
        format!("[{}] {}: {}", alert.state, alert.name, alert.message)
    }
}
