use panelmon_common::metrics::AlertingMetrics;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::context::EvalContext;
use crate::error::EvalError;

/// Default bound on one rule's evaluation.
pub const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs a rule's condition chain under a hard timeout.
///
/// The chain runs as its own task. When the timeout wins the race the task
/// is told to stop at its next await point and is never awaited; the caller
/// gets control back at the timeout boundary regardless.
pub struct EvalHandler {
    timeout: Duration,
    metrics: AlertingMetrics,
}

impl EvalHandler {
    pub fn new(metrics: AlertingMetrics) -> Self {
        Self {
            timeout: DEFAULT_EVAL_TIMEOUT,
            metrics,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Evaluates `context.rule` and writes the outcome into `context`.
    ///
    /// Returns when the chain completes or the timeout elapses, whichever
    /// comes first. On timeout only `error` and `end_time` are touched.
    pub async fn eval(&self, context: &mut EvalContext) {
        let (done_tx, done_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        tokio::spawn(eval_chain(
            context.clone(),
            cancel.clone(),
            self.metrics.clone(),
            done_tx,
        ));

        match tokio::time::timeout(self.timeout, done_rx).await {
            Ok(Ok(finished)) => {
                *context = finished;
                tracing::debug!(
                    alert_id = context.rule.id,
                    time_ms = context.duration_ms().unwrap_or_default(),
                    firing = context.firing,
                    "Job execution done"
                );
            }
            Ok(Err(_)) => {
                context.error = Some(EvalError::Aborted);
                context.finish();
                tracing::warn!(alert_id = context.rule.id, "Job execution aborted");
            }
            Err(_) => {
                cancel.cancel();
                context.error = Some(EvalError::Timeout);
                context.finish();
                tracing::debug!(
                    alert_id = context.rule.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Job execution timeout"
                );
            }
        }
    }
}

/// Evaluates the condition chain in order with AND short-circuit.
///
/// Always finishes by stamping `end_time`, recording the execution time and
/// offering the context on `done`. The send never blocks; it simply fails if
/// the handler already gave up waiting.
async fn eval_chain(
    mut context: EvalContext,
    cancel: CancellationToken,
    metrics: AlertingMetrics,
    done: oneshot::Sender<EvalContext>,
) {
    let rule = context.rule.clone();

    for condition in &rule.conditions {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = condition.evaluate(&mut context) => Some(outcome),
        };

        let Some(outcome) = outcome else {
            context.error = Some(EvalError::Timeout);
            break;
        };

        match outcome {
            Err(e) => {
                context.error = Some(EvalError::Condition(e.to_string()));
                break;
            }
            Ok(firing) => {
                context.firing = firing;
                if !firing {
                    break;
                }
            }
        }
    }

    context.finish();
    metrics.record_execution_time(context.elapsed());

    if done.send(context).is_err() {
        tracing::debug!(alert_id = rule.id, "Discarding result of abandoned evaluation");
    }
}
