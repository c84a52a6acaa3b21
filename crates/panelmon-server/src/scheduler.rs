use chrono::{DateTime, Utc};
use panelmon_alert::context::EvalContext;
use panelmon_alert::error::EvalError;
use panelmon_alert::eval_handler::EvalHandler;
use panelmon_alert::registry::ConditionRegistry;
use panelmon_alert::rule::AlertRule;
use panelmon_common::cluster::AlertingClusterInfo;
use panelmon_common::metrics::AlertingMetrics;
use panelmon_common::types::{Alert, HeartBeatCommand};
use panelmon_storage::{AlertStore, HeartbeatStore};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::result_handler::ResultHandler;

/// Fallback evaluation frequency for rules without a usable one.
pub const DEFAULT_FREQUENCY_SECS: i64 = 60;

/// Whether a rule with `frequency` seconds is due on the tick at `now`.
pub fn is_due(frequency: i64, now: DateTime<Utc>) -> bool {
    let second = now.timestamp();
    is_due_between(frequency, second, second)
}

/// Whether any second in `from..=to` (unix seconds) is a due second for a
/// rule with `frequency` seconds.
pub fn is_due_between(frequency: i64, from: i64, to: i64) -> bool {
    let frequency = if frequency > 0 {
        frequency
    } else {
        DEFAULT_FREQUENCY_SECS
    };
    from <= to && to.div_euclid(frequency) * frequency >= from
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub server_id: String,
    pub tick: Duration,
    pub heartbeat_liveness: Duration,
}

/// The tick-driven alerting loop.
///
/// Every tick refreshes this server's heartbeat, works out which rules this
/// server owns and spawns one evaluation task per owned, active, due rule.
/// Evaluations of different rules never wait on each other.
pub struct Engine {
    alerts: Arc<dyn AlertStore>,
    heartbeats: Arc<dyn HeartbeatStore>,
    conditions: Arc<ConditionRegistry>,
    eval_handler: Arc<EvalHandler>,
    results: Arc<ResultHandler>,
    metrics: AlertingMetrics,
    settings: EngineSettings,
    cluster: Mutex<Option<AlertingClusterInfo>>,
    last_tick: Mutex<Option<i64>>,
}

impl Engine {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        heartbeats: Arc<dyn HeartbeatStore>,
        conditions: Arc<ConditionRegistry>,
        eval_handler: Arc<EvalHandler>,
        results: Arc<ResultHandler>,
        metrics: AlertingMetrics,
        settings: EngineSettings,
    ) -> Self {
        Self {
            alerts,
            heartbeats,
            conditions,
            eval_handler,
            results,
            metrics,
            settings,
            cluster: Mutex::new(None),
            last_tick: Mutex::new(None),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.settings.server_id
    }

    /// Cluster view from the most recent successful heartbeat.
    pub fn cluster_info(&self) -> Option<AlertingClusterInfo> {
        self.cluster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs until `cancel` fires. In-flight evaluations are left to finish
    /// on their own and are not awaited.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            server_id = %self.settings.server_id,
            tick_secs = self.settings.tick.as_secs(),
            timeout_ms = self.eval_handler.timeout().as_millis() as u64,
            "Alerting engine started"
        );

        let mut tick = interval(self.settings.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = self.tick_at(Utc::now(), &mut tasks) => {}
                    }
                    while let Some(res) = tasks.try_join_next() {
                        if let Err(e) = res {
                            tracing::error!(error = %e, "Alert evaluation task failed");
                        }
                    }
                }
            }
        }

        tasks.detach_all();
        tracing::info!(server_id = %self.settings.server_id, "Alerting engine stopped");
    }

    /// Claims the seconds not yet evaluated up to and including `now`.
    ///
    /// The first call claims only `now`. Later calls claim everything after
    /// the previous claim, so a late or skipped timer tick never drops a
    /// second. Returns `None` when `now` was already claimed.
    pub fn claim_seconds(&self, now: DateTime<Utc>) -> Option<(i64, i64)> {
        let now = now.timestamp();
        let mut last = self.last_tick.lock().unwrap_or_else(PoisonError::into_inner);
        let from = match *last {
            Some(prev) if prev >= now => return None,
            Some(prev) => prev + 1,
            None => now,
        };
        *last = Some(now);
        Some((from, now))
    }

    /// One timer tick: refreshes the heartbeat, then spawns an evaluation
    /// for every rule due in the seconds claimed at `now`.
    pub async fn tick_at(self: &Arc<Self>, now: DateTime<Utc>, tasks: &mut JoinSet<()>) {
        let window = self.claim_seconds(now);
        let cluster = match self.heartbeat().await {
            Ok(cluster) => cluster,
            Err(e) => {
                tracing::error!(error = %e, "Alerting tick failed");
                return;
            }
        };
        let Some((from, to)) = window else {
            return;
        };
        if to > from {
            tracing::debug!(from, to, "Catching up on missed seconds");
        }
        match self.owned_due(&cluster, from, to).await {
            Ok(due) => {
                for alert in due {
                    let engine = self.clone();
                    tasks.spawn(async move { engine.process(alert).await });
                }
            }
            Err(e) => tracing::error!(error = %e, "Alerting tick failed"),
        }
    }

    /// Evaluates everything due at `now` and waits for all of it.
    pub async fn run_once(self: &Arc<Self>, now: DateTime<Utc>) -> Result<usize> {
        let due = self.due_alerts(now).await?;
        let count = due.len();

        let mut tasks = JoinSet::new();
        for alert in due {
            let engine = self.clone();
            tasks.spawn(async move { engine.process(alert).await });
        }
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "Alert evaluation task failed");
            }
        }

        Ok(count)
    }

    /// Heartbeats, then selects the active rules this server owns that are
    /// due at `now`.
    pub async fn due_alerts(&self, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let second = now.timestamp();
        self.due_alerts_between(second, second).await
    }

    /// Like [`Engine::due_alerts`] over the unix seconds `from..=to`. A rule
    /// due more than once in the window is returned once.
    pub async fn due_alerts_between(&self, from: i64, to: i64) -> Result<Vec<Alert>> {
        let cluster = self.heartbeat().await?;
        self.owned_due(&cluster, from, to).await
    }

    async fn heartbeat(&self) -> Result<AlertingClusterInfo> {
        let cluster = self
            .heartbeats
            .heartbeat(&HeartBeatCommand {
                server_id: self.settings.server_id.clone(),
                liveness_secs: self.settings.heartbeat_liveness.as_secs() as i64,
            })
            .await?;

        let changed = self.cluster_info().as_ref() != Some(&cluster);
        if changed {
            tracing::info!(
                server_id = %cluster.server_id,
                cluster_size = cluster.cluster_size,
                uptime_position = cluster.uptime_position,
                "Cluster membership changed"
            );
        }
        *self.cluster.lock().unwrap_or_else(PoisonError::into_inner) = Some(cluster.clone());
        Ok(cluster)
    }

    async fn owned_due(
        &self,
        cluster: &AlertingClusterInfo,
        from: i64,
        to: i64,
    ) -> Result<Vec<Alert>> {
        let due: Vec<Alert> = self
            .alerts
            .get_all_alerts()
            .await?
            .into_iter()
            .filter(|a| a.is_active())
            .filter(|a| cluster.owns_rule(a.id))
            .filter(|a| is_due_between(a.frequency, from, to))
            .collect();

        if !due.is_empty() {
            tracing::debug!(count = due.len(), "Evaluating due alerts");
        }
        Ok(due)
    }

    /// Evaluates one alert and applies the result.
    pub async fn process(&self, alert: Alert) {
        self.metrics.inc_active_alerts();

        let context = match AlertRule::from_alert(&alert, &self.conditions) {
            Ok(rule) => {
                let mut context = EvalContext::new(Arc::new(rule));
                self.eval_handler.eval(&mut context).await;
                context
            }
            Err(e) => {
                tracing::warn!(alert_id = alert.id, error = %e, "Failed to load alert rule");
                let mut context = EvalContext::new(Arc::new(AlertRule::without_conditions(&alert)));
                context.error = Some(EvalError::RuleLoad(e));
                context.finish();
                context
            }
        };

        if let Err(e) = self.results.handle(&alert, &context).await {
            tracing::error!(alert_id = alert.id, error = %e, "Failed to apply evaluation result");
        }
    }
}

/// Periodically removes heartbeats older than the liveness window.
pub async fn run_heartbeat_cleanup(
    heartbeats: Arc<dyn HeartbeatStore>,
    every: Duration,
    liveness: Duration,
    cancel: CancellationToken,
) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let liveness = chrono::Duration::seconds(liveness.as_secs() as i64);
                match heartbeats.delete_stale_heartbeats(Utc::now() - liveness).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(deleted = n, "Removed stale heartbeats"),
                    Err(e) => tracing::error!(error = %e, "Heartbeat cleanup failed"),
                }
            }
        }
    }
}
