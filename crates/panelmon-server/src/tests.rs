use crate::config::{AlertsImportFile, ServerConfig};
use crate::result_handler::{ResultHandler, Transition};
use crate::scheduler::{is_due, is_due_between, Engine, EngineSettings};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use panelmon_alert::context::{EvalContext, EvalMatch};
use panelmon_alert::error::EvalError;
use panelmon_alert::eval_handler::EvalHandler;
use panelmon_alert::registry::{ConditionPlugin, ConditionRegistry};
use panelmon_alert::rule::AlertRule;
use panelmon_alert::Condition;
use panelmon_common::cluster::AlertingClusterInfo;
use panelmon_common::metrics::{AlertingMetrics, MemoryMetrics, ALERTING_ACTIVE_ALERTS, ALERTING_RESULT};
use panelmon_common::types::{
    Alert, AlertState, DeleteAlertCommand, GetAlertsQuery, HeartBeatCommand, SaveAlertsCommand,
    SetAlertStateCommand, Severity,
};
use panelmon_notify::dispatcher::NotificationDispatcher;
use panelmon_notify::error::NotifyError;
use panelmon_notify::NotificationChannel;
use panelmon_storage::error::{Result as StorageResult, StorageError};
use panelmon_storage::{AlertStore, HeartbeatStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ---- fakes ----

/// In-memory store with a switch to make state writes fail.
#[derive(Default)]
struct MemoryStore {
    alerts: Mutex<HashMap<i64, Alert>>,
    cluster: Mutex<Option<(usize, usize)>>,
    fail_writes: AtomicBool,
    hang_heartbeats: AtomicBool,
    heartbeats: Mutex<Vec<String>>,
}

impl MemoryStore {
    fn with_alerts(alerts: Vec<Alert>) -> Arc<Self> {
        let store = Self::default();
        *store.alerts.lock().unwrap() = alerts.into_iter().map(|a| (a.id, a)).collect();
        Arc::new(store)
    }

    fn set_cluster(&self, size: usize, position: usize) {
        *self.cluster.lock().unwrap() = Some((size, position));
    }

    fn alert(&self, id: i64) -> Alert {
        self.alerts.lock().unwrap()[&id].clone()
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn save_alerts(&self, cmd: &SaveAlertsCommand) -> StorageResult<Vec<Alert>> {
        Ok(cmd.alerts.clone())
    }

    async fn set_alert_state(&self, cmd: &SetAlertStateCommand) -> StorageResult<Alert> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::InvalidAlert("disk full".into()));
        }
        let mut alerts = self.alerts.lock().unwrap();
        let alert = alerts.get_mut(&cmd.alert_id).ok_or(StorageError::NotFound {
            entity: "alert",
            id: cmd.alert_id.to_string(),
        })?;
        alert.severity = cmd.severity;
        alert.execution_error = cmd.error.clone();
        alert.eval_data = cmd.eval_data.clone();
        alert.eval_date = Some(cmd.timestamp);
        if alert.should_update_state(cmd.state) {
            alert.state = cmd.state;
            alert.state_changes += 1;
            alert.new_state_date = cmd.timestamp;
        }
        Ok(alert.clone())
    }

    async fn delete_alert(&self, cmd: &DeleteAlertCommand) -> StorageResult<bool> {
        Ok(self.alerts.lock().unwrap().remove(&cmd.alert_id).is_some())
    }

    async fn get_alerts(&self, query: &GetAlertsQuery) -> StorageResult<Vec<Alert>> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.org_id == query.org_id)
            .cloned()
            .collect())
    }

    async fn get_all_alerts(&self) -> StorageResult<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self.alerts.lock().unwrap().values().cloned().collect();
        alerts.sort_by_key(|a| a.id);
        Ok(alerts)
    }

    async fn get_alert_by_id(&self, id: i64) -> StorageResult<Option<Alert>> {
        Ok(self.alerts.lock().unwrap().get(&id).cloned())
    }
}

#[async_trait]
impl HeartbeatStore for MemoryStore {
    async fn heartbeat(&self, cmd: &HeartBeatCommand) -> StorageResult<AlertingClusterInfo> {
        if self.hang_heartbeats.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.heartbeats.lock().unwrap().push(cmd.server_id.clone());
        Ok(match *self.cluster.lock().unwrap() {
            Some((cluster_size, uptime_position)) => AlertingClusterInfo {
                server_id: cmd.server_id.clone(),
                cluster_size,
                uptime_position,
            },
            None => AlertingClusterInfo::standalone(cmd.server_id.as_str()),
        })
    }

    async fn delete_stale_heartbeats(&self, _before: DateTime<Utc>) -> StorageResult<u64> {
        Ok(0)
    }
}

/// `{"type": "static", "firing": bool, "delay_secs": n}`
struct StaticCondition {
    firing: bool,
    delay: Duration,
}

#[async_trait]
impl Condition for StaticCondition {
    fn condition_type(&self) -> &str {
        "static"
    }

    async fn evaluate(&self, context: &mut EvalContext) -> anyhow::Result<bool> {
        tokio::time::sleep(self.delay).await;
        if self.firing {
            context.eval_matches.push(EvalMatch {
                metric: "cpu".into(),
                value: Some(97.5),
                tags: HashMap::new(),
            });
        }
        Ok(self.firing)
    }
}

struct StaticPlugin;

impl ConditionPlugin for StaticPlugin {
    fn name(&self) -> &str {
        "static"
    }

    fn create_condition(&self, model: &Value) -> anyhow::Result<Arc<dyn Condition>> {
        Ok(Arc::new(StaticCondition {
            firing: model.get("firing").and_then(Value::as_bool).unwrap_or(false),
            delay: Duration::from_secs(model.get("delay_secs").and_then(Value::as_u64).unwrap_or(0)),
        }))
    }
}

struct RecordingChannel {
    sent: Arc<Mutex<Vec<(Severity, String)>>>,
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send(&self, severity: Severity, message: &str) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push((severity, message.to_string()));
        Ok(())
    }

    fn channel_type(&self) -> &str {
        "recording"
    }

    fn name(&self) -> &str {
        "recorder"
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    engine: Arc<Engine>,
    sink: Arc<MemoryMetrics>,
    sent: Arc<Mutex<Vec<(Severity, String)>>>,
}

fn harness(alerts: Vec<Alert>) -> Harness {
    let store = MemoryStore::with_alerts(alerts);
    let sink = Arc::new(MemoryMetrics::default());
    let metrics = AlertingMetrics::new(sink.clone());
    let sent = Arc::new(Mutex::new(Vec::new()));
    let channel: Box<dyn NotificationChannel> = Box::new(RecordingChannel { sent: sent.clone() });
    let dispatcher = Arc::new(NotificationDispatcher::new(vec![channel], metrics.clone()));

    let mut registry = ConditionRegistry::new();
    registry.register(Box::new(StaticPlugin));

    let engine = Arc::new(Engine::new(
        store.clone(),
        store.clone(),
        Arc::new(registry),
        Arc::new(EvalHandler::new(metrics.clone())),
        Arc::new(ResultHandler::new(store.clone(), dispatcher, metrics.clone())),
        metrics,
        EngineSettings {
            server_id: "node-a".into(),
            tick: Duration::from_secs(1),
            heartbeat_liveness: Duration::from_secs(60),
        },
    ));

    Harness {
        store,
        engine,
        sink,
        sent,
    }
}

fn make_alert(id: i64, firing: bool) -> Alert {
    let mut alert = Alert::new(1, 10, id, format!("alert-{id}"));
    alert.id = id;
    alert.state = AlertState::Ok;
    alert.severity = Severity::Critical;
    alert.message = "cpu too high".into();
    alert.settings = Some(json!({ "conditions": [{ "type": "static", "firing": firing }] }));
    alert
}

/// A tick at which every frequency up to 60 s is due.
fn aligned_tick() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn context_for(severity: Severity) -> EvalContext {
    let mut alert = Alert::new(1, 1, 1, "x");
    alert.severity = severity;
    EvalContext::new(Arc::new(AlertRule::without_conditions(&alert)))
}

// ---- transitions ----

#[test]
fn firing_maps_severity_to_state() {
    for (severity, state) in [
        (Severity::Critical, AlertState::Critical),
        (Severity::Warning, AlertState::Warning),
        (Severity::Info, AlertState::Warning),
        (Severity::Ok, AlertState::Ok),
    ] {
        let mut context = context_for(severity);
        context.firing = true;
        let t = Transition::from_context(&context);
        assert_eq!(t.state, state);
        assert_eq!(t.severity, severity);
        assert!(t.notify);
    }
}

#[test]
fn quiet_evaluation_returns_to_ok() {
    let context = context_for(Severity::Critical);
    let t = Transition::from_context(&context);
    assert_eq!(t.state, AlertState::Ok);
    assert_eq!(t.severity, Severity::Ok);
    assert!(!t.notify);
    assert!(t.eval_data.is_none());
}

#[test]
fn errors_map_to_execution_error_with_text() {
    let mut context = context_for(Severity::Warning);
    context.firing = true;
    context.error = Some(EvalError::Timeout);
    let t = Transition::from_context(&context);
    assert_eq!(t.state, AlertState::ExecutionError);
    assert_eq!(t.severity, Severity::Warning);
    assert_eq!(t.error, "Timeout");
    assert!(!t.notify);
}

#[test]
fn due_check_follows_frequency() {
    let noon = aligned_tick();
    assert!(is_due(60, noon));
    assert!(is_due(10, noon + chrono::Duration::seconds(30)));
    assert!(!is_due(60, noon + chrono::Duration::seconds(30)));
    assert!(is_due(0, noon));
    assert!(!is_due(-5, noon + chrono::Duration::seconds(1)));
}

#[test]
fn due_window_covers_every_second_in_range() {
    let noon = aligned_tick().timestamp();
    assert!(is_due_between(2, noon + 1, noon + 2));
    assert!(!is_due_between(2, noon + 1, noon + 1));
    assert!(is_due_between(60, noon - 5, noon + 5));
    assert!(!is_due_between(60, noon + 1, noon + 59));
    assert!(!is_due_between(60, noon + 1, noon));
}

// ---- engine ----

#[test]
fn claimed_seconds_never_skip_or_repeat() {
    let h = harness(Vec::new());
    let t0 = aligned_tick();
    let base = t0.timestamp();
    let at = |secs: i64| t0 + chrono::Duration::seconds(secs);

    assert_eq!(h.engine.claim_seconds(at(0)), Some((base, base)));
    assert_eq!(h.engine.claim_seconds(at(1)), Some((base + 1, base + 1)));
    assert_eq!(h.engine.claim_seconds(at(3)), Some((base + 2, base + 3)));
    assert_eq!(h.engine.claim_seconds(at(3)), None);
    assert_eq!(h.engine.claim_seconds(at(4)), Some((base + 4, base + 4)));
}

#[tokio::test]
async fn late_tick_evaluates_the_second_it_jumped_over() {
    let mut every_two = make_alert(1, true);
    every_two.frequency = 2;
    let h = harness(vec![every_two]);
    let t0 = aligned_tick();
    let mut tasks = tokio::task::JoinSet::new();

    h.engine.tick_at(t0 + chrono::Duration::seconds(1), &mut tasks).await;
    assert!(tasks.is_empty());

    // the tick for second 2 was late and lands on second 3
    h.engine.tick_at(t0 + chrono::Duration::seconds(3), &mut tasks).await;
    assert_eq!(tasks.len(), 1);
    while tasks.join_next().await.is_some() {}
    assert_eq!(h.store.alert(1).state, AlertState::Critical);

    // a second tick inside the same second heartbeats but evaluates nothing
    h.engine.tick_at(t0 + chrono::Duration::seconds(3), &mut tasks).await;
    assert!(tasks.is_empty());
    assert_eq!(h.store.alert(1).state_changes, 1);
    assert_eq!(h.store.heartbeats.lock().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_a_stuck_heartbeat() {
    let h = harness(vec![make_alert(1, true)]);
    h.store.hang_heartbeats.store(true, Ordering::SeqCst);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(h.engine.clone().run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("engine should stop while the heartbeat hangs")
        .unwrap();

    assert!(h.store.heartbeats.lock().unwrap().is_empty());
    assert_eq!(h.store.alert(1).state, AlertState::Ok);
}

#[tokio::test]
async fn firing_rule_persists_and_notifies() {
    let h = harness(vec![make_alert(1, true)]);

    assert_eq!(h.engine.run_once(aligned_tick()).await.unwrap(), 1);

    let alert = h.store.alert(1);
    assert_eq!(alert.state, AlertState::Critical);
    assert_eq!(alert.state_changes, 1);
    assert!(alert.eval_data.is_some());
    let sent = h.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, Severity::Critical);
    assert!(sent[0].1.contains("alert-1"));
    assert_eq!(h.sink.counter(ALERTING_RESULT, &[("severity", "critical")]), 1);
    assert_eq!(h.sink.counter(ALERTING_ACTIVE_ALERTS, &[]), 1);
}

#[tokio::test]
async fn quiet_rule_counts_ok_and_sends_nothing() {
    let h = harness(vec![make_alert(1, false)]);

    h.engine.run_once(aligned_tick()).await.unwrap();

    assert_eq!(h.store.alert(1).state, AlertState::Ok);
    assert_eq!(h.store.alert(1).state_changes, 0);
    assert!(h.sent.lock().unwrap().is_empty());
    assert_eq!(h.sink.counter(ALERTING_RESULT, &[("severity", "ok")]), 1);
}

#[tokio::test]
async fn failed_write_skips_notification() {
    let h = harness(vec![make_alert(1, true)]);
    h.store.fail_writes.store(true, Ordering::SeqCst);

    h.engine.run_once(aligned_tick()).await.unwrap();

    assert!(h.sent.lock().unwrap().is_empty());
    assert_eq!(h.store.alert(1).state, AlertState::Ok);
}

#[tokio::test]
async fn only_owned_rules_are_evaluated() {
    let h = harness((1..=6).map(|id| make_alert(id, true)).collect());
    h.store.set_cluster(3, 1);

    assert_eq!(h.engine.run_once(aligned_tick()).await.unwrap(), 2);

    for id in 1..=6 {
        let expected = if id % 3 == 1 {
            AlertState::Critical
        } else {
            AlertState::Ok
        };
        assert_eq!(h.store.alert(id).state, expected, "alert {id}");
    }
    let info = h.engine.cluster_info().unwrap();
    assert_eq!((info.cluster_size, info.uptime_position), (3, 1));
}

#[tokio::test]
async fn inactive_and_undue_rules_are_skipped() {
    let mut paused = make_alert(1, true);
    paused.state = AlertState::Paused;
    let mut silenced = make_alert(2, true);
    silenced.silenced = true;
    let mut hourly = make_alert(3, true);
    hourly.frequency = 3600;
    let h = harness(vec![paused, silenced, hourly, make_alert(4, true)]);

    let at = aligned_tick() + chrono::Duration::seconds(60);
    assert_eq!(h.engine.run_once(at).await.unwrap(), 1);
    assert_eq!(h.store.alert(4).state, AlertState::Critical);
    assert_eq!(h.store.alert(3).state, AlertState::Ok);
}

#[tokio::test]
async fn unloadable_rule_is_recorded_as_execution_error() {
    let mut alert = make_alert(1, true);
    alert.settings = Some(json!({ "conditions": [{ "type": "graphite" }] }));
    let h = harness(vec![alert]);

    h.engine.run_once(aligned_tick()).await.unwrap();

    let stored = h.store.alert(1);
    assert_eq!(stored.state, AlertState::ExecutionError);
    assert!(stored.execution_error.contains("graphite"));
    assert!(h.sent.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hanging_rule_times_out_without_blocking_others() {
    let mut slow = make_alert(1, true);
    slow.settings = Some(json!({ "conditions": [{ "type": "static", "firing": true, "delay_secs": 3600 }] }));
    let h = harness(vec![slow, make_alert(2, true)]);

    let started = tokio::time::Instant::now();
    h.engine.run_once(aligned_tick()).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert_eq!(h.store.alert(1).state, AlertState::ExecutionError);
    assert_eq!(h.store.alert(1).execution_error, "Timeout");
    assert_eq!(h.store.alert(2).state, AlertState::Critical);
}

#[tokio::test(start_paused = true)]
async fn run_heartbeats_every_tick_and_stops_on_cancel() {
    let h = harness(Vec::new());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(h.engine.clone().run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("engine should stop promptly")
        .unwrap();

    let beats = h.store.heartbeats.lock().unwrap().clone();
    assert_eq!(beats.len(), 3);
    assert!(beats.iter().all(|id| id == "node-a"));
}

// ---- telemetry ----

#[test]
fn recorder_sink_feeds_the_prometheus_recorder() {
    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        let metrics = AlertingMetrics::new(Arc::new(crate::telemetry::RecorderMetrics));
        metrics.inc_result(Severity::Critical);
        metrics.inc_result(Severity::Critical);
        metrics.inc_notification_sent("log");
        metrics.record_execution_time(Duration::from_millis(20));
    });

    let rendered = handle.render();
    assert!(rendered.contains(r#"alerting_result{severity="critical"} 2"#), "{rendered}");
    assert!(rendered.contains(r#"alerting_notifications_sent{type="log"} 1"#), "{rendered}");
    assert!(rendered.contains("alerting_execution_time_count 1"), "{rendered}");
}

// ---- config ----

#[test]
fn metrics_listen_address_is_optional_and_validated() {
    let config: ServerConfig = toml::from_str("").unwrap();
    assert!(config.metrics.listen.is_none());

    let config: ServerConfig = toml::from_str(
        r#"
        [metrics]
        listen = "127.0.0.1:9464"
        "#,
    )
    .unwrap();
    assert!(config.validate().is_ok());

    let mut config = config;
    config.metrics.listen = Some("not-an-address".into());
    assert!(config.validate().is_err());
}

#[test]
fn config_defaults_apply_to_missing_sections() {
    let config: ServerConfig = toml::from_str("").unwrap();
    assert_eq!(config.alerting.tick_secs, 1);
    assert_eq!(config.alerting.eval_timeout_secs, 5);
    assert_eq!(config.alerting.heartbeat_liveness_secs, 60);
    assert!(config.alerting.enabled);
    assert!(config.notifications.is_empty());
    assert_eq!(
        config.database.sqlite_dir(),
        Some(std::path::PathBuf::from("data"))
    );
}

#[test]
fn config_parses_notification_settings() {
    let config: ServerConfig = toml::from_str(
        r#"
        [alerting]
        server_id = "node-b"
        eval_timeout_secs = 2

        [[notifications]]
        name = "ops"
        channel_type = "log"
        settings = { level = "error" }
        "#,
    )
    .unwrap();
    assert_eq!(config.alerting.resolve_server_id(), "node-b");
    assert_eq!(config.alerting.eval_timeout(), Duration::from_secs(2));
    assert_eq!(config.notifications[0].settings, json!({ "level": "error" }));
    assert!(config.validate().is_ok());

    let channels = crate::build_channels(
        &panelmon_notify::plugin::ChannelRegistry::default(),
        &config.notifications,
    )
    .unwrap();
    assert_eq!(channels.len(), 1);
}

#[test]
fn config_validation_rejects_zero_intervals_and_duplicate_channels() {
    let mut config = ServerConfig::default();
    config.alerting.tick_secs = 0;
    assert!(config.validate().is_err());

    let config: ServerConfig = toml::from_str(
        r#"
        [[notifications]]
        name = "ops"
        channel_type = "log"

        [[notifications]]
        name = "ops"
        channel_type = "log"
        "#,
    )
    .unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn unknown_channel_type_fails_the_build() {
    let config: ServerConfig = toml::from_str(
        r#"
        [[notifications]]
        name = "pager"
        channel_type = "pagerduty"
        "#,
    )
    .unwrap();
    let err = crate::build_channels(
        &panelmon_notify::plugin::ChannelRegistry::default(),
        &config.notifications,
    )
    .err()
    .map(|e| e.to_string())
    .unwrap_or_default();
    assert!(err.contains("pager"));
}

#[test]
fn random_server_id_when_unset() {
    let config = ServerConfig::default();
    let a = config.alerting.resolve_server_id();
    let b = config.alerting.resolve_server_id();
    assert_ne!(a, b);
    assert_eq!(a.len(), 36);
}

#[test]
fn import_file_becomes_save_command() {
    let file: AlertsImportFile = serde_json::from_value(json!({
        "org_id": 1,
        "dashboard_id": 10,
        "alerts": [
            { "panel_id": 3, "name": "cpu", "severity": "critical", "settings": { "conditions": [] } },
            { "panel_id": 4, "name": "mem", "settings": { "conditions": [] } }
        ]
    }))
    .unwrap();

    let cmd = file.into_command();
    assert_eq!(cmd.dashboard_id, 10);
    assert_eq!(cmd.alerts.len(), 2);
    assert_eq!(cmd.alerts[0].severity, Severity::Critical);
    assert_eq!(cmd.alerts[1].severity, Severity::Warning);
    assert_eq!(cmd.alerts[1].frequency, 60);
    assert!(cmd.alerts.iter().all(|a| a.valid_to_save()));
}
