use crate::cluster::{cluster_info, owns_rule, AlertingClusterInfo};
use crate::metrics::{
    AlertingMetrics, DurationStats, MemoryMetrics, ALERTING_EXECUTION_TIME, ALERTING_NOTIFICATIONS_SENT,
};
use crate::types::{Alert, AlertState, HeartBeat, Severity};
use chrono::{Duration, Utc};
use std::sync::Arc;

fn make_alert() -> Alert {
    let mut alert = Alert::new(1, 10, 100, "High CPU");
    alert.message = "cpu above 90%".into();
    alert.settings = Some(serde_json::json!({
        "conditions": [{ "type": "query", "threshold": 90 }]
    }));
    alert
}

fn make_heartbeat(id: i64, server_id: &str, secs_ago: i64) -> HeartBeat {
    let ts = Utc::now() - Duration::seconds(secs_ago);
    HeartBeat {
        id,
        server_id: server_id.to_string(),
        created: ts,
        updated: ts,
    }
}

#[test]
fn state_literals_are_the_only_valid_states() {
    for literal in ["pending", "execution_error", "paused", "critical", "warning", "ok"] {
        assert!(AlertState::is_valid(literal), "{literal} should be valid");
    }
    for literal in ["", "OK", "Critical", "firing", "alerting", "no_data", "info"] {
        assert!(!AlertState::is_valid(literal), "{literal} should be invalid");
    }
}

#[test]
fn severity_literals_round_trip_through_display() {
    for sev in [Severity::Ok, Severity::Info, Severity::Warning, Severity::Critical] {
        assert_eq!(sev.to_string().parse::<Severity>(), Ok(sev));
    }
    assert!(!Severity::is_valid("fatal"));
    assert!(!Severity::is_valid("WARNING"));
}

#[test]
fn state_serde_uses_snake_case_literals() {
    let json = serde_json::to_string(&AlertState::ExecutionError).unwrap();
    assert_eq!(json, "\"execution_error\"");
    assert!(serde_json::from_str::<AlertState>("\"unknown\"").is_err());
}

#[test]
fn severity_maps_to_firing_state() {
    assert_eq!(Severity::Critical.firing_state(), AlertState::Critical);
    assert_eq!(Severity::Warning.firing_state(), AlertState::Warning);
    assert_eq!(Severity::Info.firing_state(), AlertState::Warning);
    assert_eq!(Severity::Ok.firing_state(), AlertState::Ok);
}

#[test]
fn valid_to_save_requires_all_ids() {
    let combos = [
        (0, 0, 0, false),
        (1, 0, 0, false),
        (0, 1, 0, false),
        (0, 0, 1, false),
        (1, 1, 0, false),
        (1, 0, 1, false),
        (0, 1, 1, false),
        (1, 1, 1, true),
        (7, 42, 3, true),
    ];
    for (org, dash, panel, expected) in combos {
        let mut alert = Alert::new(org, dash, panel, "x");
        alert.state = AlertState::ExecutionError;
        alert.silenced = true;
        assert_eq!(
            alert.valid_to_save(),
            expected,
            "org={org} dashboard={dash} panel={panel}"
        );
    }
}

#[test]
fn should_update_state_only_on_change() {
    let mut alert = make_alert();
    alert.state = AlertState::Ok;
    assert!(!alert.should_update_state(AlertState::Ok));
    assert!(alert.should_update_state(AlertState::Critical));
    assert!(alert.should_update_state(AlertState::ExecutionError));
}

#[test]
fn contains_updates_ignores_state() {
    let a = make_alert();
    for state in AlertState::ALL {
        let mut b = a.clone();
        b.state = state;
        assert!(!a.contains_updates(&b), "state {state} must not count as an update");
    }
}

#[test]
fn contains_updates_detects_definition_changes() {
    let a = make_alert();

    let mut renamed = a.clone();
    renamed.name = "Very High CPU".into();
    assert!(a.contains_updates(&renamed));

    let mut reworded = a.clone();
    reworded.message = "cpu above 95%".into();
    assert!(a.contains_updates(&reworded));

    let mut retuned = a.clone();
    retuned.settings = Some(serde_json::json!({
        "conditions": [{ "type": "query", "threshold": 95 }]
    }));
    assert!(a.contains_updates(&retuned));
}

#[test]
fn contains_updates_skips_settings_when_either_side_has_none() {
    let a = make_alert();
    let mut b = a.clone();
    b.settings = None;
    assert!(!a.contains_updates(&b));
    assert!(!b.contains_updates(&a));
}

#[test]
fn paused_or_silenced_alerts_are_inactive() {
    let mut alert = make_alert();
    alert.state = AlertState::Ok;
    assert!(alert.is_active());

    alert.state = AlertState::Paused;
    assert!(!alert.is_active());

    alert.state = AlertState::Critical;
    alert.silenced = true;
    assert!(!alert.is_active());
}

#[test]
fn partition_assigns_each_rule_to_exactly_one_position() {
    for cluster_size in 1..=7usize {
        for rule_id in 0..200i64 {
            let owners: Vec<usize> = (0..cluster_size)
                .filter(|pos| owns_rule(rule_id, cluster_size, *pos))
                .collect();
            assert_eq!(owners.len(), 1, "rule {rule_id} in cluster of {cluster_size}");
            assert_eq!(owners[0] as i64, rule_id % cluster_size as i64);
        }
    }
}

#[test]
fn partition_with_empty_cluster_owns_everything() {
    assert!(owns_rule(5, 0, 0));
    assert!(AlertingClusterInfo::standalone("a").owns_rule(12345));
}

#[test]
fn cluster_info_ranks_live_servers_by_join_order() {
    let heartbeats = vec![
        make_heartbeat(3, "c", 1),
        make_heartbeat(1, "a", 2),
        make_heartbeat(2, "b", 3),
    ];
    let now = Utc::now();

    let info = cluster_info("c", &heartbeats, now, Duration::seconds(60)).unwrap();
    assert_eq!(info.cluster_size, 3);
    assert_eq!(info.uptime_position, 2);

    let info = cluster_info("a", &heartbeats, now, Duration::seconds(60)).unwrap();
    assert_eq!(info.uptime_position, 0);
}

#[test]
fn cluster_info_excludes_stale_heartbeats() {
    let heartbeats = vec![
        make_heartbeat(1, "dead", 600),
        make_heartbeat(2, "b", 5),
        make_heartbeat(3, "c", 5),
    ];
    let info = cluster_info("c", &heartbeats, Utc::now(), Duration::seconds(60)).unwrap();
    assert_eq!(info.cluster_size, 2);
    assert_eq!(info.uptime_position, 1);

    assert!(cluster_info("dead", &heartbeats, Utc::now(), Duration::seconds(60)).is_none());
}

#[test]
fn memory_metrics_keys_series_by_sorted_labels() {
    let sink = Arc::new(MemoryMetrics::default());
    let metrics = AlertingMetrics::new(sink.clone());

    metrics.inc_notification_sent("log");
    metrics.inc_notification_sent("log");
    metrics.inc_notification_sent("webhook");
    metrics.record_execution_time(std::time::Duration::from_millis(12));
    metrics.record_execution_time(std::time::Duration::from_millis(30));

    assert_eq!(sink.counter(ALERTING_NOTIFICATIONS_SENT, &[("type", "log")]), 2);
    assert_eq!(sink.counter(ALERTING_NOTIFICATIONS_SENT, &[("type", "webhook")]), 1);
    assert_eq!(sink.counter(ALERTING_NOTIFICATIONS_SENT, &[("type", "email")]), 0);
    assert_eq!(
        sink.durations(ALERTING_EXECUTION_TIME),
        DurationStats {
            count: 2,
            sum: std::time::Duration::from_millis(42),
            max: std::time::Duration::from_millis(30),
        }
    );
    assert_eq!(sink.durations("alerting.unknown").count, 0);
    assert!(sink
        .snapshot()
        .contains_key("alerting.notifications_sent{type=log}"));
}
