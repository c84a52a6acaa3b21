//! Heartbeat-based work partitioning.
//!
//! Every server refreshes its own [`HeartBeat`] each tick and derives an
//! [`AlertingClusterInfo`] from the live set. Rule ownership is then a pure
//! function of `(rule_id, cluster_size, uptime_position)`, so no node ever
//! talks to another node beyond the shared heartbeat table.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::HeartBeat;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertingClusterInfo {
    pub server_id: String,
    pub cluster_size: usize,
    pub uptime_position: usize,
}

impl AlertingClusterInfo {
    /// A single-node view, used before the first heartbeat succeeds.
    pub fn standalone(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            cluster_size: 1,
            uptime_position: 0,
        }
    }

    pub fn owns_rule(&self, rule_id: i64) -> bool {
        owns_rule(rule_id, self.cluster_size, self.uptime_position)
    }
}

/// `rule_id mod cluster_size == uptime_position`.
///
/// An empty cluster owns everything so a node whose heartbeat view is
/// degenerate still evaluates its rules.
///
/// # Examples
///
/// ```
/// use panelmon_common::cluster::owns_rule;
///
/// assert!(owns_rule(7, 3, 1));
/// assert!(!owns_rule(7, 3, 0));
/// assert!(owns_rule(42, 1, 0));
/// ```
pub fn owns_rule(rule_id: i64, cluster_size: usize, uptime_position: usize) -> bool {
    if cluster_size <= 1 {
        return true;
    }
    rule_id.rem_euclid(cluster_size as i64) == uptime_position as i64
}

/// Derives the cluster view for `server_id` from a heartbeat snapshot.
///
/// Heartbeats whose `updated` is older than `now - liveness` are ignored.
/// The live set is ranked by row id, i.e. by the order servers first joined.
/// Returns `None` when `server_id` is not part of the live set.
pub fn cluster_info(
    server_id: &str,
    heartbeats: &[HeartBeat],
    now: DateTime<Utc>,
    liveness: Duration,
) -> Option<AlertingClusterInfo> {
    let cutoff = now - liveness;
    let mut live: Vec<&HeartBeat> = heartbeats.iter().filter(|hb| hb.updated >= cutoff).collect();
    live.sort_by_key(|hb| hb.id);

    let uptime_position = live.iter().position(|hb| hb.server_id == server_id)?;
    Some(AlertingClusterInfo {
        server_id: server_id.to_string(),
        cluster_size: live.len(),
        uptime_position,
    })
}
