//! Persistence for alert definitions and cluster heartbeats.
//!
//! The engine talks to storage through [`AlertStore`] and
//! [`HeartbeatStore`]. [`store::SqlStore`] implements both on top of
//! SeaORM; the schema is owned by the `migration` crate.

pub mod entities;
pub mod error;
pub mod store;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use error::Result;
use panelmon_common::cluster::AlertingClusterInfo;
use panelmon_common::types::{
    Alert, DeleteAlertCommand, GetAlertsQuery, HeartBeatCommand, SaveAlertsCommand,
    SetAlertStateCommand,
};

pub use store::SqlStore;

/// Alert definitions and their evaluation state.
///
/// Implementations must be safe to share across threads because the
/// scheduler writes results from concurrently running evaluation tasks.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Replaces the alert set of one dashboard.
    ///
    /// Alerts are matched to existing rows by panel id. Matches with changed
    /// definitions get a version bump, new panels are inserted as `pending`,
    /// and rows for panels no longer present are deleted. Returns the saved
    /// alerts with their ids.
    async fn save_alerts(&self, cmd: &SaveAlertsCommand) -> Result<Vec<Alert>>;

    /// Applies one evaluation result and returns the updated alert.
    async fn set_alert_state(&self, cmd: &SetAlertStateCommand) -> Result<Alert>;

    /// Returns `true` if a row was deleted.
    async fn delete_alert(&self, cmd: &DeleteAlertCommand) -> Result<bool>;

    async fn get_alerts(&self, query: &GetAlertsQuery) -> Result<Vec<Alert>>;

    async fn get_all_alerts(&self) -> Result<Vec<Alert>>;

    async fn get_alert_by_id(&self, id: i64) -> Result<Option<Alert>>;
}

/// Server liveness records used for cluster partitioning.
#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    /// Upserts this server's heartbeat and returns the cluster as seen from
    /// it: live servers ranked by join order.
    async fn heartbeat(&self, cmd: &HeartBeatCommand) -> Result<AlertingClusterInfo>;

    /// Deletes heartbeats last refreshed before `before`.
    async fn delete_stale_heartbeats(&self, before: DateTime<Utc>) -> Result<u64>;
}
