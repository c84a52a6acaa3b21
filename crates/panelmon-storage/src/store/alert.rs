use async_trait::async_trait;
use chrono::Utc;
use panelmon_common::types::{
    Alert, AlertState, DeleteAlertCommand, GetAlertsQuery, SaveAlertsCommand,
    SetAlertStateCommand, Severity,
};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, Order,
    QueryFilter, QueryOrder, TransactionTrait,
};
use std::collections::{HashMap, HashSet};

use crate::entities::alert::{self, Column, Entity};
use crate::error::{Result, StorageError};
use crate::store::SqlStore;
use crate::AlertStore;

fn to_alert(m: alert::Model) -> Result<Alert> {
    let severity = m
        .severity
        .parse::<Severity>()
        .map_err(|_| StorageError::InvalidColumn {
            column: "severity",
            value: m.severity.clone(),
        })?;
    let state = m
        .state
        .parse::<AlertState>()
        .map_err(|_| StorageError::InvalidColumn {
            column: "state",
            value: m.state.clone(),
        })?;

    Ok(Alert {
        id: m.id,
        version: m.version,
        org_id: m.org_id,
        dashboard_id: m.dashboard_id,
        panel_id: m.panel_id,
        name: m.name,
        message: m.message,
        severity,
        state,
        handler: m.handler,
        silenced: m.silenced,
        execution_error: m.execution_error,
        frequency: m.frequency,
        eval_data: m.eval_data,
        eval_date: m.eval_date.map(|d| d.with_timezone(&Utc)),
        new_state_date: m.new_state_date.with_timezone(&Utc),
        state_changes: m.state_changes,
        created: m.created.with_timezone(&Utc),
        updated: m.updated.with_timezone(&Utc),
        settings: m.settings,
    })
}

fn to_alerts(models: Vec<alert::Model>) -> Result<Vec<Alert>> {
    models.into_iter().map(to_alert).collect()
}

fn validate(cmd: &SaveAlertsCommand) -> Result<()> {
    let mut panels = HashSet::new();
    for a in &cmd.alerts {
        if !a.valid_to_save() {
            return Err(StorageError::InvalidAlert(format!(
                "alert '{}' needs non-zero org, dashboard and panel ids",
                a.name
            )));
        }
        if a.dashboard_id != cmd.dashboard_id || a.org_id != cmd.org_id {
            return Err(StorageError::InvalidAlert(format!(
                "alert '{}' does not belong to dashboard {} of org {}",
                a.name, cmd.dashboard_id, cmd.org_id
            )));
        }
        if !panels.insert(a.panel_id) {
            return Err(StorageError::InvalidAlert(format!(
                "panel {} has more than one alert",
                a.panel_id
            )));
        }
    }
    Ok(())
}

/// Columns that change how or whether a rule runs without counting as a new
/// definition version.
fn schedule_differs(current: &Alert, incoming: &Alert) -> bool {
    current.severity != incoming.severity
        || current.frequency != incoming.frequency
        || current.silenced != incoming.silenced
        || current.handler != incoming.handler
}

async fn find_dashboard_alerts<C: ConnectionTrait>(
    db: &C,
    dashboard_id: i64,
) -> Result<Vec<alert::Model>> {
    Ok(Entity::find()
        .filter(Column::DashboardId.eq(dashboard_id))
        .order_by(Column::Id, Order::Asc)
        .all(db)
        .await?)
}

impl SqlStore {
    /// Deletes every alert of a dashboard, e.g. when the dashboard is removed.
    pub async fn delete_dashboard_alerts(&self, dashboard_id: i64) -> Result<u64> {
        let res = Entity::delete_many()
            .filter(Column::DashboardId.eq(dashboard_id))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }
}

#[async_trait]
impl AlertStore for SqlStore {
    async fn save_alerts(&self, cmd: &SaveAlertsCommand) -> Result<Vec<Alert>> {
        validate(cmd)?;

        let txn = self.db().begin().await?;
        let now = Utc::now().fixed_offset();

        let existing = find_dashboard_alerts(&txn, cmd.dashboard_id).await?;
        let mut by_panel: HashMap<i64, alert::Model> =
            existing.into_iter().map(|m| (m.panel_id, m)).collect();

        for a in &cmd.alerts {
            match by_panel.remove(&a.panel_id) {
                Some(m) => {
                    let current = to_alert(m.clone())?;
                    let bump = current.contains_updates(a);
                    if !bump && !schedule_differs(&current, a) {
                        continue;
                    }
                    let version = if bump { m.version + 1 } else { m.version };
                    let mut am: alert::ActiveModel = m.into();
                    am.name = Set(a.name.clone());
                    am.message = Set(a.message.clone());
                    am.severity = Set(a.severity.to_string());
                    am.handler = Set(a.handler);
                    am.silenced = Set(a.silenced);
                    am.frequency = Set(a.frequency);
                    am.settings = Set(a.settings.clone());
                    am.version = Set(version);
                    am.updated = Set(now);
                    am.update(&txn).await?;
                    tracing::debug!(panel_id = a.panel_id, version, bump, "Updated alert definition");
                }
                None => {
                    let am = alert::ActiveModel {
                        version: Set(0),
                        org_id: Set(a.org_id),
                        dashboard_id: Set(a.dashboard_id),
                        panel_id: Set(a.panel_id),
                        name: Set(a.name.clone()),
                        message: Set(a.message.clone()),
                        severity: Set(a.severity.to_string()),
                        state: Set(AlertState::Pending.to_string()),
                        handler: Set(a.handler),
                        silenced: Set(a.silenced),
                        execution_error: Set(String::new()),
                        frequency: Set(a.frequency),
                        eval_data: Set(None),
                        eval_date: Set(None),
                        new_state_date: Set(now),
                        state_changes: Set(0),
                        created: Set(now),
                        updated: Set(now),
                        settings: Set(a.settings.clone()),
                        ..Default::default()
                    };
                    am.insert(&txn).await?;
                    tracing::debug!(panel_id = a.panel_id, "Inserted alert definition");
                }
            }
        }

        // whatever is left has no panel in the new set
        let removed: Vec<i64> = by_panel.values().map(|m| m.id).collect();
        if !removed.is_empty() {
            Entity::delete_many()
                .filter(Column::Id.is_in(removed.clone()))
                .exec(&txn)
                .await?;
            tracing::debug!(dashboard_id = cmd.dashboard_id, removed = ?removed, "Deleted alerts");
        }

        let saved = to_alerts(find_dashboard_alerts(&txn, cmd.dashboard_id).await?)?;
        txn.commit().await?;
        Ok(saved)
    }

    async fn set_alert_state(&self, cmd: &SetAlertStateCommand) -> Result<Alert> {
        let not_found = || StorageError::NotFound {
            entity: "alert",
            id: cmd.alert_id.to_string(),
        };
        let model = Entity::find_by_id(cmd.alert_id)
            .one(self.db())
            .await?
            .filter(|m| m.org_id == cmd.org_id)
            .ok_or_else(not_found)?;

        let current = to_alert(model.clone())?;
        let timestamp = cmd.timestamp.fixed_offset();

        let mut am: alert::ActiveModel = model.into();
        am.severity = Set(cmd.severity.to_string());
        am.execution_error = Set(cmd.error.clone());
        am.eval_data = Set(cmd.eval_data.clone());
        am.eval_date = Set(Some(timestamp));
        if current.should_update_state(cmd.state) {
            am.state = Set(cmd.state.to_string());
            am.state_changes = Set(current.state_changes + 1);
            am.new_state_date = Set(timestamp);
        }
        am.updated = Set(Utc::now().fixed_offset());

        to_alert(am.update(self.db()).await?)
    }

    async fn delete_alert(&self, cmd: &DeleteAlertCommand) -> Result<bool> {
        let res = Entity::delete_by_id(cmd.alert_id).exec(self.db()).await?;
        Ok(res.rows_affected > 0)
    }

    async fn get_alerts(&self, query: &GetAlertsQuery) -> Result<Vec<Alert>> {
        let mut q = Entity::find().filter(Column::OrgId.eq(query.org_id));
        if !query.state.is_empty() {
            let states: Vec<String> = query.state.iter().map(|s| s.to_string()).collect();
            q = q.filter(Column::State.is_in(states));
        }
        if let Some(dashboard_id) = query.dashboard_id {
            q = q.filter(Column::DashboardId.eq(dashboard_id));
        }
        if let Some(panel_id) = query.panel_id {
            q = q.filter(Column::PanelId.eq(panel_id));
        }
        let rows = q.order_by(Column::Id, Order::Asc).all(self.db()).await?;
        to_alerts(rows)
    }

    async fn get_all_alerts(&self) -> Result<Vec<Alert>> {
        let rows = Entity::find()
            .order_by(Column::Id, Order::Asc)
            .all(self.db())
            .await?;
        to_alerts(rows)
    }

    async fn get_alert_by_id(&self, id: i64) -> Result<Option<Alert>> {
        Entity::find_by_id(id)
            .one(self.db())
            .await?
            .map(to_alert)
            .transpose()
    }
}
