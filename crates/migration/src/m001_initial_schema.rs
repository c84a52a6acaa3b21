use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    version INTEGER NOT NULL DEFAULT 0,
    org_id INTEGER NOT NULL,
    dashboard_id INTEGER NOT NULL,
    panel_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    severity TEXT NOT NULL,
    state TEXT NOT NULL,
    handler INTEGER NOT NULL DEFAULT 0,
    silenced INTEGER NOT NULL DEFAULT 0,
    execution_error TEXT NOT NULL DEFAULT '',
    frequency INTEGER NOT NULL DEFAULT 60,
    eval_data TEXT,
    eval_date TEXT,
    new_state_date TEXT NOT NULL,
    state_changes INTEGER NOT NULL DEFAULT 0,
    created TEXT NOT NULL,
    updated TEXT NOT NULL,
    settings TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_dashboard_panel ON alerts(dashboard_id, panel_id);
CREATE INDEX IF NOT EXISTS idx_alerts_org_state ON alerts(org_id, state);

CREATE TABLE IF NOT EXISTS heartbeats (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    server_id TEXT NOT NULL UNIQUE,
    created TEXT NOT NULL,
    updated TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_heartbeats_updated ON heartbeats(updated);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS heartbeats;
DROP TABLE IF EXISTS alerts;
";
