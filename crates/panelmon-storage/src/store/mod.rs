use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};

use crate::error::Result;

pub mod alert;
pub mod heartbeat;

/// SeaORM-backed implementation of [`crate::AlertStore`] and
/// [`crate::HeartbeatStore`].
pub struct SqlStore {
    pub(crate) db: DatabaseConnection,
}

impl SqlStore {
    /// Connects and brings the schema up to date.
    ///
    /// SQLite example: `sqlite://data/panelmon.db?mode=rwc`
    pub async fn connect(db_url: &str) -> Result<Self> {
        let db = Database::connect(db_url).await?;

        // WAL only applies to SQLite
        if db_url.starts_with("sqlite:") {
            db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        }

        Migrator::up(&db, None).await?;
        tracing::info!(db_url = %db_url, "Initialized alert store");

        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}
