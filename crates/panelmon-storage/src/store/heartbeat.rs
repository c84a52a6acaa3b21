use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use panelmon_common::cluster::{cluster_info, AlertingClusterInfo};
use panelmon_common::types::{HeartBeat, HeartBeatCommand};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
};

use crate::entities::heartbeat::{self, Column, Entity};
use crate::error::Result;
use crate::store::SqlStore;
use crate::HeartbeatStore;

fn to_heartbeat(m: heartbeat::Model) -> HeartBeat {
    HeartBeat {
        id: m.id,
        server_id: m.server_id,
        created: m.created.with_timezone(&Utc),
        updated: m.updated.with_timezone(&Utc),
    }
}

impl SqlStore {
    pub async fn list_heartbeats(&self) -> Result<Vec<HeartBeat>> {
        let rows = Entity::find()
            .order_by(Column::Id, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_heartbeat).collect())
    }
}

#[async_trait]
impl HeartbeatStore for SqlStore {
    async fn heartbeat(&self, cmd: &HeartBeatCommand) -> Result<AlertingClusterInfo> {
        let now = Utc::now();
        let existing = Entity::find()
            .filter(Column::ServerId.eq(cmd.server_id.as_str()))
            .one(self.db())
            .await?;

        match existing {
            Some(m) => {
                let mut am: heartbeat::ActiveModel = m.into();
                am.updated = Set(now.fixed_offset());
                am.update(self.db()).await?;
            }
            None => {
                let am = heartbeat::ActiveModel {
                    server_id: Set(cmd.server_id.clone()),
                    created: Set(now.fixed_offset()),
                    updated: Set(now.fixed_offset()),
                    ..Default::default()
                };
                am.insert(self.db()).await?;
                tracing::info!(server_id = %cmd.server_id, "Registered server heartbeat");
            }
        }

        let heartbeats = self.list_heartbeats().await?;
        let liveness = Duration::seconds(cmd.liveness_secs);
        // a concurrent cleanup can only have removed us if our row was stale
        Ok(cluster_info(&cmd.server_id, &heartbeats, now, liveness)
            .unwrap_or_else(|| AlertingClusterInfo::standalone(cmd.server_id.as_str())))
    }

    async fn delete_stale_heartbeats(&self, before: DateTime<Utc>) -> Result<u64> {
        let stale: Vec<i64> = self
            .list_heartbeats()
            .await?
            .into_iter()
            .filter(|hb| hb.updated < before)
            .map(|hb| hb.id)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let res = Entity::delete_many()
            .filter(Column::Id.is_in(stale))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }
}
