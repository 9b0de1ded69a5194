use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use kojihub_domain::entities::HostDataEntry;
use kojihub_domain::repositories::HostDataRepository;
use kojihub_errors::SchedulerResult;

pub struct PostgresHostDataRepository {
    pool: PgPool,
}

impl PostgresHostDataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HostDataRepository for PostgresHostDataRepository {
    #[instrument(skip(self), fields(host_id = %host_id))]
    async fn get(&self, host_id: i64) -> SchedulerResult<Option<HostDataEntry>> {
        let row = sqlx::query("SELECT host_id, data FROM scheduler_host_data WHERE host_id = $1")
            .bind(host_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(HostDataEntry {
                host_id: row.try_get("host_id")?,
                data: row.try_get("data")?,
            })),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, data), fields(host_id = %host_id))]
    async fn set(&self, host_id: i64, data: &serde_json::Value) -> SchedulerResult<()> {
        sqlx::query(
            "INSERT INTO scheduler_host_data (host_id, data) VALUES ($1, $2) \
             ON CONFLICT (host_id) DO UPDATE SET data = $2",
        )
        .bind(host_id)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
