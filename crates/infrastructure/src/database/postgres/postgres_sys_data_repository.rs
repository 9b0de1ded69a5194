use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use kojihub_domain::repositories::SysDataRepository;
use kojihub_errors::SchedulerResult;

pub struct PostgresSysDataRepository {
    pool: PgPool,
}

impl PostgresSysDataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SysDataRepository for PostgresSysDataRepository {
    #[instrument(skip(self))]
    async fn get(&self, name: &str) -> SchedulerResult<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT data FROM scheduler_sys_data WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("data")?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, data))]
    async fn set(&self, name: &str, data: &serde_json::Value) -> SchedulerResult<()> {
        sqlx::query(
            "INSERT INTO scheduler_sys_data (name, data) VALUES ($1, $2) \
             ON CONFLICT (name) DO UPDATE SET data = $2",
        )
        .bind(name)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
