use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use kojihub_domain::entities::Refusal;
use kojihub_domain::repositories::RefusalRepository;
use kojihub_errors::SchedulerResult;

const REFUSAL_COLUMNS: &str = "host_id, task_id, soft, by_host, msg, ts";

pub struct PostgresRefusalRepository {
    pool: PgPool,
}

impl PostgresRefusalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_refusal(row: &sqlx::postgres::PgRow) -> SchedulerResult<Refusal> {
        Ok(Refusal {
            host_id: row.try_get("host_id")?,
            task_id: row.try_get("task_id")?,
            soft: row.try_get("soft")?,
            by_host: row.try_get("by_host")?,
            msg: row.try_get("msg")?,
            ts: row.try_get("ts")?,
        })
    }
}

#[async_trait]
impl RefusalRepository for PostgresRefusalRepository {
    #[instrument(skip(self, refusal), fields(host_id = %refusal.host_id, task_id = %refusal.task_id))]
    async fn upsert(&self, refusal: &Refusal) -> SchedulerResult<()> {
        sqlx::query(
            "INSERT INTO scheduler_task_refusal (host_id, task_id, soft, by_host, msg, ts) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (host_id, task_id) \
             DO UPDATE SET soft = $3, by_host = $4, msg = $5, ts = $6",
        )
        .bind(refusal.host_id)
        .bind(refusal.task_id)
        .bind(refusal.soft)
        .bind(refusal.by_host)
        .bind(&refusal.msg)
        .bind(refusal.ts)
        .execute(&self.pool)
        .await?;

        debug!(
            "记录拒绝: 主机 {} 任务 {} soft={}",
            refusal.host_id, refusal.task_id, refusal.soft
        );
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn get_for_task(&self, task_id: i64) -> SchedulerResult<Vec<Refusal>> {
        let rows = sqlx::query(&format!(
            "SELECT {REFUSAL_COLUMNS} FROM scheduler_task_refusal \
             WHERE task_id = $1 ORDER BY ts DESC"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_refusal).collect()
    }

    #[instrument(skip(self))]
    async fn get_filtered(
        &self,
        task_id: Option<i64>,
        host_id: Option<i64>,
    ) -> SchedulerResult<Vec<Refusal>> {
        let rows = match (task_id, host_id) {
            (Some(task), Some(host)) => {
                sqlx::query(&format!(
                    "SELECT {REFUSAL_COLUMNS} FROM scheduler_task_refusal \
                     WHERE task_id = $1 AND host_id = $2 ORDER BY ts DESC"
                ))
                .bind(task)
                .bind(host)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(task), None) => {
                sqlx::query(&format!(
                    "SELECT {REFUSAL_COLUMNS} FROM scheduler_task_refusal \
                     WHERE task_id = $1 ORDER BY ts DESC"
                ))
                .bind(task)
                .fetch_all(&self.pool)
                .await?
            }
            (None, Some(host)) => {
                sqlx::query(&format!(
                    "SELECT {REFUSAL_COLUMNS} FROM scheduler_task_refusal \
                     WHERE host_id = $1 ORDER BY ts DESC"
                ))
                .bind(host)
                .fetch_all(&self.pool)
                .await?
            }
            (None, None) => {
                sqlx::query(&format!(
                    "SELECT {REFUSAL_COLUMNS} FROM scheduler_task_refusal ORDER BY ts DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::row_to_refusal).collect()
    }

    #[instrument(skip(self))]
    async fn active_by_task(
        &self,
        now: DateTime<Utc>,
        soft_timeout_seconds: i64,
    ) -> SchedulerResult<HashMap<i64, HashSet<i64>>> {
        // 过期的软拒绝只是被忽略，不在这里删除
        let cutoff = now - Duration::seconds(soft_timeout_seconds);
        let rows = sqlx::query(
            "SELECT host_id, task_id FROM scheduler_task_refusal \
             WHERE soft = FALSE OR ts > $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut active: HashMap<i64, HashSet<i64>> = HashMap::new();
        for row in &rows {
            let host_id: i64 = row.try_get("host_id")?;
            let task_id: i64 = row.try_get("task_id")?;
            active.entry(task_id).or_default().insert(host_id);
        }
        Ok(active)
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn purge_for_task(&self, task_id: i64) -> SchedulerResult<u64> {
        let result = sqlx::query("DELETE FROM scheduler_task_refusal WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            debug!("任务 {} 终结，清理拒绝记录 {} 条", task_id, purged);
        }
        Ok(purged)
    }
}
