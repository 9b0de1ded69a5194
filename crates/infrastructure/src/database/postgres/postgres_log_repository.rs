use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use kojihub_domain::entities::{LogMessage, NewLogMessage};
use kojihub_domain::repositories::{LogFilter, LogMessageRepository};
use kojihub_errors::SchedulerResult;

const DEFAULT_LIMIT: i64 = 100;

pub struct PostgresLogMessageRepository {
    pool: PgPool,
}

impl PostgresLogMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_message(row: &sqlx::postgres::PgRow) -> SchedulerResult<LogMessage> {
        Ok(LogMessage {
            id: row.try_get("id")?,
            ts: row.try_get("ts")?,
            task_id: row.try_get("task_id")?,
            host_id: row.try_get("host_id")?,
            host_name: row.try_get("host_name")?,
            msg: row.try_get("msg")?,
        })
    }
}

#[async_trait]
impl LogMessageRepository for PostgresLogMessageRepository {
    #[instrument(skip(self, message))]
    async fn append(&self, message: &NewLogMessage) -> SchedulerResult<()> {
        sqlx::query(
            "INSERT INTO scheduler_log_messages (task_id, host_id, host_name, msg) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(message.task_id)
        .bind(message.host_id)
        .bind(&message.host_name)
        .bind(&message.msg)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &LogFilter) -> SchedulerResult<Vec<LogMessage>> {
        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 1000);

        let rows = match (filter.task_id, filter.host_id) {
            (Some(task), Some(host)) => {
                sqlx::query(
                    "SELECT id, ts, task_id, host_id, host_name, msg \
                     FROM scheduler_log_messages \
                     WHERE task_id = $1 AND host_id = $2 ORDER BY id DESC LIMIT $3",
                )
                .bind(task)
                .bind(host)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(task), None) => {
                sqlx::query(
                    "SELECT id, ts, task_id, host_id, host_name, msg \
                     FROM scheduler_log_messages \
                     WHERE task_id = $1 ORDER BY id DESC LIMIT $2",
                )
                .bind(task)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (None, Some(host)) => {
                sqlx::query(
                    "SELECT id, ts, task_id, host_id, host_name, msg \
                     FROM scheduler_log_messages \
                     WHERE host_id = $1 ORDER BY id DESC LIMIT $2",
                )
                .bind(host)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (None, None) => {
                sqlx::query(
                    "SELECT id, ts, task_id, host_id, host_name, msg \
                     FROM scheduler_log_messages ORDER BY id DESC LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::row_to_message).collect()
    }
}
