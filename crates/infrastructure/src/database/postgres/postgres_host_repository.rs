use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use kojihub_domain::entities::{Host, HostSelfReport, Task};
use kojihub_domain::repositories::HostRepository;
use kojihub_errors::{SchedulerError, SchedulerResult};

use super::postgres_task_repository::row_to_task;

const HOST_COLUMNS: &str = "id, user_id, name, arches, channels, capacity, task_load, \
                            ready, enabled, description, comment, last_update";

pub struct PostgresHostRepository {
    pool: PgPool,
}

impl PostgresHostRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_host(row: &sqlx::postgres::PgRow) -> SchedulerResult<Host> {
        Ok(Host {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            arches: row.try_get("arches")?,
            channels: row.try_get("channels")?,
            capacity: row.try_get("capacity")?,
            task_load: row.try_get("task_load")?,
            ready: row.try_get("ready")?,
            enabled: row.try_get("enabled")?,
            description: row.try_get("description")?,
            comment: row.try_get("comment")?,
            last_update: row.try_get("last_update")?,
        })
    }
}

#[async_trait]
impl HostRepository for PostgresHostRepository {
    #[instrument(skip(self), fields(host_id = %id))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Host>> {
        let row = sqlx::query(&format!("SELECT {HOST_COLUMNS} FROM host WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_host).transpose()
    }

    #[instrument(skip(self))]
    async fn get_by_name(&self, name: &str) -> SchedulerResult<Option<Host>> {
        let row = sqlx::query(&format!("SELECT {HOST_COLUMNS} FROM host WHERE name = $1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_host).transpose()
    }

    #[instrument(skip(self))]
    async fn get_enabled_hosts(&self) -> SchedulerResult<Vec<Host>> {
        let rows = sqlx::query(&format!(
            "SELECT {HOST_COLUMNS} FROM host WHERE enabled = TRUE ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        let hosts: SchedulerResult<Vec<Host>> = rows.iter().map(Self::row_to_host).collect();
        let hosts = hosts?;
        debug!("加载启用主机 {} 台", hosts.len());
        Ok(hosts)
    }

    #[instrument(skip(self), fields(host_id = %host_id))]
    async fn poll_assigned_tasks(&self, host_id: i64) -> SchedulerResult<Vec<Task>> {
        // 心跳刷新和分配读取在同一事务里，主机一出现即视为新鲜
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE host SET last_update = NOW() WHERE id = $1")
            .bind(host_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(SchedulerError::host_not_found(host_id));
        }

        let rows = sqlx::query(
            "SELECT id, method, channel_id, arch, weight, priority, state, owner, parent, \
             host_id, create_ts FROM task \
             WHERE host_id = $1 AND state = 'ASSIGNED' \
             ORDER BY priority ASC, create_ts ASC, id ASC",
        )
        .bind(host_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let tasks: SchedulerResult<Vec<Task>> = rows.iter().map(row_to_task).collect();
        let tasks = tasks?;
        debug!("主机 {} 领取分配任务 {} 个", host_id, tasks.len());
        Ok(tasks)
    }

    #[instrument(skip(self, report), fields(host_id = %host_id))]
    async fn update_from_data(
        &self,
        host_id: i64,
        report: &HostSelfReport,
    ) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE host SET \
                capacity = COALESCE($2, capacity), \
                task_load = COALESCE($3, task_load), \
                arches = COALESCE($4, arches), \
                channels = COALESCE($5, channels), \
                ready = COALESCE($6, ready), \
                last_update = NOW() \
             WHERE id = $1",
        )
        .bind(host_id)
        .bind(report.capacity)
        .bind(report.task_load)
        .bind(&report.arches)
        .bind(&report.channels)
        .bind(report.ready)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::host_not_found(host_id));
        }

        debug!("主机 {} 自报数据已回写", host_id);
        Ok(())
    }
}
