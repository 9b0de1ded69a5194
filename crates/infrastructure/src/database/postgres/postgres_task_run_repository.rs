use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use kojihub_domain::entities::{Task, TaskRun, TaskRunState, TaskState};
use kojihub_domain::repositories::{ActiveRun, TaskRunRepository};
use kojihub_errors::{SchedulerError, SchedulerResult};

const RUN_COLUMNS: &str = "id, task_id, host_id, state, create_ts, start_ts, end_ts";

pub struct PostgresTaskRunRepository {
    pool: PgPool,
}

impl PostgresTaskRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task_run(row: &sqlx::postgres::PgRow) -> SchedulerResult<TaskRun> {
        Ok(TaskRun {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            host_id: row.try_get("host_id")?,
            state: row.try_get("state")?,
            create_ts: row.try_get("create_ts")?,
            start_ts: row.try_get("start_ts")?,
            end_ts: row.try_get("end_ts")?,
        })
    }

    /// 锁定任务行并返回当前状态
    async fn lock_task(
        tx: &mut Transaction<'_, Postgres>,
        task_id: i64,
    ) -> SchedulerResult<TaskState> {
        let row = sqlx::query("SELECT state FROM task WHERE id = $1 FOR UPDATE")
            .bind(task_id)
            .fetch_optional(&mut **tx)
            .await?;
        match row {
            Some(row) => Ok(row.try_get("state")?),
            None => Err(SchedulerError::task_not_found(task_id)),
        }
    }

    /// 任务当前的活跃运行实例（同样被行锁覆盖）
    async fn lock_active_run(
        tx: &mut Transaction<'_, Postgres>,
        task_id: i64,
    ) -> SchedulerResult<Option<TaskRun>> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM scheduler_task_run \
             WHERE task_id = $1 AND state IN ('ASSIGNED', 'RUNNING') \
             ORDER BY id DESC LIMIT 1 FOR UPDATE"
        ))
        .bind(task_id)
        .fetch_optional(&mut **tx)
        .await?;
        row.as_ref().map(Self::row_to_task_run).transpose()
    }

    async fn override_run(
        tx: &mut Transaction<'_, Postgres>,
        run_id: i64,
    ) -> SchedulerResult<()> {
        sqlx::query(
            "UPDATE scheduler_task_run SET state = 'OVERRIDE', end_ts = NOW() WHERE id = $1",
        )
        .bind(run_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskRunRepository for PostgresTaskRunRepository {
    #[instrument(skip(self), fields(run_id = %id))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskRun>> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM scheduler_task_run WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_task_run).transpose()
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn get_by_task_id(&self, task_id: i64) -> SchedulerResult<Vec<TaskRun>> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM scheduler_task_run WHERE task_id = $1 ORDER BY id"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task_run).collect()
    }

    #[instrument(skip(self))]
    async fn get_filtered(
        &self,
        task_id: Option<i64>,
        host_id: Option<i64>,
    ) -> SchedulerResult<Vec<TaskRun>> {
        let rows = match (task_id, host_id) {
            (Some(task), Some(host)) => {
                sqlx::query(&format!(
                    "SELECT {RUN_COLUMNS} FROM scheduler_task_run \
                     WHERE task_id = $1 AND host_id = $2 ORDER BY id"
                ))
                .bind(task)
                .bind(host)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(task), None) => {
                sqlx::query(&format!(
                    "SELECT {RUN_COLUMNS} FROM scheduler_task_run WHERE task_id = $1 ORDER BY id"
                ))
                .bind(task)
                .fetch_all(&self.pool)
                .await?
            }
            (None, Some(host)) => {
                sqlx::query(&format!(
                    "SELECT {RUN_COLUMNS} FROM scheduler_task_run WHERE host_id = $1 ORDER BY id"
                ))
                .bind(host)
                .fetch_all(&self.pool)
                .await?
            }
            (None, None) => {
                sqlx::query(&format!(
                    "SELECT {RUN_COLUMNS} FROM scheduler_task_run ORDER BY id"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::row_to_task_run).collect()
    }

    #[instrument(skip(self))]
    async fn get_active_runs(&self) -> SchedulerResult<Vec<ActiveRun>> {
        let rows = sqlx::query(
            "SELECT r.id AS run_id, r.task_id, r.host_id AS run_host_id, \
                    r.state AS run_state, r.create_ts AS run_create_ts, r.start_ts, r.end_ts, \
                    t.method, t.channel_id, t.arch, t.weight, t.priority, \
                    t.state AS task_state, t.owner, t.parent, t.host_id AS task_host_id, \
                    t.create_ts AS task_create_ts, \
                    h.name AS host_name, h.last_update AS host_last_update \
             FROM scheduler_task_run r \
             JOIN task t ON t.id = r.task_id \
             LEFT JOIN host h ON h.id = r.host_id \
             WHERE r.state IN ('ASSIGNED', 'RUNNING') \
             ORDER BY r.id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut active = Vec::with_capacity(rows.len());
        for row in &rows {
            let run = TaskRun {
                id: row.try_get("run_id")?,
                task_id: row.try_get("task_id")?,
                host_id: row.try_get("run_host_id")?,
                state: row.try_get("run_state")?,
                create_ts: row.try_get("run_create_ts")?,
                start_ts: row.try_get("start_ts")?,
                end_ts: row.try_get("end_ts")?,
            };
            let task = Task {
                id: row.try_get("task_id")?,
                method: row.try_get("method")?,
                channel_id: row.try_get("channel_id")?,
                arch: row.try_get("arch")?,
                weight: row.try_get("weight")?,
                priority: row.try_get("priority")?,
                state: row.try_get("task_state")?,
                owner: row.try_get("owner")?,
                parent: row.try_get("parent")?,
                host_id: row.try_get("task_host_id")?,
                create_ts: row.try_get("task_create_ts")?,
            };
            active.push(ActiveRun {
                run,
                task,
                host_name: row.try_get("host_name")?,
                host_last_update: row.try_get("host_last_update")?,
            });
        }

        debug!("活跃运行实例 {} 个", active.len());
        Ok(active)
    }

    #[instrument(skip(self), fields(task_id = %task_id, host_id = %host_id))]
    async fn assign(
        &self,
        task_id: i64,
        host_id: i64,
        override_existing: bool,
    ) -> SchedulerResult<TaskRun> {
        let mut tx = self.pool.begin().await?;

        let state = Self::lock_task(&mut tx, task_id).await?;
        if state != TaskState::Free && !override_existing {
            return Err(SchedulerError::TaskAlreadyAssigned { id: task_id });
        }

        if let Some(active) = Self::lock_active_run(&mut tx, task_id).await? {
            if !override_existing {
                return Err(SchedulerError::TaskAlreadyAssigned { id: task_id });
            }
            Self::override_run(&mut tx, active.id).await?;
        }

        let row = sqlx::query(&format!(
            "INSERT INTO scheduler_task_run (task_id, host_id, state) \
             VALUES ($1, $2, 'ASSIGNED') RETURNING {RUN_COLUMNS}"
        ))
        .bind(task_id)
        .bind(host_id)
        .fetch_one(&mut *tx)
        .await?;
        let run = Self::row_to_task_run(&row)?;

        sqlx::query("UPDATE task SET state = 'ASSIGNED', host_id = $2 WHERE id = $1")
            .bind(task_id)
            .bind(host_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!("任务 {} 已分配给主机 {}", task_id, host_id);
        Ok(run)
    }

    #[instrument(skip(self), fields(task_id = %task_id, host_id = %host_id))]
    async fn open(&self, task_id: i64, host_id: i64) -> SchedulerResult<TaskRun> {
        let mut tx = self.pool.begin().await?;

        let state = Self::lock_task(&mut tx, task_id).await?;
        let active = Self::lock_active_run(&mut tx, task_id).await?;

        let run = match active {
            Some(run) if run.host_id == host_id => run,
            _ => return Err(SchedulerError::WrongHost { task_id, host_id }),
        };
        if state != TaskState::Assigned {
            return Err(SchedulerError::WrongHost { task_id, host_id });
        }

        let row = sqlx::query(&format!(
            "UPDATE scheduler_task_run SET state = 'RUNNING', start_ts = NOW() \
             WHERE id = $1 RETURNING {RUN_COLUMNS}"
        ))
        .bind(run.id)
        .fetch_one(&mut *tx)
        .await?;
        let run = Self::row_to_task_run(&row)?;

        sqlx::query("UPDATE task SET state = 'OPEN' WHERE id = $1")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!("主机 {} 确认任务 {}", host_id, task_id);
        Ok(run)
    }

    #[instrument(skip(self), fields(task_id = %task_id, host_id = %host_id, state = ?state))]
    async fn complete(
        &self,
        task_id: i64,
        host_id: i64,
        state: TaskState,
    ) -> SchedulerResult<TaskRun> {
        let run_state = match state {
            TaskState::Closed => TaskRunState::Done,
            TaskState::Failed | TaskState::Canceled => TaskRunState::Fail,
            other => {
                return Err(SchedulerError::validation_error(format!(
                    "非终态的任务状态: {other:?}"
                )))
            }
        };

        let mut tx = self.pool.begin().await?;

        Self::lock_task(&mut tx, task_id).await?;
        let active = Self::lock_active_run(&mut tx, task_id).await?;
        let run = match active {
            Some(run) if run.host_id == host_id => run,
            _ => return Err(SchedulerError::WrongHost { task_id, host_id }),
        };

        let row = sqlx::query(&format!(
            "UPDATE scheduler_task_run SET state = $2, end_ts = NOW() \
             WHERE id = $1 RETURNING {RUN_COLUMNS}"
        ))
        .bind(run.id)
        .bind(run_state)
        .fetch_one(&mut *tx)
        .await?;
        let run = Self::row_to_task_run(&row)?;

        sqlx::query("UPDATE task SET state = $2 WHERE id = $1")
            .bind(task_id)
            .bind(state)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!("任务 {} 在主机 {} 上终结为 {:?}", task_id, host_id, state);
        Ok(run)
    }

    #[instrument(skip(self), fields(run_id = %run_id, task_id = %task_id))]
    async fn expire_to_free(&self, run_id: i64, task_id: i64) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE scheduler_task_run SET state = 'OVERRIDE', end_ts = NOW() \
             WHERE id = $1 AND state IN ('ASSIGNED', 'RUNNING')",
        )
        .bind(run_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            // 另一个路径已经处理过这条记录
            return Ok(());
        }

        sqlx::query("UPDATE task SET state = 'FREE', host_id = NULL WHERE id = $1")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!("运行实例 {} 已回收，任务 {} 回到空闲状态", run_id, task_id);
        Ok(())
    }
}
