use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use kojihub_domain::entities::{Task, TaskState};
use kojihub_domain::repositories::TaskRepository;
use kojihub_errors::{SchedulerError, SchedulerResult};

pub(super) const TASK_COLUMNS: &str = "id, method, channel_id, arch, weight, priority, state, \
                                       owner, parent, host_id, create_ts";

pub(super) fn row_to_task(row: &sqlx::postgres::PgRow) -> SchedulerResult<Task> {
    Ok(Task {
        id: row.try_get("id")?,
        method: row.try_get("method")?,
        channel_id: row.try_get("channel_id")?,
        arch: row.try_get("arch")?,
        weight: row.try_get("weight")?,
        priority: row.try_get("priority")?,
        state: row.try_get("state")?,
        owner: row.try_get("owner")?,
        parent: row.try_get("parent")?,
        host_id: row.try_get("host_id")?,
        create_ts: row.try_get("create_ts")?,
    })
}

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM task WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn get_free_tasks(&self) -> SchedulerResult<Vec<Task>> {
        // 排序是权威的：优先级、创建时间，最后按 id 破平
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM task t \
             WHERE t.state = 'FREE' \
               AND NOT EXISTS (SELECT 1 FROM scheduler_task_run r \
                               WHERE r.task_id = t.id \
                                 AND r.state IN ('ASSIGNED', 'RUNNING')) \
             ORDER BY t.priority ASC, t.create_ts ASC, t.id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let tasks: SchedulerResult<Vec<Task>> = rows.iter().map(row_to_task).collect();
        let tasks = tasks?;
        debug!("空闲任务 {} 个", tasks.len());
        Ok(tasks)
    }

    #[instrument(skip(self), fields(task_id = %id, state = ?state))]
    async fn set_state(&self, id: i64, state: TaskState) -> SchedulerResult<()> {
        let result = sqlx::query("UPDATE task SET state = $2 WHERE id = $1")
            .bind(id)
            .bind(state)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::task_not_found(id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %id, host_id = %host_id))]
    async fn reconcile_host(&self, id: i64, host_id: i64) -> SchedulerResult<()> {
        // 运行实例是事实来源，任务行只是回写
        let result = sqlx::query("UPDATE task SET host_id = $2 WHERE id = $1")
            .bind(id)
            .bind(host_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::task_not_found(id));
        }
        debug!("任务 {} 的 host_id 已回写为 {}", id, host_id);
        Ok(())
    }
}
