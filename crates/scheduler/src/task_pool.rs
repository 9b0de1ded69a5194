//! 任务池
//!
//! 每个 tick 从持久层取两份快照：空闲任务（按优先级排序）和活跃
//! 运行实例（带任务与主机心跳的联查）。tick 内不再回查数据库，
//! 所有分配共享同一快照加内存修正。

use std::collections::HashMap;
use std::sync::Arc;

use kojihub_domain::entities::Task;
use kojihub_domain::repositories::{ActiveRun, TaskRepository, TaskRunRepository};
use kojihub_errors::SchedulerResult;

pub struct TaskPool {
    task_repo: Arc<dyn TaskRepository>,
    run_repo: Arc<dyn TaskRunRepository>,
}

impl TaskPool {
    pub fn new(task_repo: Arc<dyn TaskRepository>, run_repo: Arc<dyn TaskRunRepository>) -> Self {
        Self {
            task_repo,
            run_repo,
        }
    }

    /// 空闲任务，排序由存储层保证：(priority, create_ts, id)
    pub async fn free_tasks(&self) -> SchedulerResult<Vec<Task>> {
        self.task_repo.get_free_tasks().await
    }

    /// 活跃运行实例及其任务、主机心跳
    pub async fn active_runs(&self) -> SchedulerResult<Vec<ActiveRun>> {
        self.run_repo.get_active_runs().await
    }

    /// 按 bin 归类任务，日志和诊断用
    pub fn classify_by_bin(tasks: &[Task]) -> HashMap<String, usize> {
        let mut bins: HashMap<String, usize> = HashMap::new();
        for task in tasks {
            *bins.entry(task.bin()).or_default() += 1;
        }
        bins
    }
}
