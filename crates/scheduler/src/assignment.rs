//! 分配引擎
//!
//! 对单个 (任务, 主机) 组合执行一次事务性分配。竞争失败不是错误，
//! 调用方记录后跳过该任务即可。

use std::sync::Arc;

use tracing::{debug, info};

use kojihub_domain::entities::{Host, NewLogMessage, Task, TaskRun};
use kojihub_domain::repositories::{LogMessageRepository, TaskRunRepository};
use kojihub_errors::{SchedulerError, SchedulerResult};

/// 一次分配尝试的结果
#[derive(Debug)]
pub enum AssignOutcome {
    /// 分配成功，返回新建的运行实例
    Assigned(TaskRun),
    /// 竞争失败：任务已被其他路径占用
    Lost,
}

pub struct AssignmentEngine {
    run_repo: Arc<dyn TaskRunRepository>,
    log_repo: Arc<dyn LogMessageRepository>,
}

impl AssignmentEngine {
    pub fn new(
        run_repo: Arc<dyn TaskRunRepository>,
        log_repo: Arc<dyn LogMessageRepository>,
    ) -> Self {
        Self { run_repo, log_repo }
    }

    /// 分配任务到主机
    ///
    /// `force` 跳过主机合格性检查（管理员 assignTask 使用）；
    /// `override_existing` 把已有的活跃运行实例记为 OVERRIDE。
    pub async fn assign(
        &self,
        task: &Task,
        host: &Host,
        force: bool,
        override_existing: bool,
    ) -> SchedulerResult<AssignOutcome> {
        if !force && !(host.enabled && host.ready) {
            return Err(SchedulerError::validation_error(format!(
                "主机 {} 当前不可接收任务",
                host.name
            )));
        }

        match self
            .run_repo
            .assign(task.id, host.id, override_existing)
            .await
        {
            Ok(run) => {
                info!("任务 {} 已分配给主机 {}", task.id, host.name);
                self.log_repo
                    .append(
                        &NewLogMessage::new(format!(
                            "task assigned to host {} (method {})",
                            host.name, task.method
                        ))
                        .with_task(task.id)
                        .with_host(host.id, Some(host.name.clone())),
                    )
                    .await?;
                Ok(AssignOutcome::Assigned(run))
            }
            Err(SchedulerError::TaskAlreadyAssigned { id }) => {
                debug!("任务 {} 分配竞争失败", id);
                Ok(AssignOutcome::Lost)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kojihub_domain::entities::{TaskRunState, TaskState};

    // 共享状态的 mock 在 testing-utils 里，这里用最小的桩实现
    // 验证引擎自身的分支逻辑。
    use async_trait::async_trait;
    use chrono::Utc;
    use kojihub_domain::repositories::{ActiveRun, LogFilter};
    use kojihub_domain::{LogMessage, NewLogMessage};
    use std::sync::Mutex;

    struct StubRunRepo {
        result: Mutex<Option<SchedulerResult<TaskRun>>>,
    }

    #[async_trait]
    impl TaskRunRepository for StubRunRepo {
        async fn get_by_id(&self, _id: i64) -> SchedulerResult<Option<TaskRun>> {
            Ok(None)
        }
        async fn get_by_task_id(&self, _task_id: i64) -> SchedulerResult<Vec<TaskRun>> {
            Ok(vec![])
        }
        async fn get_filtered(
            &self,
            _task_id: Option<i64>,
            _host_id: Option<i64>,
        ) -> SchedulerResult<Vec<TaskRun>> {
            Ok(vec![])
        }
        async fn get_active_runs(&self) -> SchedulerResult<Vec<ActiveRun>> {
            Ok(vec![])
        }
        async fn assign(
            &self,
            _task_id: i64,
            _host_id: i64,
            _override_existing: bool,
        ) -> SchedulerResult<TaskRun> {
            self.result.lock().unwrap().take().unwrap()
        }
        async fn open(&self, task_id: i64, host_id: i64) -> SchedulerResult<TaskRun> {
            Err(SchedulerError::WrongHost { task_id, host_id })
        }
        async fn complete(
            &self,
            task_id: i64,
            host_id: i64,
            _state: TaskState,
        ) -> SchedulerResult<TaskRun> {
            Err(SchedulerError::WrongHost { task_id, host_id })
        }
        async fn expire_to_free(&self, _run_id: i64, _task_id: i64) -> SchedulerResult<()> {
            Ok(())
        }
    }

    struct StubLogRepo {
        messages: Mutex<Vec<NewLogMessage>>,
    }

    #[async_trait]
    impl LogMessageRepository for StubLogRepo {
        async fn append(&self, message: &NewLogMessage) -> SchedulerResult<()> {
            self.messages.lock().unwrap().push(message.clone());
            Ok(())
        }
        async fn list(&self, _filter: &LogFilter) -> SchedulerResult<Vec<LogMessage>> {
            Ok(vec![])
        }
    }

    fn sample_task() -> Task {
        Task {
            id: 7,
            method: "build".to_string(),
            channel_id: 1,
            arch: Some("x86_64".to_string()),
            weight: 1.0,
            priority: 5,
            state: TaskState::Free,
            owner: 1,
            parent: None,
            host_id: None,
            create_ts: Utc::now(),
        }
    }

    fn sample_host(ready: bool) -> Host {
        Host {
            id: 3,
            user_id: None,
            name: "builder-03".to_string(),
            arches: "x86_64".to_string(),
            channels: vec![1],
            capacity: 4.0,
            task_load: 0.0,
            ready,
            enabled: true,
            description: None,
            comment: None,
            last_update: Utc::now(),
        }
    }

    fn sample_run() -> TaskRun {
        TaskRun {
            id: 1,
            task_id: 7,
            host_id: 3,
            state: TaskRunState::Assigned,
            create_ts: Utc::now(),
            start_ts: None,
            end_ts: None,
        }
    }

    #[tokio::test]
    async fn test_assign_success_emits_log() {
        let run_repo = Arc::new(StubRunRepo {
            result: Mutex::new(Some(Ok(sample_run()))),
        });
        let log_repo = Arc::new(StubLogRepo {
            messages: Mutex::new(vec![]),
        });
        let engine = AssignmentEngine::new(run_repo, log_repo.clone());

        let outcome = engine
            .assign(&sample_task(), &sample_host(true), false, false)
            .await
            .unwrap();
        assert!(matches!(outcome, AssignOutcome::Assigned(_)));

        let messages = log_repo.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].task_id, Some(7));
        assert_eq!(messages[0].host_id, Some(3));
    }

    #[tokio::test]
    async fn test_lost_race_is_not_an_error() {
        let run_repo = Arc::new(StubRunRepo {
            result: Mutex::new(Some(Err(SchedulerError::TaskAlreadyAssigned { id: 7 }))),
        });
        let log_repo = Arc::new(StubLogRepo {
            messages: Mutex::new(vec![]),
        });
        let engine = AssignmentEngine::new(run_repo, log_repo.clone());

        let outcome = engine
            .assign(&sample_task(), &sample_host(true), false, false)
            .await
            .unwrap();
        assert!(matches!(outcome, AssignOutcome::Lost));
        assert!(log_repo.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unready_host_rejected_unless_forced() {
        let run_repo = Arc::new(StubRunRepo {
            result: Mutex::new(Some(Ok(sample_run()))),
        });
        let log_repo = Arc::new(StubLogRepo {
            messages: Mutex::new(vec![]),
        });
        let engine = AssignmentEngine::new(run_repo, log_repo);

        let err = engine
            .assign(&sample_task(), &sample_host(false), false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ValidationError(_)));

        // force 跳过合格性检查
        let outcome = engine
            .assign(&sample_task(), &sample_host(false), true, false)
            .await
            .unwrap();
        assert!(matches!(outcome, AssignOutcome::Assigned(_)));
    }
}
