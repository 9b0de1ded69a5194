//! 调度循环
//!
//! 单写者模型：tick 在名为 "scheduler" 的咨询锁保护下运行，
//! 未获取到锁的进程直接跳过。tick 内的任何单任务失败都被捕获并
//! 记录，不会中断剩余的调度，也不会使 hub 进程崩溃。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use kojihub_config::SchedulerConfig;
use kojihub_domain::entities::NewLogMessage;
use kojihub_domain::repositories::{
    ActiveRun, HostRepository, LogMessageRepository, RefusalRepository, SchedulerLock,
    SysDataRepository, TaskRepository, TaskRunRepository,
};
use kojihub_domain::{MethodRegistry, TaskRunState};
use kojihub_errors::SchedulerResult;

use crate::assignment::{AssignOutcome, AssignmentEngine};
use crate::host_registry::HostRegistry;
use crate::refusals::{ActiveRefusals, RefusalLedger};
use crate::task_pool::TaskPool;

/// 咨询锁名称
pub const SCHEDULER_LOCK: &str = "scheduler";

/// sys_data 里记录上次 tick 时间的键
const LAST_RUN_KEY: &str = "scheduler.last_run_ts";

/// 调度服务接口，doRun RPC 经由它触发 tick
#[async_trait]
pub trait SchedulerService: Send + Sync {
    /// 运行一次 tick。返回 false 表示本次被跳过（锁被占用或间隔未到）。
    async fn do_run(&self, force: bool) -> SchedulerResult<bool>;
}

pub struct TaskScheduler {
    host_repo: Arc<dyn HostRepository>,
    task_repo: Arc<dyn TaskRepository>,
    run_repo: Arc<dyn TaskRunRepository>,
    sys_repo: Arc<dyn SysDataRepository>,
    log_repo: Arc<dyn LogMessageRepository>,
    lock: Arc<dyn SchedulerLock>,
    pool: TaskPool,
    ledger: RefusalLedger,
    engine: AssignmentEngine,
    methods: MethodRegistry,
    config: SchedulerConfig,
}

impl TaskScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host_repo: Arc<dyn HostRepository>,
        task_repo: Arc<dyn TaskRepository>,
        run_repo: Arc<dyn TaskRunRepository>,
        refusal_repo: Arc<dyn RefusalRepository>,
        log_repo: Arc<dyn LogMessageRepository>,
        sys_repo: Arc<dyn SysDataRepository>,
        lock: Arc<dyn SchedulerLock>,
        methods: MethodRegistry,
        config: SchedulerConfig,
    ) -> Self {
        let pool = TaskPool::new(task_repo.clone(), run_repo.clone());
        let ledger = RefusalLedger::new(refusal_repo, config.soft_refusal_timeout_seconds);
        let engine = AssignmentEngine::new(run_repo.clone(), log_repo.clone());

        Self {
            host_repo,
            task_repo,
            run_repo,
            sys_repo,
            log_repo,
            lock,
            pool,
            ledger,
            engine,
            methods,
            config,
        }
    }

    pub fn ledger(&self) -> &RefusalLedger {
        &self.ledger
    }

    /// 运行一次 tick
    pub async fn run(&self, force: bool) -> SchedulerResult<bool> {
        let Some(guard) = self.lock.try_acquire(SCHEDULER_LOCK).await? else {
            debug!("调度锁被其他进程持有，跳过本次 tick");
            return Ok(false);
        };

        let result = self.run_locked(force).await;
        let released = guard.release().await;

        let ran = result?;
        released?;
        Ok(ran)
    }

    async fn run_locked(&self, force: bool) -> SchedulerResult<bool> {
        let now = Utc::now();

        if !force && !self.interval_elapsed(now).await? {
            debug!("距上次调度不足 {} 秒，跳过", self.config.run_interval_seconds);
            return Ok(false);
        }

        let hosts = self.host_repo.get_enabled_hosts().await?;
        let mut registry = HostRegistry::build(hosts);
        let mut refusals = self.ledger.snapshot(now).await?;
        let active = self.pool.active_runs().await?;

        debug!(
            "tick 快照: 主机 {} 台, 活跃运行实例 {} 个",
            registry.len(),
            active.len()
        );

        let mut handled: HashSet<i64> = HashSet::new();
        self.check_active_tasks(&active, &mut handled, &mut refusals, now)
            .await;
        self.check_hosts(&active, &mut handled, now).await;
        self.do_schedule(&mut registry, &refusals, now).await?;

        self.sys_repo
            .set(LAST_RUN_KEY, &json!(now.to_rfc3339()))
            .await?;

        Ok(true)
    }

    async fn interval_elapsed(&self, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let Some(value) = self.sys_repo.get(LAST_RUN_KEY).await? else {
            return Ok(true);
        };
        let Some(last_run) = value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        else {
            // 记录损坏时按已超期处理
            return Ok(true);
        };
        let elapsed = (now - last_run.with_timezone(&Utc)).num_seconds();
        Ok(elapsed >= self.config.run_interval_seconds as i64)
    }

    /// 超时与失联检测
    ///
    /// - ASSIGNED 超过 `assign_timeout` 未被主机确认：回收并合成一条
    ///   软拒绝，本 tick 内不再把任务分回同一主机。
    /// - RUNNING 而主机心跳超过 `host_timeout`：回收。
    ///
    /// 同时按运行实例修复任务行上不一致的 host_id。
    async fn check_active_tasks(
        &self,
        active: &[ActiveRun],
        handled: &mut HashSet<i64>,
        refusals: &mut ActiveRefusals,
        now: DateTime<Utc>,
    ) {
        for entry in active {
            if let Err(e) = self
                .check_active_run(entry, handled, refusals, now)
                .await
            {
                warn!(
                    "检查任务 {} 的运行实例 {} 出错: {}",
                    entry.task.id, entry.run.id, e
                );
            }
        }
    }

    async fn check_active_run(
        &self,
        entry: &ActiveRun,
        handled: &mut HashSet<i64>,
        refusals: &mut ActiveRefusals,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let run = &entry.run;
        let task = &entry.task;

        // 运行实例是事实来源
        if task.host_id != Some(run.host_id) {
            info!(
                "任务 {} 的 host_id ({:?}) 与运行实例不一致，回写为 {}",
                task.id, task.host_id, run.host_id
            );
            self.task_repo.reconcile_host(task.id, run.host_id).await?;
        }

        if run.state == TaskRunState::Assigned
            && run.seconds_since_create(now) > self.config.assign_timeout_seconds
        {
            info!(
                "任务 {} 在主机 {} 上超过 {} 秒未确认，回收",
                task.id, run.host_id, self.config.assign_timeout_seconds
            );
            self.expire_run(entry, "assignment timed out").await?;
            handled.insert(run.id);

            self.ledger
                .set_refusal(run.host_id, task.id, true, false, "assign timeout")
                .await?;
            refusals.note(task.id, run.host_id);
            return Ok(());
        }

        if run.state == TaskRunState::Running && self.host_silent(entry, now) {
            info!(
                "任务 {} 所在主机 {} 已失联，回收运行实例 {}",
                task.id, run.host_id, run.id
            );
            self.expire_run(entry, "host went silent").await?;
            handled.insert(run.id);
        }

        Ok(())
    }

    /// 失联主机清理
    ///
    /// 心跳超过 `host_timeout` 的主机，其余下的活跃运行实例全部回收，
    /// 任务回到 FREE 让其他主机接手。
    async fn check_hosts(
        &self,
        active: &[ActiveRun],
        handled: &mut HashSet<i64>,
        now: DateTime<Utc>,
    ) {
        for entry in active {
            if handled.contains(&entry.run.id) {
                continue;
            }
            if !self.host_silent(entry, now) {
                continue;
            }

            info!(
                "主机 {:?} (id {}) 心跳超时，回收任务 {}",
                entry.host_name, entry.run.host_id, entry.task.id
            );
            if let Err(e) = self.expire_run(entry, "host evicted").await {
                warn!("回收运行实例 {} 失败: {}", entry.run.id, e);
                continue;
            }
            handled.insert(entry.run.id);
        }
    }

    fn host_silent(&self, entry: &ActiveRun, now: DateTime<Utc>) -> bool {
        match entry.host_last_update {
            Some(last_update) => {
                (now - last_update).num_seconds() > self.config.host_timeout_seconds
            }
            // 主机已被禁用或删除
            None => true,
        }
    }

    async fn expire_run(&self, entry: &ActiveRun, reason: &str) -> SchedulerResult<()> {
        self.run_repo
            .expire_to_free(entry.run.id, entry.task.id)
            .await?;
        self.log_repo
            .append(
                &NewLogMessage::new(format!("task returned to free: {reason}"))
                    .with_task(entry.task.id)
                    .with_host(entry.run.host_id, entry.host_name.clone()),
            )
            .await?;
        Ok(())
    }

    /// 分配阶段
    ///
    /// 空闲任务按 (priority, create_ts, id) 顺序逐个尝试；候选主机来自
    /// 任务所在 bin，排除拒绝、容量和 maxjobs 限制后按预计负载比取最优。
    /// 没有候选主机的任务保持 FREE，不是错误。
    async fn do_schedule(
        &self,
        registry: &mut HostRegistry,
        refusals: &ActiveRefusals,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let free = self.pool.free_tasks().await?;
        if free.is_empty() {
            debug!("没有空闲任务");
            return Ok(());
        }

        info!("开始分配: 空闲任务 {} 个", free.len());
        let mut assigned = 0usize;

        for task in &free {
            let weight = self.methods.effective_weight(&task.method, task.weight);
            let bin = task.bin();

            let Some(host_id) =
                registry.select_host(&bin, weight, refusals.hosts_for(task.id), &self.config, now)
            else {
                debug!("任务 {} 在 bin {} 中没有可用主机", task.id, bin);
                continue;
            };
            let Some(host) = registry.host(host_id).cloned() else {
                continue;
            };

            match self.engine.assign(task, &host, false, false).await {
                Ok(AssignOutcome::Assigned(_)) => {
                    registry.note_assignment(host_id, weight);
                    assigned += 1;
                }
                Ok(AssignOutcome::Lost) => {
                    debug!("任务 {} 被并发路径抢先分配", task.id);
                }
                Err(e) => {
                    warn!("分配任务 {} 到主机 {} 失败: {}", task.id, host.name, e);
                }
            }
        }

        info!("本次调度完成，共分配 {} 个任务", assigned);
        Ok(())
    }
}

#[async_trait]
impl SchedulerService for TaskScheduler {
    async fn do_run(&self, force: bool) -> SchedulerResult<bool> {
        self.run(force).await
    }
}
