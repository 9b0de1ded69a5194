//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则。Postgres 实现位于
//! 基础设施层；测试使用内存 mock 实现。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{
    Host, HostDataEntry, HostSelfReport, LogMessage, NewLogMessage, Refusal, Task, TaskRun,
    TaskState,
};
use kojihub_errors::SchedulerResult;

/// 活跃运行实例视图
///
/// `check_active_tasks` 用到的联查结果：运行实例、所属任务以及
/// 主机的心跳信息。主机可能已被禁用或删除，相关字段为 None。
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub run: TaskRun,
    pub task: Task,
    pub host_name: Option<String>,
    pub host_last_update: Option<DateTime<Utc>>,
}

/// 日志查询过滤条件
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub task_id: Option<i64>,
    pub host_id: Option<i64>,
    pub limit: Option<i64>,
}

/// 主机仓储抽象
#[async_trait]
pub trait HostRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Host>>;
    async fn get_by_name(&self, name: &str) -> SchedulerResult<Option<Host>>;
    /// 所有启用的主机，调度快照的数据源
    async fn get_enabled_hosts(&self) -> SchedulerResult<Vec<Host>>;
    /// 返回主机的 ASSIGNED 任务，并在同一事务中刷新心跳时间。
    /// 主机以此作为心跳，幂等且可高频调用。
    async fn poll_assigned_tasks(&self, host_id: i64) -> SchedulerResult<Vec<Task>>;
    /// 将主机自报数据回写到主机行，同时刷新心跳
    async fn update_from_data(&self, host_id: i64, report: &HostSelfReport)
        -> SchedulerResult<()>;
}

/// 任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>>;
    /// FREE 状态且没有活跃运行实例的任务，
    /// 按 (priority ASC, create_ts ASC, id ASC) 排序
    async fn get_free_tasks(&self) -> SchedulerResult<Vec<Task>>;
    async fn set_state(&self, id: i64, state: TaskState) -> SchedulerResult<()>;
    /// 以运行实例为准回写任务行的 host_id（部分失败后的修复）
    async fn reconcile_host(&self, id: i64, host_id: i64) -> SchedulerResult<()>;
}

/// 任务运行仓储抽象
#[async_trait]
pub trait TaskRunRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskRun>>;
    async fn get_by_task_id(&self, task_id: i64) -> SchedulerResult<Vec<TaskRun>>;
    async fn get_filtered(
        &self,
        task_id: Option<i64>,
        host_id: Option<i64>,
    ) -> SchedulerResult<Vec<TaskRun>>;
    /// 所有活跃（ASSIGNED/RUNNING）运行实例及其任务与主机心跳
    async fn get_active_runs(&self) -> SchedulerResult<Vec<ActiveRun>>;

    /// 单事务完成一次分配：
    /// 任务行 FOR UPDATE；非 FREE 且未请求覆盖则返回
    /// `TaskAlreadyAssigned`；已有活跃运行实例时按覆盖语义处理；
    /// 插入 ASSIGNED 运行实例并把任务置为 ASSIGNED。
    async fn assign(
        &self,
        task_id: i64,
        host_id: i64,
        override_existing: bool,
    ) -> SchedulerResult<TaskRun>;

    /// ASSIGNED → OPEN，仅当活跃运行实例属于该主机，否则 `WrongHost`。
    /// 运行实例进入 RUNNING 并记录 start_ts。
    async fn open(&self, task_id: i64, host_id: i64) -> SchedulerResult<TaskRun>;

    /// 终结任务：活跃运行实例必须属于该主机，否则 `WrongHost`。
    /// 运行实例按任务终态记为 DONE/FAIL 并记录 end_ts。
    async fn complete(
        &self,
        task_id: i64,
        host_id: i64,
        state: TaskState,
    ) -> SchedulerResult<TaskRun>;

    /// 单事务回收：运行实例记为 OVERRIDE，任务回到 FREE
    async fn expire_to_free(&self, run_id: i64, task_id: i64) -> SchedulerResult<()>;
}

/// 拒绝记录仓储抽象
#[async_trait]
pub trait RefusalRepository: Send + Sync {
    /// 插入或替换 (host, task) 拒绝记录
    async fn upsert(&self, refusal: &Refusal) -> SchedulerResult<()>;
    async fn get_for_task(&self, task_id: i64) -> SchedulerResult<Vec<Refusal>>;
    async fn get_filtered(
        &self,
        task_id: Option<i64>,
        host_id: Option<i64>,
    ) -> SchedulerResult<Vec<Refusal>>;
    /// 每个任务当前生效的拒绝主机集合。
    /// 生效 = 硬拒绝，或软拒绝仍在 `soft_refusal_timeout` 窗口内。
    /// 过期的软拒绝只被忽略，不在这里删除。
    async fn active_by_task(
        &self,
        now: DateTime<Utc>,
        soft_timeout_seconds: i64,
    ) -> SchedulerResult<HashMap<i64, HashSet<i64>>>;
    /// 任务终结时清理其全部拒绝记录
    async fn purge_for_task(&self, task_id: i64) -> SchedulerResult<u64>;
}

/// 主机自报数据仓储抽象
#[async_trait]
pub trait HostDataRepository: Send + Sync {
    async fn get(&self, host_id: i64) -> SchedulerResult<Option<HostDataEntry>>;
    async fn set(&self, host_id: i64, data: &serde_json::Value) -> SchedulerResult<()>;
}

/// 调度事件日志仓储抽象
#[async_trait]
pub trait LogMessageRepository: Send + Sync {
    async fn append(&self, message: &NewLogMessage) -> SchedulerResult<()>;
    async fn list(&self, filter: &LogFilter) -> SchedulerResult<Vec<LogMessage>>;
}

/// 调度器键值状态仓储抽象
#[async_trait]
pub trait SysDataRepository: Send + Sync {
    async fn get(&self, name: &str) -> SchedulerResult<Option<serde_json::Value>>;
    async fn set(&self, name: &str, data: &serde_json::Value) -> SchedulerResult<()>;
}

/// 调度器单写者锁
///
/// 每个 tick 获取一次、结束时释放；未获取到锁说明另一个 hub 进程
/// 正在调度，本次 tick 直接跳过。
#[async_trait]
pub trait SchedulerLock: Send + Sync {
    async fn try_acquire(&self, name: &str) -> SchedulerResult<Option<Box<dyn LockGuard>>>;
}

/// 锁守卫，必须显式释放
#[async_trait]
pub trait LockGuard: Send {
    async fn release(self: Box<Self>) -> SchedulerResult<()>;
}
