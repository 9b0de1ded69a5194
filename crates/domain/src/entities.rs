//! Domain Entities
//!
//! 核心领域实体定义，包含构建主机、任务、任务运行实例、拒绝记录等
//! 调度核心概念。这些实体是系统的核心业务模型，不依赖于外部技术实现。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bins::{host_bins, task_bin};

// ============================================================================
// 主机相关实体
// ============================================================================

/// 构建主机
///
/// 表示一台可以领取并执行构建任务的远程主机。
///
/// # 字段说明
///
/// - `id`: 主机的唯一标识符
/// - `user_id`: 主机对应的系统账号
/// - `name`: 主机名
/// - `arches`: 空格分隔的体系结构列表，如 "x86_64 aarch64"
/// - `channels`: 主机所属的频道 ID 集合
/// - `capacity`: 主机容量（可承载的任务权重之和）
/// - `task_load`: 主机当前负载（活跃任务权重之和）
/// - `ready`: 主机是否声明可以接收新任务
/// - `enabled`: 主机是否在管理上启用
/// - `last_update`: 主机最近一次心跳时间
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub user_id: Option<i64>,
    pub name: String,
    pub arches: String,
    pub channels: Vec<i64>,
    pub capacity: f64,
    pub task_load: f64,
    pub ready: bool,
    pub enabled: bool,
    pub description: Option<String>,
    pub comment: Option<String>,
    pub last_update: DateTime<Utc>,
}

impl Host {
    /// 主机声明的体系结构列表
    pub fn arch_list(&self) -> Vec<&str> {
        self.arches.split_whitespace().collect()
    }

    /// 主机覆盖的全部 bin（频道 × 体系结构，外加 noarch bin）
    pub fn bins(&self) -> Vec<String> {
        host_bins(&self.channels, &self.arches)
    }

    /// 距上次心跳的秒数
    pub fn seconds_since_update(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_update).num_seconds()
    }

    /// 主机是否可以参与新任务分配
    ///
    /// ready 标志只在 `ready_timeout` 心跳窗口内有效。
    pub fn is_eligible(&self, now: DateTime<Utc>, ready_timeout_seconds: i64) -> bool {
        self.enabled && self.ready && self.seconds_since_update(now) <= ready_timeout_seconds
    }

    /// 心跳是否已超出 `host_timeout`，超出的主机其活跃任务会被回收
    pub fn is_stale(&self, now: DateTime<Utc>, host_timeout_seconds: i64) -> bool {
        self.seconds_since_update(now) > host_timeout_seconds
    }
}

/// 主机自报数据
///
/// `setHostData` 提交的文档中调度器关心的字段，未知字段原样保留在
/// `scheduler_host_data` 表里供策略评估使用。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSelfReport {
    pub capacity: Option<f64>,
    pub task_load: Option<f64>,
    pub arches: Option<String>,
    pub channels: Option<Vec<i64>>,
    pub ready: Option<bool>,
}

impl HostSelfReport {
    pub fn from_data(data: &serde_json::Value) -> Self {
        serde_json::from_value(data.clone()).unwrap_or_default()
    }
}

/// 主机自报文档存储条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDataEntry {
    pub host_id: i64,
    pub data: serde_json::Value,
}

// ============================================================================
// 任务相关实体
// ============================================================================

/// 构建任务
///
/// 调度器将任务视为不透明记录，只关心 id、方法名、频道、体系结构、
/// 权重与优先级；任务参数由任务处理器解释，不进入调度决策。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub method: String,
    pub channel_id: i64,
    /// None 表示 noarch 任务，可在任意体系结构的主机上执行
    pub arch: Option<String>,
    pub weight: f64,
    /// 数值越小越先调度
    pub priority: i32,
    pub state: TaskState,
    pub owner: i64,
    pub parent: Option<i64>,
    pub host_id: Option<i64>,
    pub create_ts: DateTime<Utc>,
}

impl Task {
    /// 任务所属的 bin，形如 `"1:x86_64"` 或 `"1:noarch"`
    pub fn bin(&self) -> String {
        task_bin(self.channel_id, self.arch.as_deref())
    }

    pub fn is_free(&self) -> bool {
        matches!(self.state, TaskState::Free)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            TaskState::Closed | TaskState::Canceled | TaskState::Failed
        )
    }
}

/// 任务状态
///
/// 只有 FREE 和 ASSIGNED 状态的任务对调度器可见；终态任务可以在
/// 带外操作下回到 FREE（重新提交），调度器无需特殊处理。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskState {
    #[serde(rename = "FREE")]
    Free,
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "ASSIGNED")]
    Assigned,
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "CANCELED")]
    Canceled,
    #[serde(rename = "FAILED")]
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Free => "FREE",
            TaskState::Open => "OPEN",
            TaskState::Assigned => "ASSIGNED",
            TaskState::Closed => "CLOSED",
            TaskState::Canceled => "CANCELED",
            TaskState::Failed => "FAILED",
        }
    }
}

// SQLx 数据库类型支持 - TaskState
impl sqlx::Type<sqlx::Postgres> for TaskState {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskState {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "FREE" => Ok(TaskState::Free),
            "OPEN" => Ok(TaskState::Open),
            "ASSIGNED" => Ok(TaskState::Assigned),
            "CLOSED" => Ok(TaskState::Closed),
            "CANCELED" => Ok(TaskState::Canceled),
            "FAILED" => Ok(TaskState::Failed),
            _ => Err(format!("Invalid task state: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskState {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

// ============================================================================
// 任务运行相关实体
// ============================================================================

/// 任务运行实例
///
/// 一次 (任务, 主机) 分配的记录。任务可以累积多条历史运行记录，
/// 但任一时刻最多有一条活跃记录（ASSIGNED 或 RUNNING）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: i64,
    pub task_id: i64,
    pub host_id: i64,
    pub state: TaskRunState,
    pub create_ts: DateTime<Utc>,
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
}

impl TaskRun {
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// 分配后尚未被主机确认的秒数
    pub fn seconds_since_create(&self, now: DateTime<Utc>) -> i64 {
        (now - self.create_ts).num_seconds()
    }
}

/// 任务运行状态
///
/// OVERRIDE 表示该运行记录被新的分配或主机回收取代。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskRunState {
    #[serde(rename = "ASSIGNED")]
    Assigned,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "OVERRIDE")]
    Override,
}

impl TaskRunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskRunState::Assigned => "ASSIGNED",
            TaskRunState::Running => "RUNNING",
            TaskRunState::Done => "DONE",
            TaskRunState::Fail => "FAIL",
            TaskRunState::Override => "OVERRIDE",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TaskRunState::Assigned | TaskRunState::Running)
    }
}

// SQLx 数据库类型支持 - TaskRunState
impl sqlx::Type<sqlx::Postgres> for TaskRunState {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskRunState {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "ASSIGNED" => Ok(TaskRunState::Assigned),
            "RUNNING" => Ok(TaskRunState::Running),
            "DONE" => Ok(TaskRunState::Done),
            "FAIL" => Ok(TaskRunState::Fail),
            "OVERRIDE" => Ok(TaskRunState::Override),
            _ => Err(format!("Invalid task run state: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskRunState {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

// ============================================================================
// 拒绝记录
// ============================================================================

/// 主机对任务的拒绝记录
///
/// 软拒绝在 `soft_refusal_timeout` 后过期（查询时忽略，任务终结时
/// 才删除）；硬拒绝对该 (主机, 任务) 组合永久有效。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refusal {
    pub host_id: i64,
    pub task_id: i64,
    pub soft: bool,
    /// 是否由主机主动提交（false 表示调度器合成的拒绝，如分配超时）
    pub by_host: bool,
    pub msg: String,
    pub ts: DateTime<Utc>,
}

impl Refusal {
    /// 拒绝是否仍然阻止分配
    pub fn is_active(&self, now: DateTime<Utc>, soft_timeout_seconds: i64) -> bool {
        !self.soft || (now - self.ts).num_seconds() < soft_timeout_seconds
    }
}

// ============================================================================
// 调度事件日志
// ============================================================================

/// 调度器事件日志条目，只追加不修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub task_id: Option<i64>,
    pub host_id: Option<i64>,
    pub host_name: Option<String>,
    pub msg: String,
}

/// 待写入的日志条目
#[derive(Debug, Clone, Default)]
pub struct NewLogMessage {
    pub task_id: Option<i64>,
    pub host_id: Option<i64>,
    pub host_name: Option<String>,
    pub msg: String,
}

impl NewLogMessage {
    pub fn new<S: Into<String>>(msg: S) -> Self {
        Self {
            msg: msg.into(),
            ..Default::default()
        }
    }

    pub fn with_task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_host(mut self, host_id: i64, host_name: Option<String>) -> Self {
        self.host_id = Some(host_id);
        self.host_name = host_name;
        self
    }
}

/// 调度器键值状态条目（如上次调度时间）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SysDataEntry {
    pub name: String,
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_host() -> Host {
        Host {
            id: 1,
            user_id: Some(10),
            name: "builder-01".to_string(),
            arches: "x86_64 aarch64".to_string(),
            channels: vec![1, 2],
            capacity: 4.0,
            task_load: 0.0,
            ready: true,
            enabled: true,
            description: None,
            comment: None,
            last_update: Utc::now(),
        }
    }

    #[test]
    fn test_host_arch_list() {
        let host = sample_host();
        assert_eq!(host.arch_list(), vec!["x86_64", "aarch64"]);
    }

    #[test]
    fn test_host_eligibility_window() {
        let now = Utc::now();
        let mut host = sample_host();

        host.last_update = now - Duration::seconds(60);
        assert!(host.is_eligible(now, 180));

        // 心跳过旧，ready 标志失效
        host.last_update = now - Duration::seconds(200);
        assert!(!host.is_eligible(now, 180));

        // 未就绪或未启用的主机不参与分配
        host.last_update = now;
        host.ready = false;
        assert!(!host.is_eligible(now, 180));
        host.ready = true;
        host.enabled = false;
        assert!(!host.is_eligible(now, 180));
    }

    #[test]
    fn test_host_staleness() {
        let now = Utc::now();
        let mut host = sample_host();
        host.last_update = now - Duration::seconds(901);
        assert!(host.is_stale(now, 900));
        host.last_update = now - Duration::seconds(10);
        assert!(!host.is_stale(now, 900));
    }

    #[test]
    fn test_task_bin() {
        let task = Task {
            id: 1,
            method: "build".to_string(),
            channel_id: 3,
            arch: Some("x86_64".to_string()),
            weight: 1.0,
            priority: 5,
            state: TaskState::Free,
            owner: 1,
            parent: None,
            host_id: None,
            create_ts: Utc::now(),
        };
        assert_eq!(task.bin(), "3:x86_64");

        let noarch = Task {
            arch: None,
            ..task.clone()
        };
        assert_eq!(noarch.bin(), "3:noarch");
    }

    #[test]
    fn test_task_run_active_states() {
        assert!(TaskRunState::Assigned.is_active());
        assert!(TaskRunState::Running.is_active());
        assert!(!TaskRunState::Done.is_active());
        assert!(!TaskRunState::Fail.is_active());
        assert!(!TaskRunState::Override.is_active());
    }

    #[test]
    fn test_refusal_expiry() {
        let now = Utc::now();
        let mut refusal = Refusal {
            host_id: 1,
            task_id: 2,
            soft: true,
            by_host: true,
            msg: "load too high".to_string(),
            ts: now - Duration::seconds(60),
        };
        assert!(refusal.is_active(now, 900));

        refusal.ts = now - Duration::seconds(901);
        assert!(!refusal.is_active(now, 900));

        // 硬拒绝永不过期
        refusal.soft = false;
        assert!(refusal.is_active(now, 900));
    }

    #[test]
    fn test_host_self_report_partial_document() {
        let data = serde_json::json!({
            "capacity": 8.0,
            "ready": true,
            "os": "fedora-42"
        });
        let report = HostSelfReport::from_data(&data);
        assert_eq!(report.capacity, Some(8.0));
        assert_eq!(report.ready, Some(true));
        assert!(report.arches.is_none());
        assert!(report.channels.is_none());
    }
}
