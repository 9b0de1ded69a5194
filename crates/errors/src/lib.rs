use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("调度器锁被其他进程持有: {name}")]
    LockBusy { name: String },
    #[error("任务已被分配: {id}")]
    TaskAlreadyAssigned { id: i64 },
    #[error("主机不匹配: 任务 {task_id} 未分配给主机 {host_id}")]
    WrongHost { task_id: i64, host_id: i64 },
    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },
    #[error("主机未找到: {id}")]
    HostNotFound { id: i64 },
    #[error("任务运行实例未找到: {id}")]
    TaskRunNotFound { id: i64 },
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn lock_busy<S: Into<String>>(name: S) -> Self {
        Self::LockBusy { name: name.into() }
    }
    pub fn task_not_found(id: i64) -> Self {
        Self::TaskNotFound { id }
    }
    pub fn host_not_found(id: i64) -> Self {
        Self::HostNotFound { id }
    }
    pub fn task_run_not_found(id: i64) -> Self {
        Self::TaskRunNotFound { id }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }

    /// RPC层使用的稳定数字错误码
    pub fn fault_code(&self) -> u32 {
        match self {
            SchedulerError::Database(_) | SchedulerError::DatabaseOperation(_) => 1001,
            SchedulerError::LockBusy { .. } => 1101,
            SchedulerError::TaskAlreadyAssigned { .. } => 1102,
            SchedulerError::WrongHost { .. } => 1103,
            SchedulerError::TaskNotFound { .. } => 1104,
            SchedulerError::HostNotFound { .. } => 1105,
            SchedulerError::TaskRunNotFound { .. } => 1106,
            SchedulerError::Configuration(_) => 1201,
            SchedulerError::Serialization(_) => 1301,
            SchedulerError::ValidationError(_) => 1302,
            SchedulerError::Internal(_) => 1999,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::Configuration(_) | SchedulerError::Internal(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::Database(_)
                | SchedulerError::DatabaseOperation(_)
                | SchedulerError::LockBusy { .. }
        )
    }

    pub fn user_message(&self) -> &str {
        match self {
            SchedulerError::TaskNotFound { .. } => "请求的任务不存在",
            SchedulerError::HostNotFound { .. } => "请求的构建主机不存在",
            SchedulerError::TaskRunNotFound { .. } => "请求的任务运行记录不存在",
            SchedulerError::TaskAlreadyAssigned { .. } => "任务已被其他主机占用",
            SchedulerError::WrongHost { .. } => "任务未分配给该主机",
            SchedulerError::LockBusy { .. } => "调度器正在其他进程中运行",
            SchedulerError::ValidationError(_) => "输入数据验证失败",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}
