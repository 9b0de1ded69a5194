//! 调度中心核心领域模型
//!
//! 定义构建主机、任务、任务运行实例、拒绝记录等业务实体以及
//! 数据访问的抽象接口。该层不依赖具体的存储实现。

pub mod bins;
pub mod entities;
pub mod method_weights;
pub mod repositories;

pub use bins::{bin_key, host_bins, task_bin, NOARCH};
pub use entities::{
    Host, HostDataEntry, HostSelfReport, LogMessage, NewLogMessage, Refusal, SysDataEntry, Task,
    TaskRun, TaskRunState, TaskState,
};
pub use method_weights::MethodRegistry;
pub use repositories::{
    ActiveRun, HostDataRepository, HostRepository, LockGuard, LogFilter, LogMessageRepository,
    RefusalRepository, SchedulerLock, SysDataRepository, TaskRepository, TaskRunRepository,
};
