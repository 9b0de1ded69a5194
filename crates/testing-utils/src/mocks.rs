//! Mock implementations for all repository and service traits
//!
//! 所有 mock 仓储共享同一个内存状态，这样 `assign`/`open` 这类跨表
//! 事务语义在单元测试里和数据库实现保持一致。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use kojihub_domain::entities::{
    Host, HostDataEntry, HostSelfReport, LogMessage, NewLogMessage, Refusal, Task, TaskRun,
    TaskRunState, TaskState,
};
use kojihub_domain::repositories::{
    ActiveRun, HostDataRepository, HostRepository, LockGuard, LogFilter, LogMessageRepository,
    RefusalRepository, SchedulerLock, SysDataRepository, TaskRepository, TaskRunRepository,
};
use kojihub_errors::{SchedulerError, SchedulerResult};

#[derive(Debug, Default)]
struct MockState {
    hosts: HashMap<i64, Host>,
    tasks: HashMap<i64, Task>,
    runs: HashMap<i64, TaskRun>,
    next_run_id: i64,
    refusals: HashMap<(i64, i64), Refusal>,
    host_data: HashMap<i64, serde_json::Value>,
    logs: Vec<LogMessage>,
    next_log_id: i64,
    sys_data: HashMap<String, serde_json::Value>,
}

/// 共享的内存数据库
#[derive(Debug, Clone)]
pub struct MockDb {
    state: Arc<Mutex<MockState>>,
}

impl MockDb {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_run_id: 1,
                next_log_id: 1,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn insert_host(&self, host: Host) {
        self.lock().hosts.insert(host.id, host);
    }

    pub fn insert_task(&self, task: Task) {
        self.lock().tasks.insert(task.id, task);
    }

    pub fn insert_run(&self, run: TaskRun) {
        let mut state = self.lock();
        state.next_run_id = state.next_run_id.max(run.id + 1);
        state.runs.insert(run.id, run);
    }

    pub fn insert_refusal(&self, refusal: Refusal) {
        self.lock()
            .refusals
            .insert((refusal.host_id, refusal.task_id), refusal);
    }

    pub fn task(&self, id: i64) -> Option<Task> {
        self.lock().tasks.get(&id).cloned()
    }

    pub fn host(&self, id: i64) -> Option<Host> {
        self.lock().hosts.get(&id).cloned()
    }

    pub fn runs_for_task(&self, task_id: i64) -> Vec<TaskRun> {
        let mut runs: Vec<TaskRun> = self
            .lock()
            .runs
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.id);
        runs
    }

    pub fn refusal(&self, host_id: i64, task_id: i64) -> Option<Refusal> {
        self.lock().refusals.get(&(host_id, task_id)).cloned()
    }

    pub fn log_messages(&self) -> Vec<LogMessage> {
        self.lock().logs.clone()
    }
}

impl Default for MockDb {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// 主机仓储 mock
// ============================================================================

pub struct MockHostRepository {
    db: MockDb,
}

impl MockHostRepository {
    pub fn new(db: MockDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HostRepository for MockHostRepository {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Host>> {
        Ok(self.db.lock().hosts.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> SchedulerResult<Option<Host>> {
        Ok(self
            .db
            .lock()
            .hosts
            .values()
            .find(|h| h.name == name)
            .cloned())
    }

    async fn get_enabled_hosts(&self) -> SchedulerResult<Vec<Host>> {
        let mut hosts: Vec<Host> = self
            .db
            .lock()
            .hosts
            .values()
            .filter(|h| h.enabled)
            .cloned()
            .collect();
        hosts.sort_by_key(|h| h.id);
        Ok(hosts)
    }

    async fn poll_assigned_tasks(&self, host_id: i64) -> SchedulerResult<Vec<Task>> {
        let mut state = self.db.lock();
        let host = state
            .hosts
            .get_mut(&host_id)
            .ok_or(SchedulerError::HostNotFound { id: host_id })?;
        host.last_update = Utc::now();

        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.host_id == Some(host_id) && t.state == TaskState::Assigned)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            (a.priority, a.create_ts, a.id).cmp(&(b.priority, b.create_ts, b.id))
        });
        Ok(tasks)
    }

    async fn update_from_data(
        &self,
        host_id: i64,
        report: &HostSelfReport,
    ) -> SchedulerResult<()> {
        let mut state = self.db.lock();
        let host = state
            .hosts
            .get_mut(&host_id)
            .ok_or(SchedulerError::HostNotFound { id: host_id })?;
        if let Some(capacity) = report.capacity {
            host.capacity = capacity;
        }
        if let Some(task_load) = report.task_load {
            host.task_load = task_load;
        }
        if let Some(arches) = &report.arches {
            host.arches = arches.clone();
        }
        if let Some(channels) = &report.channels {
            host.channels = channels.clone();
        }
        if let Some(ready) = report.ready {
            host.ready = ready;
        }
        host.last_update = Utc::now();
        Ok(())
    }
}

// ============================================================================
// 任务仓储 mock
// ============================================================================

pub struct MockTaskRepository {
    db: MockDb,
}

impl MockTaskRepository {
    pub fn new(db: MockDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        Ok(self.db.lock().tasks.get(&id).cloned())
    }

    async fn get_free_tasks(&self) -> SchedulerResult<Vec<Task>> {
        let state = self.db.lock();
        let active_tasks: HashSet<i64> = state
            .runs
            .values()
            .filter(|r| r.state.is_active())
            .map(|r| r.task_id)
            .collect();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Free && !active_tasks.contains(&t.id))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            (a.priority, a.create_ts, a.id).cmp(&(b.priority, b.create_ts, b.id))
        });
        Ok(tasks)
    }

    async fn set_state(&self, id: i64, state: TaskState) -> SchedulerResult<()> {
        let mut db = self.db.lock();
        let task = db
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound { id })?;
        task.state = state;
        Ok(())
    }

    async fn reconcile_host(&self, id: i64, host_id: i64) -> SchedulerResult<()> {
        let mut db = self.db.lock();
        let task = db
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound { id })?;
        task.host_id = Some(host_id);
        Ok(())
    }
}

// ============================================================================
// 任务运行仓储 mock
// ============================================================================

pub struct MockTaskRunRepository {
    db: MockDb,
}

impl MockTaskRunRepository {
    pub fn new(db: MockDb) -> Self {
        Self { db }
    }

    fn active_run_for(state: &MockState, task_id: i64) -> Option<TaskRun> {
        state
            .runs
            .values()
            .filter(|r| r.task_id == task_id && r.state.is_active())
            .max_by_key(|r| r.id)
            .cloned()
    }
}

#[async_trait]
impl TaskRunRepository for MockTaskRunRepository {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskRun>> {
        Ok(self.db.lock().runs.get(&id).cloned())
    }

    async fn get_by_task_id(&self, task_id: i64) -> SchedulerResult<Vec<TaskRun>> {
        Ok(self.db.runs_for_task(task_id))
    }

    async fn get_filtered(
        &self,
        task_id: Option<i64>,
        host_id: Option<i64>,
    ) -> SchedulerResult<Vec<TaskRun>> {
        let mut runs: Vec<TaskRun> = self
            .db
            .lock()
            .runs
            .values()
            .filter(|r| task_id.is_none_or(|t| r.task_id == t))
            .filter(|r| host_id.is_none_or(|h| r.host_id == h))
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.id);
        Ok(runs)
    }

    async fn get_active_runs(&self) -> SchedulerResult<Vec<ActiveRun>> {
        let state = self.db.lock();
        let mut active = Vec::new();
        for run in state.runs.values().filter(|r| r.state.is_active()) {
            let task = state
                .tasks
                .get(&run.task_id)
                .cloned()
                .ok_or(SchedulerError::TaskNotFound { id: run.task_id })?;
            let host = state.hosts.get(&run.host_id);
            active.push(ActiveRun {
                run: run.clone(),
                task,
                host_name: host.map(|h| h.name.clone()),
                host_last_update: host.map(|h| h.last_update),
            });
        }
        active.sort_by_key(|a| a.run.id);
        Ok(active)
    }

    async fn assign(
        &self,
        task_id: i64,
        host_id: i64,
        override_existing: bool,
    ) -> SchedulerResult<TaskRun> {
        let mut state = self.db.lock();

        let task_state = state
            .tasks
            .get(&task_id)
            .map(|t| t.state)
            .ok_or(SchedulerError::TaskNotFound { id: task_id })?;
        if task_state != TaskState::Free && !override_existing {
            return Err(SchedulerError::TaskAlreadyAssigned { id: task_id });
        }

        if let Some(active) = Self::active_run_for(&state, task_id) {
            if !override_existing {
                return Err(SchedulerError::TaskAlreadyAssigned { id: task_id });
            }
            let run = state.runs.get_mut(&active.id).unwrap();
            run.state = TaskRunState::Override;
            run.end_ts = Some(Utc::now());
        }

        let run_id = state.next_run_id;
        state.next_run_id += 1;
        let run = TaskRun {
            id: run_id,
            task_id,
            host_id,
            state: TaskRunState::Assigned,
            create_ts: Utc::now(),
            start_ts: None,
            end_ts: None,
        };
        state.runs.insert(run_id, run.clone());

        let task = state.tasks.get_mut(&task_id).unwrap();
        task.state = TaskState::Assigned;
        task.host_id = Some(host_id);

        Ok(run)
    }

    async fn open(&self, task_id: i64, host_id: i64) -> SchedulerResult<TaskRun> {
        let mut state = self.db.lock();

        let task_state = state
            .tasks
            .get(&task_id)
            .map(|t| t.state)
            .ok_or(SchedulerError::TaskNotFound { id: task_id })?;

        let active = Self::active_run_for(&state, task_id);
        let run = match active {
            Some(run) if run.host_id == host_id => run,
            _ => return Err(SchedulerError::WrongHost { task_id, host_id }),
        };
        if task_state != TaskState::Assigned {
            return Err(SchedulerError::WrongHost { task_id, host_id });
        }

        let stored = state.runs.get_mut(&run.id).unwrap();
        stored.state = TaskRunState::Running;
        stored.start_ts = Some(Utc::now());
        let updated = stored.clone();

        state.tasks.get_mut(&task_id).unwrap().state = TaskState::Open;
        Ok(updated)
    }

    async fn complete(
        &self,
        task_id: i64,
        host_id: i64,
        task_state: TaskState,
    ) -> SchedulerResult<TaskRun> {
        let run_state = match task_state {
            TaskState::Closed => TaskRunState::Done,
            TaskState::Failed | TaskState::Canceled => TaskRunState::Fail,
            other => {
                return Err(SchedulerError::validation_error(format!(
                    "非终态的任务状态: {other:?}"
                )))
            }
        };

        let mut state = self.db.lock();
        if !state.tasks.contains_key(&task_id) {
            return Err(SchedulerError::TaskNotFound { id: task_id });
        }

        let active = Self::active_run_for(&state, task_id);
        let run = match active {
            Some(run) if run.host_id == host_id => run,
            _ => return Err(SchedulerError::WrongHost { task_id, host_id }),
        };

        let stored = state.runs.get_mut(&run.id).unwrap();
        stored.state = run_state;
        stored.end_ts = Some(Utc::now());
        let updated = stored.clone();

        state.tasks.get_mut(&task_id).unwrap().state = task_state;
        Ok(updated)
    }

    async fn expire_to_free(&self, run_id: i64, task_id: i64) -> SchedulerResult<()> {
        let mut state = self.db.lock();

        let run = match state.runs.get_mut(&run_id) {
            Some(run) if run.state.is_active() => run,
            _ => return Ok(()),
        };
        run.state = TaskRunState::Override;
        run.end_ts = Some(Utc::now());

        if let Some(task) = state.tasks.get_mut(&task_id) {
            task.state = TaskState::Free;
            task.host_id = None;
        }
        Ok(())
    }
}

// ============================================================================
// 拒绝记录仓储 mock
// ============================================================================

pub struct MockRefusalRepository {
    db: MockDb,
}

impl MockRefusalRepository {
    pub fn new(db: MockDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RefusalRepository for MockRefusalRepository {
    async fn upsert(&self, refusal: &Refusal) -> SchedulerResult<()> {
        self.db.insert_refusal(refusal.clone());
        Ok(())
    }

    async fn get_for_task(&self, task_id: i64) -> SchedulerResult<Vec<Refusal>> {
        self.get_filtered(Some(task_id), None).await
    }

    async fn get_filtered(
        &self,
        task_id: Option<i64>,
        host_id: Option<i64>,
    ) -> SchedulerResult<Vec<Refusal>> {
        let mut refusals: Vec<Refusal> = self
            .db
            .lock()
            .refusals
            .values()
            .filter(|r| task_id.is_none_or(|t| r.task_id == t))
            .filter(|r| host_id.is_none_or(|h| r.host_id == h))
            .cloned()
            .collect();
        refusals.sort_by(|a, b| b.ts.cmp(&a.ts));
        Ok(refusals)
    }

    async fn active_by_task(
        &self,
        now: DateTime<Utc>,
        soft_timeout_seconds: i64,
    ) -> SchedulerResult<HashMap<i64, HashSet<i64>>> {
        let cutoff = now - Duration::seconds(soft_timeout_seconds);
        let mut active: HashMap<i64, HashSet<i64>> = HashMap::new();
        for refusal in self.db.lock().refusals.values() {
            if !refusal.soft || refusal.ts > cutoff {
                active
                    .entry(refusal.task_id)
                    .or_default()
                    .insert(refusal.host_id);
            }
        }
        Ok(active)
    }

    async fn purge_for_task(&self, task_id: i64) -> SchedulerResult<u64> {
        let mut state = self.db.lock();
        let before = state.refusals.len();
        state.refusals.retain(|_, r| r.task_id != task_id);
        Ok((before - state.refusals.len()) as u64)
    }
}

// ============================================================================
// 其余仓储 mock
// ============================================================================

pub struct MockHostDataRepository {
    db: MockDb,
}

impl MockHostDataRepository {
    pub fn new(db: MockDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HostDataRepository for MockHostDataRepository {
    async fn get(&self, host_id: i64) -> SchedulerResult<Option<HostDataEntry>> {
        Ok(self
            .db
            .lock()
            .host_data
            .get(&host_id)
            .map(|data| HostDataEntry {
                host_id,
                data: data.clone(),
            }))
    }

    async fn set(&self, host_id: i64, data: &serde_json::Value) -> SchedulerResult<()> {
        self.db.lock().host_data.insert(host_id, data.clone());
        Ok(())
    }
}

pub struct MockLogMessageRepository {
    db: MockDb,
}

impl MockLogMessageRepository {
    pub fn new(db: MockDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LogMessageRepository for MockLogMessageRepository {
    async fn append(&self, message: &NewLogMessage) -> SchedulerResult<()> {
        let mut state = self.db.lock();
        let id = state.next_log_id;
        state.next_log_id += 1;
        state.logs.push(LogMessage {
            id,
            ts: Utc::now(),
            task_id: message.task_id,
            host_id: message.host_id,
            host_name: message.host_name.clone(),
            msg: message.msg.clone(),
        });
        Ok(())
    }

    async fn list(&self, filter: &LogFilter) -> SchedulerResult<Vec<LogMessage>> {
        let limit = filter.limit.unwrap_or(100) as usize;
        let mut logs: Vec<LogMessage> = self
            .db
            .lock()
            .logs
            .iter()
            .filter(|m| filter.task_id.is_none_or(|t| m.task_id == Some(t)))
            .filter(|m| filter.host_id.is_none_or(|h| m.host_id == Some(h)))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.id.cmp(&a.id));
        logs.truncate(limit);
        Ok(logs)
    }
}

pub struct MockSysDataRepository {
    db: MockDb,
}

impl MockSysDataRepository {
    pub fn new(db: MockDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SysDataRepository for MockSysDataRepository {
    async fn get(&self, name: &str) -> SchedulerResult<Option<serde_json::Value>> {
        Ok(self.db.lock().sys_data.get(name).cloned())
    }

    async fn set(&self, name: &str, data: &serde_json::Value) -> SchedulerResult<()> {
        self.db
            .lock()
            .sys_data
            .insert(name.to_string(), data.clone());
        Ok(())
    }
}

// ============================================================================
// 调度器锁 mock
// ============================================================================

#[derive(Clone, Default)]
pub struct MockSchedulerLock {
    held: Arc<Mutex<HashSet<String>>>,
}

impl MockSchedulerLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.lock().unwrap().contains(name)
    }

    /// 模拟另一个进程持有锁
    pub fn hold_externally(&self, name: &str) {
        self.held.lock().unwrap().insert(name.to_string());
    }

    pub fn release_external(&self, name: &str) {
        self.held.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl SchedulerLock for MockSchedulerLock {
    async fn try_acquire(&self, name: &str) -> SchedulerResult<Option<Box<dyn LockGuard>>> {
        let mut held = self.held.lock().unwrap();
        if held.contains(name) {
            return Ok(None);
        }
        held.insert(name.to_string());
        Ok(Some(Box::new(MockLockGuard {
            held: Arc::clone(&self.held),
            name: name.to_string(),
        })))
    }
}

struct MockLockGuard {
    held: Arc<Mutex<HashSet<String>>>,
    name: String,
}

#[async_trait]
impl LockGuard for MockLockGuard {
    async fn release(self: Box<Self>) -> SchedulerResult<()> {
        // Drop 里统一移除
        Ok(())
    }
}

impl Drop for MockLockGuard {
    fn drop(&mut self) {
        self.held.lock().unwrap().remove(&self.name);
    }
}
