//! Test data builders for creating test entities
//!
//! Builder patterns with sensible defaults and easy customization.

use chrono::{DateTime, Utc};

use kojihub_domain::entities::{Host, Refusal, Task, TaskRun, TaskRunState, TaskState};

/// Builder for creating test Host entities
pub struct HostBuilder {
    host: Host,
}

impl HostBuilder {
    pub fn new() -> Self {
        Self {
            host: Host {
                id: 1,
                user_id: Some(1),
                name: "builder-01".to_string(),
                arches: "x86_64".to_string(),
                channels: vec![1],
                capacity: 4.0,
                task_load: 0.0,
                ready: true,
                enabled: true,
                description: None,
                comment: None,
                last_update: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.host.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.host.name = name.to_string();
        self
    }

    pub fn with_arches(mut self, arches: &str) -> Self {
        self.host.arches = arches.to_string();
        self
    }

    pub fn with_channels(mut self, channels: Vec<i64>) -> Self {
        self.host.channels = channels;
        self
    }

    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.host.capacity = capacity;
        self
    }

    pub fn with_task_load(mut self, task_load: f64) -> Self {
        self.host.task_load = task_load;
        self
    }

    pub fn with_last_update(mut self, last_update: DateTime<Utc>) -> Self {
        self.host.last_update = last_update;
        self
    }

    pub fn not_ready(mut self) -> Self {
        self.host.ready = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.host.enabled = false;
        self
    }

    pub fn build(self) -> Host {
        self.host
    }
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task {
                id: 1,
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
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.task.method = method.to_string();
        self
    }

    pub fn with_channel(mut self, channel_id: i64) -> Self {
        self.task.channel_id = channel_id;
        self
    }

    pub fn with_arch(mut self, arch: &str) -> Self {
        self.task.arch = Some(arch.to_string());
        self
    }

    pub fn noarch(mut self) -> Self {
        self.task.arch = None;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.task.weight = weight;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.task.state = state;
        self
    }

    pub fn with_host(mut self, host_id: i64) -> Self {
        self.task.host_id = Some(host_id);
        self
    }

    pub fn with_create_ts(mut self, create_ts: DateTime<Utc>) -> Self {
        self.task.create_ts = create_ts;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test TaskRun entities
pub struct TaskRunBuilder {
    run: TaskRun,
}

impl TaskRunBuilder {
    pub fn new() -> Self {
        Self {
            run: TaskRun {
                id: 1,
                task_id: 1,
                host_id: 1,
                state: TaskRunState::Assigned,
                create_ts: Utc::now(),
                start_ts: None,
                end_ts: None,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.run.id = id;
        self
    }

    pub fn with_task(mut self, task_id: i64) -> Self {
        self.run.task_id = task_id;
        self
    }

    pub fn with_host(mut self, host_id: i64) -> Self {
        self.run.host_id = host_id;
        self
    }

    pub fn with_state(mut self, state: TaskRunState) -> Self {
        self.run.state = state;
        self
    }

    pub fn with_create_ts(mut self, create_ts: DateTime<Utc>) -> Self {
        self.run.create_ts = create_ts;
        self
    }

    pub fn running(mut self) -> Self {
        self.run.state = TaskRunState::Running;
        self.run.start_ts = Some(Utc::now());
        self
    }

    pub fn build(self) -> TaskRun {
        self.run
    }
}

impl Default for TaskRunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Refusal entities
pub struct RefusalBuilder {
    refusal: Refusal,
}

impl RefusalBuilder {
    pub fn new() -> Self {
        Self {
            refusal: Refusal {
                host_id: 1,
                task_id: 1,
                soft: true,
                by_host: true,
                msg: "declined".to_string(),
                ts: Utc::now(),
            },
        }
    }

    pub fn with_host(mut self, host_id: i64) -> Self {
        self.refusal.host_id = host_id;
        self
    }

    pub fn with_task(mut self, task_id: i64) -> Self {
        self.refusal.task_id = task_id;
        self
    }

    pub fn hard(mut self) -> Self {
        self.refusal.soft = false;
        self
    }

    pub fn with_msg(mut self, msg: &str) -> Self {
        self.refusal.msg = msg.to_string();
        self
    }

    pub fn with_ts(mut self, ts: DateTime<Utc>) -> Self {
        self.refusal.ts = ts;
        self
    }

    pub fn build(self) -> Refusal {
        self.refusal
    }
}

impl Default for RefusalBuilder {
    fn default() -> Self {
        Self::new()
    }
}
