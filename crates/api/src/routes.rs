use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};

use kojihub_domain::repositories::{
    HostDataRepository, HostRepository, LogMessageRepository, RefusalRepository, TaskRepository,
    TaskRunRepository,
};
use kojihub_scheduler::{AssignmentEngine, RefusalLedger, SchedulerService};

use crate::handlers::{
    health::health_check,
    hosts::{get_host_data, get_tasks_for_host, set_host_data, set_refusal},
    scheduler::{do_run, get_log_messages},
    tasks::{
        assign_task, close_task, get_task_refusals, get_task_runs, list_refusals, list_task_runs,
        open_task,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub host_repo: Arc<dyn HostRepository>,
    pub task_repo: Arc<dyn TaskRepository>,
    pub run_repo: Arc<dyn TaskRunRepository>,
    pub refusal_repo: Arc<dyn RefusalRepository>,
    pub host_data_repo: Arc<dyn HostDataRepository>,
    pub log_repo: Arc<dyn LogMessageRepository>,
    pub assignment: Arc<AssignmentEngine>,
    pub ledger: Arc<RefusalLedger>,
    pub scheduler: Arc<dyn SchedulerService>,
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/hosts/{id}/tasks", get(get_tasks_for_host))
        .route(
            "/api/hosts/{id}/data",
            get(get_host_data).put(set_host_data),
        )
        .route("/api/hosts/{id}/refusals", post(set_refusal))
        .route("/api/tasks/{id}/open", post(open_task))
        .route("/api/tasks/{id}/close", put(close_task))
        .route("/api/tasks/{id}/assign", post(assign_task))
        .route("/api/tasks/{id}/runs", get(get_task_runs))
        .route("/api/tasks/{id}/refusals", get(get_task_refusals))
        .route("/api/task-runs", get(list_task_runs))
        .route("/api/refusals", get(list_refusals))
        .route("/api/scheduler/run", post(do_run))
        .route("/api/scheduler/log-messages", get(get_log_messages))
        .with_state(state)
}
