use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use kojihub_domain::entities::TaskState;
use kojihub_errors::SchedulerError;
use kojihub_scheduler::AssignOutcome;

use crate::{
    error::{ApiError, ApiResult},
    response::{success, PaginatedResponse},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct OpenTaskRequest {
    pub host_id: i64,
}

/// openTask：主机确认 ASSIGNED 任务，ASSIGNED → OPEN。
/// 只有活跃运行实例所属的主机可以确认，否则返回 WrongHost。
pub async fn open_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<OpenTaskRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let run = state.run_repo.open(id, request.host_id).await?;
    Ok(success(run))
}

#[derive(Debug, Deserialize)]
pub struct CloseTaskRequest {
    pub host_id: i64,
    pub state: TaskState,
}

/// closeTask：主机上报任务终态（CLOSED/FAILED/CANCELED）。
/// 任务终结后其拒绝记录被清理。
pub async fn close_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<CloseTaskRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let run = state
        .run_repo
        .complete(id, request.host_id, request.state)
        .await?;
    state.ledger.purge_for_task(id).await?;
    Ok(success(run))
}

#[derive(Debug, Deserialize)]
pub struct AssignTaskRequest {
    pub host_id: i64,
    #[serde(default)]
    pub force: bool,
    #[serde(default, rename = "override")]
    pub override_existing: bool,
}

/// assignTask：管理员手工分配。force 跳过主机合格性检查，
/// override 取代已存在的活跃运行实例。
pub async fn assign_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<AssignTaskRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let task = state
        .task_repo
        .get_by_id(id)
        .await?
        .ok_or(ApiError::Scheduler(SchedulerError::task_not_found(id)))?;
    let host = state
        .host_repo
        .get_by_id(request.host_id)
        .await?
        .ok_or(ApiError::Scheduler(SchedulerError::host_not_found(
            request.host_id,
        )))?;

    let outcome = state
        .assignment
        .assign(&task, &host, request.force, request.override_existing)
        .await?;

    match outcome {
        AssignOutcome::Assigned(run) => Ok(success(run)),
        AssignOutcome::Lost => Err(ApiError::Scheduler(SchedulerError::TaskAlreadyAssigned {
            id,
        })),
    }
}

/// getTaskRuns（单任务）
pub async fn get_task_runs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let runs = state.run_repo.get_by_task_id(id).await?;
    Ok(success(runs))
}

#[derive(Debug, Deserialize)]
pub struct RunQueryParams {
    pub task_id: Option<i64>,
    pub host_id: Option<i64>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// getTaskRuns（过滤查询，分页）
pub async fn list_task_runs(
    State(state): State<AppState>,
    Query(params): Query<RunQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 100);

    let runs = state
        .run_repo
        .get_filtered(params.task_id, params.host_id)
        .await?;

    let total = runs.len() as i64;
    let items: Vec<_> = runs
        .into_iter()
        .skip(((page - 1) * page_size) as usize)
        .take(page_size as usize)
        .collect();

    Ok(success(PaginatedResponse::new(items, total, page, page_size)))
}

/// getTaskRefusals（单任务）
pub async fn get_task_refusals(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let refusals = state.refusal_repo.get_for_task(id).await?;
    Ok(success(refusals))
}

#[derive(Debug, Deserialize)]
pub struct RefusalQueryParams {
    pub task_id: Option<i64>,
    pub host_id: Option<i64>,
}

/// getTaskRefusals（过滤查询）
pub async fn list_refusals(
    State(state): State<AppState>,
    Query(params): Query<RefusalQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let refusals = state
        .refusal_repo
        .get_filtered(params.task_id, params.host_id)
        .await?;
    Ok(success(refusals))
}
