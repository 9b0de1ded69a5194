use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use kojihub_domain::entities::{HostSelfReport, Task, TaskState};

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: i64,
    pub method: String,
    pub channel_id: i64,
    pub arch: Option<String>,
    pub weight: f64,
    pub priority: i32,
    pub state: TaskState,
    pub owner: i64,
    pub parent: Option<i64>,
    pub host_id: Option<i64>,
    pub create_ts: chrono::DateTime<chrono::Utc>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            method: task.method,
            channel_id: task.channel_id,
            arch: task.arch,
            weight: task.weight,
            priority: task.priority,
            state: task.state,
            owner: task.owner,
            parent: task.parent,
            host_id: task.host_id,
            create_ts: task.create_ts,
        }
    }
}

/// getTasksForHost：返回主机的 ASSIGNED 任务并作为心跳刷新 last_update
pub async fn get_tasks_for_host(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let tasks = state.host_repo.poll_assigned_tasks(id).await?;
    let responses: Vec<TaskResponse> = tasks.into_iter().map(TaskResponse::from).collect();
    Ok(success(responses))
}

/// setHostData：保存主机自报文档，并把调度器关心的字段回写到主机行。
/// 不触发即时调度，下一个 tick 自然看到新状态。
pub async fn set_host_data(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(data): Json<serde_json::Value>,
) -> ApiResult<impl axum::response::IntoResponse> {
    if !data.is_object() {
        return Err(ApiError::BadRequest("主机自报数据必须是 JSON 对象".to_string()));
    }

    state.host_data_repo.set(id, &data).await?;

    let report = HostSelfReport::from_data(&data);
    state.host_repo.update_from_data(id, &report).await?;

    Ok(success(serde_json::json!({ "host_id": id })))
}

/// getHostData
pub async fn get_host_data(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    match state.host_data_repo.get(id).await? {
        Some(entry) => Ok(success(entry)),
        None => Err(ApiError::NotFound),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetRefusalRequest {
    pub task_id: i64,
    #[serde(default = "default_soft")]
    pub soft: bool,
    #[serde(default)]
    pub msg: String,
}

fn default_soft() -> bool {
    true
}

/// setRefusal：主机主动拒绝任务。只影响后续调度，不改变任务状态。
pub async fn set_refusal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<SetRefusalRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    if state.host_repo.get_by_id(id).await?.is_none() {
        return Err(ApiError::NotFound);
    }
    if state.task_repo.get_by_id(request.task_id).await?.is_none() {
        return Err(ApiError::NotFound);
    }

    state
        .ledger
        .set_refusal(id, request.task_id, request.soft, true, &request.msg)
        .await?;

    Ok(success(serde_json::json!({
        "host_id": id,
        "task_id": request.task_id,
        "soft": request.soft,
    })))
}
