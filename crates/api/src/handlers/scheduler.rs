use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use kojihub_domain::repositories::LogFilter;

use crate::{error::ApiResult, response::success, routes::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct DoRunRequest {
    #[serde(default)]
    pub force: bool,
}

/// doRun：运维/测试钩子，触发一次调度 tick。
/// 返回 ran=false 表示本次被跳过（锁被占用或间隔未到）。
pub async fn do_run(
    State(state): State<AppState>,
    body: Option<Json<DoRunRequest>>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let ran = state.scheduler.do_run(request.force).await?;
    Ok(success(serde_json::json!({ "ran": ran })))
}

#[derive(Debug, Deserialize)]
pub struct LogQueryParams {
    pub task_id: Option<i64>,
    pub host_id: Option<i64>,
    pub limit: Option<i64>,
}

/// getLogMessages：调度事件日志，最新的在前
pub async fn get_log_messages(
    State(state): State<AppState>,
    Query(params): Query<LogQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let filter = LogFilter {
        task_id: params.task_id,
        host_id: params.host_id,
        limit: params.limit,
    };
    let messages = state.log_repo.list(&filter).await?;
    Ok(success(messages))
}
