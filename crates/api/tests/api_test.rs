use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::util::ServiceExt;

use kojihub_api::routes::AppState;
use kojihub_domain::entities::TaskState;
use kojihub_domain::MethodRegistry;
use kojihub_scheduler::{AssignmentEngine, RefusalLedger, TaskScheduler};
use kojihub_testing_utils::{
    HostBuilder, MockDb, MockHostDataRepository, MockHostRepository, MockLogMessageRepository,
    MockRefusalRepository, MockSchedulerLock, MockSysDataRepository, MockTaskRepository,
    MockTaskRunRepository, TaskBuilder, TaskRunBuilder,
};

fn build_state(db: &MockDb) -> AppState {
    let host_repo = Arc::new(MockHostRepository::new(db.clone()));
    let task_repo = Arc::new(MockTaskRepository::new(db.clone()));
    let run_repo = Arc::new(MockTaskRunRepository::new(db.clone()));
    let refusal_repo = Arc::new(MockRefusalRepository::new(db.clone()));
    let log_repo = Arc::new(MockLogMessageRepository::new(db.clone()));
    let sys_repo = Arc::new(MockSysDataRepository::new(db.clone()));
    let lock = Arc::new(MockSchedulerLock::new());

    let config = kojihub_config::SchedulerConfig::default();
    let scheduler = Arc::new(TaskScheduler::new(
        host_repo.clone(),
        task_repo.clone(),
        run_repo.clone(),
        refusal_repo.clone(),
        log_repo.clone(),
        sys_repo,
        lock,
        MethodRegistry::new(),
        config.clone(),
    ));

    AppState {
        host_repo,
        task_repo,
        run_repo: run_repo.clone(),
        refusal_repo: refusal_repo.clone(),
        host_data_repo: Arc::new(MockHostDataRepository::new(db.clone())),
        log_repo: log_repo.clone(),
        assignment: Arc::new(AssignmentEngine::new(run_repo, log_repo)),
        ledger: Arc::new(RefusalLedger::new(
            refusal_repo,
            config.soft_refusal_timeout_seconds,
        )),
        scheduler,
    }
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let db = MockDb::new();
    let app = kojihub_api::create_app(build_state(&db));

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_get_tasks_for_host() {
    let db = MockDb::new();
    db.insert_host(HostBuilder::new().with_id(1).build());
    db.insert_task(
        TaskBuilder::new()
            .with_id(10)
            .with_state(TaskState::Assigned)
            .with_host(1)
            .build(),
    );

    let app = kojihub_api::create_app(build_state(&db));
    let response = app
        .oneshot(
            Request::get("/api/hosts/1/tasks")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // 轮询即心跳
    let host = db.host(1).unwrap();
    assert!((chrono::Utc::now() - host.last_update).num_seconds() < 5);
}

#[tokio::test]
async fn test_get_tasks_for_unknown_host_is_404() {
    let db = MockDb::new();
    let app = kojihub_api::create_app(build_state(&db));

    let response = app
        .oneshot(
            Request::get("/api/hosts/99/tasks")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_open_task_wrong_host_is_conflict() {
    let db = MockDb::new();
    db.insert_host(HostBuilder::new().with_id(1).build());
    db.insert_host(HostBuilder::new().with_id(2).build());
    db.insert_task(
        TaskBuilder::new()
            .with_id(10)
            .with_state(TaskState::Assigned)
            .with_host(1)
            .build(),
    );
    db.insert_run(
        TaskRunBuilder::new()
            .with_id(1)
            .with_task(10)
            .with_host(1)
            .build(),
    );

    let app = kojihub_api::create_app(build_state(&db));

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/tasks/10/open",
            serde_json::json!({ "host_id": 2 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/tasks/10/open",
            serde_json::json!({ "host_id": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_assign_task_conflict_without_override() {
    let db = MockDb::new();
    db.insert_host(HostBuilder::new().with_id(1).build());
    db.insert_host(HostBuilder::new().with_id(2).build());
    db.insert_task(
        TaskBuilder::new()
            .with_id(10)
            .with_state(TaskState::Assigned)
            .with_host(1)
            .build(),
    );
    db.insert_run(
        TaskRunBuilder::new()
            .with_id(1)
            .with_task(10)
            .with_host(1)
            .build(),
    );

    let app = kojihub_api::create_app(build_state(&db));

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/tasks/10/assign",
            serde_json::json!({ "host_id": 2 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // force + override 成功
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/tasks/10/assign",
            serde_json::json!({ "host_id": 2, "force": true, "override": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(db.task(10).unwrap().host_id, Some(2));
}

#[tokio::test]
async fn test_set_host_data_updates_host_row() {
    let db = MockDb::new();
    db.insert_host(HostBuilder::new().with_id(1).with_capacity(4.0).build());

    let app = kojihub_api::create_app(build_state(&db));
    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/hosts/1/data",
            serde_json::json!({ "capacity": 8.0, "ready": false, "os": "fedora-42" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let host = db.host(1).unwrap();
    assert_eq!(host.capacity, 8.0);
    assert!(!host.ready);
}

#[tokio::test]
async fn test_set_refusal_and_list() {
    let db = MockDb::new();
    db.insert_host(HostBuilder::new().with_id(1).build());
    db.insert_task(TaskBuilder::new().with_id(10).build());

    let app = kojihub_api::create_app(build_state(&db));

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/hosts/1/refusals",
            serde_json::json!({ "task_id": 10, "soft": true, "msg": "load too high" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let refusal = db.refusal(1, 10).unwrap();
    assert!(refusal.soft);
    assert!(refusal.by_host);
    assert_eq!(refusal.msg, "load too high");

    let response = app
        .oneshot(
            Request::get("/api/refusals?task_id=10&host_id=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_close_task_purges_refusals() {
    let db = MockDb::new();
    db.insert_host(HostBuilder::new().with_id(1).build());
    db.insert_task(
        TaskBuilder::new()
            .with_id(10)
            .with_state(TaskState::Open)
            .with_host(1)
            .build(),
    );
    db.insert_run(
        TaskRunBuilder::new()
            .with_id(1)
            .with_task(10)
            .with_host(1)
            .running()
            .build(),
    );
    db.insert_refusal(
        kojihub_testing_utils::RefusalBuilder::new()
            .with_host(1)
            .with_task(10)
            .build(),
    );

    let app = kojihub_api::create_app(build_state(&db));
    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/tasks/10/close",
            serde_json::json!({ "host_id": 1, "state": "CLOSED" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(db.task(10).unwrap().state, TaskState::Closed);
    assert!(db.refusal(1, 10).is_none());
}

#[tokio::test]
async fn test_do_run_endpoint() {
    let db = MockDb::new();
    db.insert_host(HostBuilder::new().with_id(1).build());
    db.insert_task(TaskBuilder::new().with_id(10).build());

    let app = kojihub_api::create_app(build_state(&db));
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/scheduler/run",
            serde_json::json!({ "force": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(db.task(10).unwrap().state, TaskState::Assigned);
}
