mod database_test_utils;

use chrono::Utc;
use database_test_utils::DatabaseTestContainer;

use kojihub_domain::entities::{Refusal, TaskRunState, TaskState};
use kojihub_domain::repositories::{
    HostRepository, RefusalRepository, SchedulerLock, TaskRepository, TaskRunRepository,
};
use kojihub_errors::SchedulerError;
use kojihub_infrastructure::{
    PgAdvisoryLock, PostgresHostRepository, PostgresRefusalRepository, PostgresTaskRepository,
    PostgresTaskRunRepository,
};

#[tokio::test]
async fn test_assign_and_conflict() {
    let db = DatabaseTestContainer::new().await.unwrap();
    let host_id = db.seed_host("builder-01", "x86_64", &[1]).await.unwrap();
    let other_host = db.seed_host("builder-02", "x86_64", &[1]).await.unwrap();
    let task_id = db.seed_task("build", 1, Some("x86_64")).await.unwrap();

    let run_repo = PostgresTaskRunRepository::new(db.pool.clone());
    let task_repo = PostgresTaskRepository::new(db.pool.clone());

    let run = run_repo.assign(task_id, host_id, false).await.unwrap();
    assert_eq!(run.task_id, task_id);
    assert_eq!(run.host_id, host_id);
    assert_eq!(run.state, TaskRunState::Assigned);

    let task = task_repo.get_by_id(task_id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Assigned);
    assert_eq!(task.host_id, Some(host_id));

    // 再次分配同一任务应该失败
    let err = run_repo.assign(task_id, other_host, false).await.unwrap_err();
    assert!(matches!(err, SchedulerError::TaskAlreadyAssigned { id } if id == task_id));

    // 覆盖分配把旧实例记为 OVERRIDE
    let new_run = run_repo.assign(task_id, other_host, true).await.unwrap();
    assert_eq!(new_run.host_id, other_host);

    let runs = run_repo.get_by_task_id(task_id).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].state, TaskRunState::Override);
    assert!(runs[0].end_ts.is_some());
    assert_eq!(runs[1].state, TaskRunState::Assigned);
}

#[tokio::test]
async fn test_open_enforces_host() {
    let db = DatabaseTestContainer::new().await.unwrap();
    let host_id = db.seed_host("builder-01", "x86_64", &[1]).await.unwrap();
    let other_host = db.seed_host("builder-02", "x86_64", &[1]).await.unwrap();
    let task_id = db.seed_task("build", 1, Some("x86_64")).await.unwrap();

    let run_repo = PostgresTaskRunRepository::new(db.pool.clone());
    let task_repo = PostgresTaskRepository::new(db.pool.clone());

    run_repo.assign(task_id, host_id, false).await.unwrap();

    // 其他主机确认任务应该失败
    let err = run_repo.open(task_id, other_host).await.unwrap_err();
    assert!(matches!(err, SchedulerError::WrongHost { .. }));

    let run = run_repo.open(task_id, host_id).await.unwrap();
    assert_eq!(run.state, TaskRunState::Running);
    assert!(run.start_ts.is_some());

    let task = task_repo.get_by_id(task_id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Open);
}

#[tokio::test]
async fn test_expire_to_free_returns_task() {
    let db = DatabaseTestContainer::new().await.unwrap();
    let host_id = db.seed_host("builder-01", "x86_64", &[1]).await.unwrap();
    let task_id = db.seed_task("build", 1, Some("x86_64")).await.unwrap();

    let run_repo = PostgresTaskRunRepository::new(db.pool.clone());
    let task_repo = PostgresTaskRepository::new(db.pool.clone());

    let run = run_repo.assign(task_id, host_id, false).await.unwrap();
    run_repo.expire_to_free(run.id, task_id).await.unwrap();

    let task = task_repo.get_by_id(task_id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Free);
    assert_eq!(task.host_id, None);

    let runs = run_repo.get_by_task_id(task_id).await.unwrap();
    assert_eq!(runs[0].state, TaskRunState::Override);

    // 重复回收是无操作
    run_repo.expire_to_free(run.id, task_id).await.unwrap();

    // 回到空闲后可以再次出现在空闲队列里
    let free = task_repo.get_free_tasks().await.unwrap();
    assert!(free.iter().any(|t| t.id == task_id));
}

#[tokio::test]
async fn test_poll_assigned_tasks_heartbeat_is_monotone() {
    let db = DatabaseTestContainer::new().await.unwrap();
    let host_id = db.seed_host("builder-01", "x86_64", &[1]).await.unwrap();
    let task_id = db.seed_task("build", 1, Some("x86_64")).await.unwrap();

    let host_repo = PostgresHostRepository::new(db.pool.clone());
    let run_repo = PostgresTaskRunRepository::new(db.pool.clone());

    let before = host_repo.get_by_id(host_id).await.unwrap().unwrap();

    run_repo.assign(task_id, host_id, false).await.unwrap();

    let tasks = host_repo.poll_assigned_tasks(host_id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, task_id);

    let after = host_repo.get_by_id(host_id).await.unwrap().unwrap();
    assert!(after.last_update >= before.last_update);

    // 幂等：重复轮询返回相同集合，心跳单调递增
    let tasks_again = host_repo.poll_assigned_tasks(host_id).await.unwrap();
    assert_eq!(tasks_again.len(), 1);
    let later = host_repo.get_by_id(host_id).await.unwrap().unwrap();
    assert!(later.last_update >= after.last_update);
}

#[tokio::test]
async fn test_refusal_round_trip_and_active_query() {
    let db = DatabaseTestContainer::new().await.unwrap();
    let host_id = db.seed_host("builder-01", "x86_64", &[1]).await.unwrap();
    let task_id = db.seed_task("build", 1, Some("x86_64")).await.unwrap();

    let refusal_repo = PostgresRefusalRepository::new(db.pool.clone());

    let now = Utc::now();
    refusal_repo
        .upsert(&Refusal {
            host_id,
            task_id,
            soft: true,
            by_host: true,
            msg: "load too high".to_string(),
            ts: now - chrono::Duration::seconds(60),
        })
        .await
        .unwrap();

    let rows = refusal_repo
        .get_filtered(Some(task_id), Some(host_id))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].msg, "load too high");

    // 60 秒前的软拒绝在 900 秒窗口内生效
    let active = refusal_repo.active_by_task(now, 900).await.unwrap();
    assert!(active.get(&task_id).unwrap().contains(&host_id));

    // 窗口过后软拒绝被忽略但记录还在
    let active = refusal_repo.active_by_task(now, 30).await.unwrap();
    assert!(active.get(&task_id).is_none());
    let rows = refusal_repo.get_for_task(task_id).await.unwrap();
    assert_eq!(rows.len(), 1);

    // 硬拒绝不受窗口影响
    refusal_repo
        .upsert(&Refusal {
            host_id,
            task_id,
            soft: false,
            by_host: true,
            msg: "wrong arch".to_string(),
            ts: now - chrono::Duration::seconds(86_000),
        })
        .await
        .unwrap();
    let active = refusal_repo.active_by_task(now, 30).await.unwrap();
    assert!(active.get(&task_id).unwrap().contains(&host_id));

    let purged = refusal_repo.purge_for_task(task_id).await.unwrap();
    assert_eq!(purged, 1);
    assert!(refusal_repo.get_for_task(task_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_advisory_lock_is_exclusive() {
    let db = DatabaseTestContainer::new().await.unwrap();
    let lock = PgAdvisoryLock::new(db.pool.clone());

    let guard = lock.try_acquire("scheduler").await.unwrap();
    assert!(guard.is_some());

    // 持锁期间第二次获取失败
    let second = lock.try_acquire("scheduler").await.unwrap();
    assert!(second.is_none());

    // 其他名字的锁不受影响
    let other = lock.try_acquire("repo-regen").await.unwrap();
    assert!(other.is_some());
    other.unwrap().release().await.unwrap();

    guard.unwrap().release().await.unwrap();

    let again = lock.try_acquire("scheduler").await.unwrap();
    assert!(again.is_some());
    again.unwrap().release().await.unwrap();
}

#[tokio::test]
async fn test_get_active_runs_joins_task_and_host() {
    let db = DatabaseTestContainer::new().await.unwrap();
    let host_id = db.seed_host("builder-01", "x86_64", &[1]).await.unwrap();
    let task_id = db.seed_task("build", 1, Some("x86_64")).await.unwrap();

    let run_repo = PostgresTaskRunRepository::new(db.pool.clone());
    run_repo.assign(task_id, host_id, false).await.unwrap();

    let active = run_repo.get_active_runs().await.unwrap();
    assert_eq!(active.len(), 1);
    let entry = &active[0];
    assert_eq!(entry.run.task_id, task_id);
    assert_eq!(entry.run.host_id, host_id);
    assert_eq!(entry.task.method, "build");
    assert_eq!(entry.host_name.as_deref(), Some("builder-01"));
    assert!(entry.host_last_update.is_some());
}
