use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use kojihub_api::routes::AppState;
use kojihub_config::AppConfig;
use kojihub_domain::MethodRegistry;
use kojihub_infrastructure::{
    DatabaseManager, PgAdvisoryLock, PostgresHostDataRepository, PostgresHostRepository,
    PostgresLogMessageRepository, PostgresRefusalRepository, PostgresSysDataRepository,
    PostgresTaskRepository, PostgresTaskRunRepository,
};
use kojihub_scheduler::{AssignmentEngine, RefusalLedger, TaskScheduler};

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 只运行调度循环
    Scheduler,
    /// 只运行 API 服务
    Api,
    /// 调度循环和 API 在同一进程中
    All,
}

pub struct Application {
    config: AppConfig,
    mode: AppMode,
    db: DatabaseManager,
    scheduler: Arc<TaskScheduler>,
    state: AppState,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        let db = DatabaseManager::connect(&config.database)
            .await
            .context("连接数据库失败")?;
        db.migrate().await.context("应用数据库迁移失败")?;

        let pool = db.pool();
        let host_repo = Arc::new(PostgresHostRepository::new(pool.clone()));
        let task_repo = Arc::new(PostgresTaskRepository::new(pool.clone()));
        let run_repo = Arc::new(PostgresTaskRunRepository::new(pool.clone()));
        let refusal_repo = Arc::new(PostgresRefusalRepository::new(pool.clone()));
        let host_data_repo = Arc::new(PostgresHostDataRepository::new(pool.clone()));
        let log_repo = Arc::new(PostgresLogMessageRepository::new(pool.clone()));
        let sys_repo = Arc::new(PostgresSysDataRepository::new(pool.clone()));
        let lock = Arc::new(PgAdvisoryLock::new(pool));

        let methods = MethodRegistry::new().with_overrides(&config.methods);

        let scheduler = Arc::new(TaskScheduler::new(
            host_repo.clone(),
            task_repo.clone(),
            run_repo.clone(),
            refusal_repo.clone(),
            log_repo.clone(),
            sys_repo,
            lock,
            methods,
            config.scheduler.clone(),
        ));

        let state = AppState {
            host_repo,
            task_repo,
            run_repo: run_repo.clone(),
            refusal_repo: refusal_repo.clone(),
            host_data_repo,
            log_repo: log_repo.clone(),
            assignment: Arc::new(AssignmentEngine::new(run_repo, log_repo)),
            ledger: Arc::new(RefusalLedger::new(
                refusal_repo,
                config.scheduler.soft_refusal_timeout_seconds,
            )),
            scheduler: scheduler.clone(),
        };

        Ok(Self {
            config,
            mode,
            db,
            scheduler,
            state,
        })
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let result = match self.mode {
            AppMode::Scheduler => self.run_scheduler_loop(shutdown_rx).await,
            AppMode::Api => self.run_api_server(shutdown_rx).await,
            AppMode::All => {
                let scheduler_rx = shutdown_rx.resubscribe();
                let api_rx = shutdown_rx;

                let scheduler_fut = self.run_scheduler_loop(scheduler_rx);
                let api_fut = self.run_api_server(api_rx);

                tokio::try_join!(scheduler_fut, api_fut).map(|_| ())
            }
        };

        self.db.close().await;
        result
    }

    /// 调度循环：按 run_interval 周期触发 tick。
    /// tick 自己还有基于 sys_data 的间隔闸门，多进程部署时
    /// 周期重叠也不会导致过度调度。
    async fn run_scheduler_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if !self.config.scheduler.enabled {
            info!("调度循环被配置禁用");
            return Ok(());
        }

        let interval = Duration::from_secs(self.config.scheduler.run_interval_seconds);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("调度循环启动，间隔 {} 秒", interval.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.scheduler.run(false).await {
                        Ok(true) => {}
                        Ok(false) => {
                            // 锁被其他进程持有或间隔未到
                        }
                        Err(e) => {
                            // tick 失败不致命，下个周期重试
                            error!("调度 tick 失败: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("调度循环收到关闭信号");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn run_api_server(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if !self.config.api.enabled {
            info!("API 服务被配置禁用");
            return Ok(());
        }

        let app = kojihub_api::create_app(self.state.clone());
        let listener = tokio::net::TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;

        info!("API 服务监听 {}", self.config.api.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                warn!("API 服务收到关闭信号");
            })
            .await
            .context("API 服务异常退出")?;

        Ok(())
    }
}
