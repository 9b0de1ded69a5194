use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use kojihub_config::DatabaseConfig;
use kojihub_errors::SchedulerResult;

/// 数据库连接管理器
///
/// hub 进程持有连接池并把它传递给各仓储实现，不使用进程级单例。
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    pub async fn connect(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            "数据库连接池已建立: 最大连接数 {}, 最小连接数 {}",
            config.max_connections, config.min_connections
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    /// 应用打包在 crate 内的数据库迁移
    pub async fn migrate(&self) -> SchedulerResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| kojihub_errors::SchedulerError::database_error(e.to_string()))?;
        info!("数据库迁移已应用");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
