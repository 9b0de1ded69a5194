//! 调度器单写者锁
//!
//! 基于 Postgres 会话级咨询锁。锁绑定在一条专用连接上，
//! 释放锁即归还连接；tick 期间任意数量的 hub 进程都可以尝试
//! 获取，只有持锁者推进调度。

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::{debug, warn};

use kojihub_domain::repositories::{LockGuard, SchedulerLock};
use kojihub_errors::SchedulerResult;

pub struct PgAdvisoryLock {
    pool: PgPool,
}

impl PgAdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchedulerLock for PgAdvisoryLock {
    async fn try_acquire(&self, name: &str) -> SchedulerResult<Option<Box<dyn LockGuard>>> {
        let mut conn = self.pool.acquire().await?;

        let locked: bool =
            sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1)::bigint)")
                .bind(name)
                .fetch_one(&mut *conn)
                .await?;

        if !locked {
            debug!("咨询锁 {} 被其他会话持有", name);
            return Ok(None);
        }

        debug!("已获取咨询锁 {}", name);
        Ok(Some(Box::new(PgAdvisoryLockGuard {
            conn: Some(conn),
            name: name.to_string(),
        })))
    }
}

pub struct PgAdvisoryLockGuard {
    conn: Option<PoolConnection<Postgres>>,
    name: String,
}

#[async_trait]
impl LockGuard for PgAdvisoryLockGuard {
    async fn release(mut self: Box<Self>) -> SchedulerResult<()> {
        if let Some(mut conn) = self.conn.take() {
            let unlocked: bool =
                sqlx::query_scalar("SELECT pg_advisory_unlock(hashtext($1)::bigint)")
                    .bind(&self.name)
                    .fetch_one(&mut *conn)
                    .await?;
            if !unlocked {
                warn!("咨询锁 {} 释放时已不在本会话中", self.name);
            }
            debug!("已释放咨询锁 {}", self.name);
        }
        Ok(())
    }
}

impl Drop for PgAdvisoryLockGuard {
    fn drop(&mut self) {
        // 未显式释放时关闭底层连接，会话结束后服务器回收锁
        if let Some(conn) = self.conn.take() {
            warn!("咨询锁 {} 的守卫未显式释放，关闭底层连接", self.name);
            drop(conn.detach());
        }
    }
}
