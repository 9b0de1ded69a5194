//! 拒绝台账
//!
//! 主机可以对单个任务提交软/硬拒绝；调度器自己也会在分配超时后
//! 合成软拒绝。台账在每个 tick 开始时取一次快照，tick 中合成的
//! 新拒绝同时写入存储和快照。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use kojihub_domain::entities::Refusal;
use kojihub_domain::repositories::RefusalRepository;
use kojihub_errors::SchedulerResult;

/// 当前生效的拒绝快照：任务 -> 拒绝它的主机集合
#[derive(Debug, Default)]
pub struct ActiveRefusals {
    map: HashMap<i64, HashSet<i64>>,
}

impl ActiveRefusals {
    pub fn new(map: HashMap<i64, HashSet<i64>>) -> Self {
        Self { map }
    }

    pub fn is_refused(&self, task_id: i64, host_id: i64) -> bool {
        self.map
            .get(&task_id)
            .is_some_and(|hosts| hosts.contains(&host_id))
    }

    pub fn hosts_for(&self, task_id: i64) -> Option<&HashSet<i64>> {
        self.map.get(&task_id)
    }

    /// tick 内合成的拒绝立即生效
    pub fn note(&mut self, task_id: i64, host_id: i64) {
        self.map.entry(task_id).or_default().insert(host_id);
    }
}

pub struct RefusalLedger {
    refusal_repo: Arc<dyn RefusalRepository>,
    soft_timeout_seconds: i64,
}

impl RefusalLedger {
    pub fn new(refusal_repo: Arc<dyn RefusalRepository>, soft_timeout_seconds: i64) -> Self {
        Self {
            refusal_repo,
            soft_timeout_seconds,
        }
    }

    pub async fn snapshot(&self, now: DateTime<Utc>) -> SchedulerResult<ActiveRefusals> {
        let map = self
            .refusal_repo
            .active_by_task(now, self.soft_timeout_seconds)
            .await?;
        Ok(ActiveRefusals::new(map))
    }

    pub async fn set_refusal(
        &self,
        host_id: i64,
        task_id: i64,
        soft: bool,
        by_host: bool,
        msg: &str,
    ) -> SchedulerResult<()> {
        debug!(
            "拒绝记录: 主机 {} 任务 {} soft={} by_host={}",
            host_id, task_id, soft, by_host
        );
        self.refusal_repo
            .upsert(&Refusal {
                host_id,
                task_id,
                soft,
                by_host,
                msg: msg.to_string(),
                ts: Utc::now(),
            })
            .await
    }

    /// 任务终结时清理拒绝记录
    pub async fn purge_for_task(&self, task_id: i64) -> SchedulerResult<u64> {
        self.refusal_repo.purge_for_task(task_id).await
    }
}
