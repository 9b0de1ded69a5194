//! 主机注册表
//!
//! 每个 tick 的主机快照。维护 `hosts_by_id` 与 `hosts_by_bin` 两个
//! 索引，并在内存里累计本 tick 的待定权重和分配次数，后续任务的
//! 排序立即反映已做出的分配决定。

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use kojihub_config::SchedulerConfig;
use kojihub_domain::entities::Host;

/// 主机在当前 tick 中的槽位
#[derive(Debug, Clone)]
pub struct HostSlot {
    pub host: Host,
    /// 本 tick 已分配但尚未反映到 task_load 的权重
    pub pending_weight: f64,
    /// 本 tick 已获得的分配次数，受 maxjobs 约束
    pub assigned_this_tick: usize,
}

impl HostSlot {
    fn new(host: Host) -> Self {
        Self {
            host,
            pending_weight: 0.0,
            assigned_this_tick: 0,
        }
    }

    /// 接收该权重后的预计负载比
    fn projected_ratio(&self, weight: f64) -> f64 {
        if self.host.capacity <= 0.0 {
            return f64::INFINITY;
        }
        (self.host.task_load + self.pending_weight + weight) / self.host.capacity
    }

    fn would_exceed_capacity(&self, weight: f64, overcommit: f64) -> bool {
        self.host.task_load + self.pending_weight + weight > self.host.capacity + overcommit
    }
}

pub struct HostRegistry {
    slots: HashMap<i64, HostSlot>,
    by_bin: HashMap<String, Vec<i64>>,
}

impl HostRegistry {
    pub fn build(hosts: Vec<Host>) -> Self {
        let mut slots = HashMap::new();
        let mut by_bin: HashMap<String, Vec<i64>> = HashMap::new();

        for host in hosts {
            for bin in host.bins() {
                by_bin.entry(bin).or_default().push(host.id);
            }
            slots.insert(host.id, HostSlot::new(host));
        }

        Self { slots, by_bin }
    }

    pub fn host(&self, id: i64) -> Option<&Host> {
        self.slots.get(&id).map(|slot| &slot.host)
    }

    pub fn slot(&self, id: i64) -> Option<&HostSlot> {
        self.slots.get(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 心跳超出 `host_timeout` 的主机
    pub fn stale_hosts(&self, now: DateTime<Utc>, host_timeout_seconds: i64) -> Vec<&Host> {
        self.slots
            .values()
            .map(|slot| &slot.host)
            .filter(|host| host.is_stale(now, host_timeout_seconds))
            .collect()
    }

    /// 为任务挑选主机
    ///
    /// 候选集是 bin 内的合格主机，排除被拒绝的、容量不足的和本 tick
    /// 已领满 maxjobs 的，按预计负载比升序取最小者；负载比相同时
    /// 偏向心跳最新的主机。
    pub fn select_host(
        &self,
        bin: &str,
        weight: f64,
        refused: Option<&HashSet<i64>>,
        config: &SchedulerConfig,
        now: DateTime<Utc>,
    ) -> Option<i64> {
        let candidates = self.by_bin.get(bin)?;

        candidates
            .iter()
            .filter_map(|id| self.slots.get(id))
            .filter(|slot| {
                slot.host.is_eligible(now, config.ready_timeout_seconds)
                    && !slot.host.is_stale(now, config.host_timeout_seconds)
            })
            .filter(|slot| !refused.is_some_and(|set| set.contains(&slot.host.id)))
            .filter(|slot| !slot.would_exceed_capacity(weight, config.capacity_overcommit))
            .filter(|slot| slot.assigned_this_tick < config.maxjobs)
            .min_by(|a, b| {
                a.projected_ratio(weight)
                    .partial_cmp(&b.projected_ratio(weight))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.host.last_update.cmp(&a.host.last_update))
            })
            .map(|slot| slot.host.id)
    }

    /// 记录一次已提交的分配，同一 tick 内的后续排序会看到它
    pub fn note_assignment(&mut self, host_id: i64, weight: f64) {
        if let Some(slot) = self.slots.get_mut(&host_id) {
            slot.pending_weight += weight;
            slot.assigned_this_tick += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn host(id: i64, capacity: f64, task_load: f64) -> Host {
        Host {
            id,
            user_id: None,
            name: format!("builder-{id:02}"),
            arches: "x86_64".to_string(),
            channels: vec![1],
            capacity,
            task_load,
            ready: true,
            enabled: true,
            description: None,
            comment: None,
            last_update: Utc::now(),
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig::default()
    }

    #[test]
    fn test_bin_index() {
        let registry = HostRegistry::build(vec![host(1, 4.0, 0.0)]);
        let now = Utc::now();

        assert!(registry
            .select_host("1:x86_64", 1.0, None, &config(), now)
            .is_some());
        assert!(registry
            .select_host("1:noarch", 1.0, None, &config(), now)
            .is_some());
        assert!(registry
            .select_host("2:x86_64", 1.0, None, &config(), now)
            .is_none());
        assert!(registry
            .select_host("1:aarch64", 1.0, None, &config(), now)
            .is_none());
    }

    #[test]
    fn test_best_fit_prefers_lowest_ratio() {
        let busy = host(1, 4.0, 3.0);
        let idle = host(2, 4.0, 0.0);
        let registry = HostRegistry::build(vec![busy, idle]);
        let now = Utc::now();

        let selected = registry.select_host("1:x86_64", 1.0, None, &config(), now);
        assert_eq!(selected, Some(2));
    }

    #[test]
    fn test_ratio_tie_break_prefers_freshest() {
        let now = Utc::now();
        let mut older = host(1, 4.0, 0.0);
        older.last_update = now - Duration::seconds(100);
        let mut fresher = host(2, 4.0, 0.0);
        fresher.last_update = now - Duration::seconds(5);
        let registry = HostRegistry::build(vec![older, fresher]);

        let selected = registry.select_host("1:x86_64", 1.0, None, &config(), now);
        assert_eq!(selected, Some(2));
    }

    #[test]
    fn test_capacity_overcommit_bound() {
        let full = host(1, 2.0, 6.5);
        let registry = HostRegistry::build(vec![full]);
        let now = Utc::now();

        // 2.0 容量 + 5.0 超额 = 7.0，6.5 + 1.0 超出
        assert!(registry
            .select_host("1:x86_64", 1.0, None, &config(), now)
            .is_none());
        // 0.4 还能放下
        assert!(registry
            .select_host("1:x86_64", 0.4, None, &config(), now)
            .is_some());
    }

    #[test]
    fn test_pending_weight_counts_against_capacity() {
        let mut registry = HostRegistry::build(vec![host(1, 4.0, 0.0)]);
        let now = Utc::now();

        // 9 个权重 1.0 的分配后达到 4.0 + 5.0 上限
        for _ in 0..9 {
            let selected = registry.select_host("1:x86_64", 1.0, None, &config(), now);
            assert_eq!(selected, Some(1));
            registry.note_assignment(1, 1.0);
        }
        assert!(registry
            .select_host("1:x86_64", 1.0, None, &config(), now)
            .is_none());
    }

    #[test]
    fn test_maxjobs_limits_per_tick_assignments() {
        let mut cfg = config();
        cfg.maxjobs = 2;
        let mut registry = HostRegistry::build(vec![host(1, 100.0, 0.0)]);
        let now = Utc::now();

        for _ in 0..2 {
            assert!(registry
                .select_host("1:x86_64", 0.1, None, &cfg, now)
                .is_some());
            registry.note_assignment(1, 0.1);
        }
        assert!(registry
            .select_host("1:x86_64", 0.1, None, &cfg, now)
            .is_none());
    }

    #[test]
    fn test_refused_host_is_excluded() {
        let registry = HostRegistry::build(vec![host(1, 4.0, 0.0)]);
        let now = Utc::now();
        let refused: HashSet<i64> = [1].into_iter().collect();

        assert!(registry
            .select_host("1:x86_64", 1.0, Some(&refused), &config(), now)
            .is_none());
    }

    #[test]
    fn test_not_ready_and_stale_hosts_are_excluded() {
        let now = Utc::now();
        let mut unready = host(1, 4.0, 0.0);
        unready.ready = false;
        let mut silent = host(2, 4.0, 0.0);
        silent.last_update = now - Duration::seconds(300);
        let registry = HostRegistry::build(vec![unready, silent]);

        assert!(registry
            .select_host("1:x86_64", 1.0, None, &config(), now)
            .is_none());
    }

    #[test]
    fn test_zero_capacity_ranks_last() {
        let zero = host(1, 0.0, 0.0);
        let normal = host(2, 4.0, 3.9);
        let registry = HostRegistry::build(vec![zero, normal]);
        let now = Utc::now();

        // 容量为零的主机比率无穷大，即使另一台几乎满载也排在后面
        let selected = registry.select_host("1:x86_64", 0.05, None, &config(), now);
        assert_eq!(selected, Some(2));
    }

    #[test]
    fn test_stale_hosts_listing() {
        let now = Utc::now();
        let fresh = host(1, 4.0, 0.0);
        let mut dead = host(2, 4.0, 0.0);
        dead.last_update = now - Duration::seconds(1000);
        let registry = HostRegistry::build(vec![fresh, dead]);

        let stale = registry.stale_hosts(now, 900);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, 2);
    }
}
