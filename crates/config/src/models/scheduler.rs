use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 调度器配置
///
/// # 字段说明
///
/// - `maxjobs`: 每台主机每个 tick 最多获得的新分配数
/// - `capacity_overcommit`: 超出声明容量的可分配余量
/// - `ready_timeout_seconds`: ready 标志在无心跳时的有效期
/// - `assign_timeout_seconds`: 主机确认 ASSIGNED 任务的时间窗口
/// - `soft_refusal_timeout_seconds`: 软拒绝阻止再分配的时长
/// - `host_timeout_seconds`: 心跳中断多久后回收主机上的活跃任务
/// - `run_interval_seconds`: 两次 tick 之间的最小间隔
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub maxjobs: usize,
    pub capacity_overcommit: f64,
    pub ready_timeout_seconds: i64,
    pub assign_timeout_seconds: i64,
    pub soft_refusal_timeout_seconds: i64,
    pub host_timeout_seconds: i64,
    pub run_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            maxjobs: 15,
            capacity_overcommit: 5.0,
            ready_timeout_seconds: 180,
            assign_timeout_seconds: 300,
            soft_refusal_timeout_seconds: 900,
            host_timeout_seconds: 900,
            run_interval_seconds: 60,
        }
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_count(self.maxjobs, "scheduler.maxjobs", 10_000)?;
        ValidationUtils::validate_non_negative(
            self.capacity_overcommit,
            "scheduler.capacity_overcommit",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.ready_timeout_seconds as u64,
            "scheduler.ready_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.assign_timeout_seconds as u64,
            "scheduler.assign_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.soft_refusal_timeout_seconds as u64,
            "scheduler.soft_refusal_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.host_timeout_seconds as u64,
            "scheduler.host_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.run_interval_seconds,
            "scheduler.run_interval_seconds",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.maxjobs, 15);
        assert_eq!(config.capacity_overcommit, 5.0);
        assert_eq!(config.ready_timeout_seconds, 180);
        assert_eq!(config.assign_timeout_seconds, 300);
        assert_eq!(config.soft_refusal_timeout_seconds, 900);
        assert_eq!(config.host_timeout_seconds, 900);
        assert_eq!(config.run_interval_seconds, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scheduler_config_rejects_zero_interval() {
        let mut config = SchedulerConfig::default();
        config.run_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scheduler_config_rejects_negative_overcommit() {
        let mut config = SchedulerConfig::default();
        config.capacity_overcommit = -1.0;
        assert!(config.validate().is_err());
    }
}
