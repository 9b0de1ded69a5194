use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    database::DatabaseConfig,
    scheduler::SchedulerConfig,
};
use crate::validation::ConfigValidator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
    pub observability: ObservabilityConfig,
    /// 任务方法默认权重的覆盖项
    #[serde(default)]
    pub methods: HashMap<String, f64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            api: ApiConfig::default(),
            observability: ObservabilityConfig::default(),
            methods: HashMap::new(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/kojihub.toml",
                "kojihub.toml",
                "/etc/kojihub/config.toml",
            ];

            let mut config_file_found = false;
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    config_file_found = true;
                    break;
                }
            }

            if !config_file_found {
                builder = builder
                    .set_default("database.url", "postgresql://localhost/kojihub")?
                    .set_default("database.max_connections", 10)?
                    .set_default("database.min_connections", 1)?
                    .set_default("database.connection_timeout_seconds", 30)?
                    .set_default("database.idle_timeout_seconds", 600)?
                    .set_default("scheduler.enabled", true)?
                    .set_default("scheduler.maxjobs", 15)?
                    .set_default("scheduler.capacity_overcommit", 5.0)?
                    .set_default("scheduler.ready_timeout_seconds", 180)?
                    .set_default("scheduler.assign_timeout_seconds", 300)?
                    .set_default("scheduler.soft_refusal_timeout_seconds", 900)?
                    .set_default("scheduler.host_timeout_seconds", 900)?
                    .set_default("scheduler.run_interval_seconds", 60)?
                    .set_default("api.enabled", true)?
                    .set_default("api.bind_address", "0.0.0.0:8080")?
                    .set_default("api.cors_enabled", true)?
                    .set_default("api.cors_origins", vec!["*"])?
                    .set_default("api.request_timeout_seconds", 30)?
                    .set_default("observability.log_level", "info")?;
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("KOJIHUB")
                .separator("_")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.database.validate()?;
        self.scheduler.validate()?;
        self.api.validate()?;
        self.observability.validate()?;
        for (method, weight) in &self.methods {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(crate::ConfigError::Validation(format!(
                    "methods.{method} must be a positive weight"
                )));
            }
        }
        Ok(())
    }
}
