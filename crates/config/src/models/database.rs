use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/kojihub".to_string(),
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
        }
    }
}

impl ConfigValidator for DatabaseConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.url, "database.url")?;
        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(crate::ConfigError::Validation(format!(
                "database.url must be a postgres URL, got: {}",
                self.url
            )));
        }
        ValidationUtils::validate_count(self.max_connections as usize, "database.max_connections", 1000)?;
        if self.min_connections > self.max_connections {
            return Err(crate::ConfigError::Validation(
                "database.min_connections cannot exceed max_connections".to_string(),
            ));
        }
        ValidationUtils::validate_timeout_seconds(
            self.connection_timeout_seconds,
            "database.connection_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.idle_timeout_seconds,
            "database.idle_timeout_seconds",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_validation() {
        let config = DatabaseConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.url = "mysql://localhost/kojihub".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.min_connections = 20;
        assert!(invalid.validate().is_err());
    }
}
