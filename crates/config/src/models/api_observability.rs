use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
    pub request_timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
            request_timeout_seconds: 30,
        }
    }
}

impl ConfigValidator for ApiConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.bind_address, "api.bind_address")?;
        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(crate::ConfigError::Validation(format!(
                "api.bind_address is not a valid socket address: {}",
                self.bind_address
            )));
        }
        ValidationUtils::validate_timeout_seconds(
            self.request_timeout_seconds,
            "api.request_timeout_seconds",
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(crate::ConfigError::Validation(format!(
                "Invalid log level: {}. Valid options: {:?}",
                self.log_level, valid_levels
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_config_validation() {
        let config = ApiConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.bind_address = "not-an-address".to_string();
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_observability_config_validation() {
        let config = ObservabilityConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.log_level = "verbose".to_string();
        assert!(invalid.validate().is_err());
    }
}
