use crate::{ConfigError, ConfigResult};

/// 配置段校验接口
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{field} cannot be empty")));
        }
        Ok(())
    }

    pub fn validate_timeout_seconds(value: u64, field: &str) -> ConfigResult<()> {
        if value == 0 {
            return Err(ConfigError::Validation(format!(
                "{field} must be greater than zero"
            )));
        }
        if value > 86_400 {
            return Err(ConfigError::Validation(format!(
                "{field} must not exceed 86400 seconds"
            )));
        }
        Ok(())
    }

    pub fn validate_count(value: usize, field: &str, max: usize) -> ConfigResult<()> {
        if value == 0 || value > max {
            return Err(ConfigError::Validation(format!(
                "{field} must be between 1 and {max}"
            )));
        }
        Ok(())
    }

    pub fn validate_non_negative(value: f64, field: &str) -> ConfigResult<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::Validation(format!(
                "{field} must be a non-negative number"
            )));
        }
        Ok(())
    }
}
