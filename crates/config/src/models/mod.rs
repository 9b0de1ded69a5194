mod api_observability;
mod app_config;
mod database;
mod scheduler;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use scheduler::SchedulerConfig;
