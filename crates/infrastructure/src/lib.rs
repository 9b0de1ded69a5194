pub mod advisory_lock;
pub mod database;

pub use advisory_lock::PgAdvisoryLock;
pub use database::manager::DatabaseManager;
pub use database::postgres::{
    PostgresHostDataRepository, PostgresHostRepository, PostgresLogMessageRepository,
    PostgresRefusalRepository, PostgresSysDataRepository, PostgresTaskRepository,
    PostgresTaskRunRepository,
};
