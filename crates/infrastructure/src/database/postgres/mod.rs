mod postgres_host_data_repository;
mod postgres_host_repository;
mod postgres_log_repository;
mod postgres_refusal_repository;
mod postgres_sys_data_repository;
mod postgres_task_repository;
mod postgres_task_run_repository;

pub use postgres_host_data_repository::PostgresHostDataRepository;
pub use postgres_host_repository::PostgresHostRepository;
pub use postgres_log_repository::PostgresLogMessageRepository;
pub use postgres_refusal_repository::PostgresRefusalRepository;
pub use postgres_sys_data_repository::PostgresSysDataRepository;
pub use postgres_task_repository::PostgresTaskRepository;
pub use postgres_task_run_repository::PostgresTaskRunRepository;
