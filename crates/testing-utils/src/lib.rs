//! Testing utilities for the kojihub workspace
//!
//! In-memory mock repositories sharing a single state store, plus
//! builder helpers for test entities.

pub mod builders;
pub mod mocks;

pub use builders::{HostBuilder, RefusalBuilder, TaskBuilder, TaskRunBuilder};
pub use mocks::{
    MockDb, MockHostDataRepository, MockHostRepository, MockLogMessageRepository,
    MockRefusalRepository, MockSchedulerLock, MockSysDataRepository, MockTaskRepository,
    MockTaskRunRepository,
};
