//! Test utilities for backup-orchestrator
//!
//! This crate provides shared test utilities, mock implementations,
//! and helper functions for testing the backup orchestrator.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{ConfigBuilder, TestContext};
//!
//! #[tokio::test]
//! async fn my_test() {
//!     let ctx = TestContext::new();
//!     let manager = ctx.manager(vec![ctx.strategy("orders", 2)]);
//!     let job = manager.run_backup("orders").await.unwrap();
//!     // ... test code
//! }
//! ```

pub mod config_builder;
pub mod fixtures;
pub mod test_context;

// Re-export commonly used items
pub use config_builder::ConfigBuilder;
pub use fixtures::*;
pub use test_context::TestContext;

// Re-export types from the main crate for convenience
pub use backup_orchestrator::config::{
    BackupStrategy, Config, DatabaseConfig, DisasterRecoveryConfig, FailoverAction, FailoverPlan,
    FailoverStep, GlobalConfig, MonitoredServiceConfig, NotificationConfig, Profile,
    RetentionPolicy, StorageConfig, StorageKind, StrategyConfig,
};
pub use backup_orchestrator::error::DrError;
pub use backup_orchestrator::jobs::{BackupJob, JobStatus, RestoreOptions};

// Re-export mock implementations from the main crate
pub use backup_orchestrator::managers::failover::mock::RecordingHandler;
pub use backup_orchestrator::managers::health::mock::FlakyCheck;
pub use backup_orchestrator::managers::notification::mock::RecordingSink;
pub use backup_orchestrator::utils::dump::mock::MemoryDumpExecutor;
pub use backup_orchestrator::utils::executor::mock::{MockExecutor, MockResponse};
pub use backup_orchestrator::utils::storage::mock::FaultyDriver;

/// Common test result type
pub type TestResult<T = ()> = anyhow::Result<T>;
