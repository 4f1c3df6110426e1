//! Backup Orchestrator Library
//!
//! Scheduled database backups with multi-destination storage, verified
//! restores, tiered retention, health monitoring and failover plans.

pub mod config;
pub mod error;
pub mod jobs;
pub mod managers;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, resolve_all_strategies, BackupStrategy, Config};
pub use error::{DrError, Result};
pub use jobs::{BackupJob, JobStatus, RestoreOptions};
pub use managers::backup::{BackupManager, BackupManagerBuilder};
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
pub use managers::notification::{AlertEvent, AlertSink, EventKind, Notifier};
