//! Error taxonomy for backup, restore, retention and failover operations
//!
//! Collaborators (dump executor, codecs, storage drivers, step handlers) report
//! `anyhow::Error`; the core wraps them into the variant that names the stage
//! which failed, so callers can match on the kind and still read the cause.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DrError {
    #[error("Strategy '{strategy}' already has {running} running job(s) (max {max})")]
    ConcurrencyLimitExceeded {
        strategy: String,
        running: usize,
        max: usize,
    },

    #[error("Database dump failed: {0:#}")]
    DumpFailed(#[source] anyhow::Error),

    #[error("Database load failed: {0:#}")]
    LoadFailed(#[source] anyhow::Error),

    #[error("Compression failed: {0:#}")]
    CompressionFailed(#[source] anyhow::Error),

    #[error("Encryption failed: {0:#}")]
    EncryptionFailed(#[source] anyhow::Error),

    #[error("All {attempted} storage destination(s) failed: {}", .errors.join("; "))]
    AllDestinationsFailed { attempted: usize, errors: Vec<String> },

    #[error("Backup job not found: {0}")]
    BackupNotFound(String),

    #[error("No accessible storage location for backup job {0}")]
    NoAccessibleBackupLocation(String),

    #[error("Integrity check failed for job {job_id}: expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        job_id: String,
        expected: String,
        actual: String,
    },

    #[error("Retention cleanup failed for strategy '{strategy}': {message}")]
    RetentionCleanupError { strategy: String, message: String },

    #[error("Failover step '{step}' failed after {attempts} attempt(s): {message}")]
    FailoverStepFailed {
        step: String,
        attempts: u32,
        message: String,
    },

    #[error("Health check for '{service}' timed out after {timeout:?}")]
    HealthCheckTimeout { service: String, timeout: Duration },

    #[error("Strategy not found: {0}")]
    StrategyNotFound(String),

    #[error("Strategy '{0}' is disabled")]
    StrategyDisabled(String),

    #[error("Strategy '{0}' is already registered")]
    StrategyExists(String),

    #[error("Failover plan not found: {0}")]
    PlanNotFound(String),

    #[error("Failover plan '{0}' is already running")]
    FailoverInProgress(String),

    #[error("Hook '{hook}' failed: {source:#}")]
    HookFailed {
        hook: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Job {0} was cancelled")]
    Cancelled(String),

    #[error("Job {job_id} exceeded its timeout of {timeout:?}")]
    Timeout { job_id: String, timeout: Duration },

    #[error("Job ledger error: {0:#}")]
    Ledger(#[source] anyhow::Error),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl DrError {
    /// Short machine-readable name of the error kind, used in alert context
    pub fn kind(&self) -> &'static str {
        match self {
            DrError::ConcurrencyLimitExceeded { .. } => "concurrency_limit_exceeded",
            DrError::DumpFailed(_) => "dump_failed",
            DrError::LoadFailed(_) => "load_failed",
            DrError::CompressionFailed(_) => "compression_failed",
            DrError::EncryptionFailed(_) => "encryption_failed",
            DrError::AllDestinationsFailed { .. } => "all_destinations_failed",
            DrError::BackupNotFound(_) => "backup_not_found",
            DrError::NoAccessibleBackupLocation(_) => "no_accessible_backup_location",
            DrError::IntegrityCheckFailed { .. } => "integrity_check_failed",
            DrError::RetentionCleanupError { .. } => "retention_cleanup_error",
            DrError::FailoverStepFailed { .. } => "failover_step_failed",
            DrError::HealthCheckTimeout { .. } => "health_check_timeout",
            DrError::StrategyNotFound(_) => "strategy_not_found",
            DrError::StrategyDisabled(_) => "strategy_disabled",
            DrError::StrategyExists(_) => "strategy_exists",
            DrError::PlanNotFound(_) => "plan_not_found",
            DrError::FailoverInProgress(_) => "failover_in_progress",
            DrError::HookFailed { .. } => "hook_failed",
            DrError::Cancelled(_) => "cancelled",
            DrError::Timeout { .. } => "timeout",
            DrError::Ledger(_) => "ledger",
            DrError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, DrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_destinations_failed_message_lists_errors() {
        let err = DrError::AllDestinationsFailed {
            attempted: 2,
            errors: vec!["local: disk full".to_string(), "s3: denied".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("All 2 storage destination(s) failed"));
        assert!(msg.contains("local: disk full; s3: denied"));
        assert_eq!(err.kind(), "all_destinations_failed");
    }

    #[test]
    fn test_wrapped_collaborator_error_keeps_cause() {
        let err = DrError::DumpFailed(anyhow::anyhow!("pg_dump exited with 1"));
        assert!(err.to_string().contains("pg_dump exited with 1"));
    }
}
