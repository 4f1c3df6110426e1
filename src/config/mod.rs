//! Configuration module for backup-orchestrator
//!
//! This module handles loading, validating, and resolving configuration from TOML files.
//!
//! ## Configuration Inheritance
//!
//! Strategy settings are applied in this order (later overrides earlier):
//! 1. Global defaults
//! 2. Profile settings (if profile is specified)
//! 3. Strategy-level settings
//!
//! ## Example Usage
//!
//! ```no_run
//! use backup_orchestrator::config;
//!
//! let config = config::load_config("backup-orchestrator.toml")?;
//! let strategies = config::resolve_all_strategies(&config)?;
//!
//! for (name, strategy) in strategies {
//!     println!("Strategy: {}, schedule: {}", name, strategy.schedule);
//! }
//! # Ok::<(), config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{
    load_config, resolve_all_strategies, resolve_strategy, validate_config, ConfigError, Result,
};
pub use types::*;

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_expand_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_tilde(&path);
        assert!(!expanded.starts_with("~"));

        let path = PathBuf::from("/absolute/path");
        let expanded = expand_tilde(&path);
        assert_eq!(expanded, path);
    }

    #[test]
    fn test_retention_policy_zero() {
        let policy = RetentionPolicy::default();
        assert!(policy.is_zero());

        let policy = RetentionPolicy { daily: 7, weekly: 4, monthly: 12, yearly: 0 };
        assert!(!policy.is_zero());
        assert_eq!(policy.max_kept(), 23);
    }

    #[test]
    fn test_plan_triggers() {
        let plan = FailoverPlan {
            name: "db".to_string(),
            triggers: vec!["postgres".to_string()],
            steps: vec![FailoverStep::new("promote", FailoverAction::DatabaseFailover)],
            rollback_steps: vec![],
            target_region: None,
        };
        assert!(plan.is_triggered_by("postgres"));
        assert!(!plan.is_triggered_by("redis"));

        let any = FailoverPlan { triggers: vec!["*".to_string()], ..plan };
        assert!(any.is_triggered_by("redis"));
    }
}
