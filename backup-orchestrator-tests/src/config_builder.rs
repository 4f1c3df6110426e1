//! Fluent API for building test configurations
//!
//! Provides a builder pattern for creating test configurations with sensible defaults.

use crate::fixtures::strategy_config;
use backup_orchestrator::config::{
    Config, DisasterRecoveryConfig, FailoverPlan, GlobalConfig, MonitoredServiceConfig,
    NotificationConfig, Profile, RetentionPolicy, StorageConfig, StrategyConfig,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builder for creating test configurations
pub struct ConfigBuilder {
    temp_dir: TempDir,
    global: GlobalConfig,
    destinations: HashMap<String, StorageConfig>,
    strategies: HashMap<String, StrategyConfig>,
    profiles: HashMap<String, Profile>,
    notifications: NotificationConfig,
    disaster_recovery: DisasterRecoveryConfig,
    failover_plans: HashMap<String, FailoverPlan>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder with minimal defaults
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let log_directory = temp_dir.path().join("logs");
        fs::create_dir_all(&log_directory).expect("Failed to create log_directory");

        // Source "database" for file-kind strategies
        fs::write(temp_dir.path().join("source.db"), b"CREATE TABLE t (id int);")
            .expect("Failed to write source database");

        let global = GlobalConfig {
            work_directory: temp_dir.path().join("work"),
            ledger_path: temp_dir.path().join("ledger.json"),
            log_directory,
            log_max_files: 5,
            default_timeout_seconds: 300,
            ..GlobalConfig::default()
        };

        Self {
            temp_dir,
            global,
            destinations: HashMap::new(),
            strategies: HashMap::new(),
            profiles: HashMap::new(),
            notifications: NotificationConfig::default(),
            disaster_recovery: DisasterRecoveryConfig::default(),
            failover_plans: HashMap::new(),
        }
    }

    /// Create a minimal config with a local destination named `local`
    pub fn minimal() -> Self {
        let builder = Self::new();
        let path = builder.temp_dir.path().join("backups");
        builder.add_local_destination("local", &path, 1)
    }

    /// Set the default timeout
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.global.default_timeout_seconds = seconds;
        self
    }

    /// Set the global retention policy
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.global.retention_daily = retention.daily;
        self.global.retention_weekly = retention.weekly;
        self.global.retention_monthly = retention.monthly;
        self.global.retention_yearly = retention.yearly;
        self
    }

    /// Add a local destination
    pub fn add_local_destination(mut self, name: &str, path: &Path, priority: u32) -> Self {
        fs::create_dir_all(path).expect("Failed to create destination dir");
        self.destinations
            .insert(name.to_string(), StorageConfig::local(name, path, priority));
        self
    }

    /// Add a destination with custom settings
    pub fn add_destination(mut self, name: &str, destination: StorageConfig) -> Self {
        self.destinations.insert(name.to_string(), destination);
        self
    }

    /// Add a file-database strategy backed up to `local`
    pub fn add_strategy(self, name: &str) -> Self {
        let source = self.source_path();
        self.add_strategy_config(name, strategy_config(&["local"], &source.display().to_string()))
    }

    /// Add a disabled strategy
    pub fn add_disabled_strategy(self, name: &str) -> Self {
        let source = self.source_path();
        let mut config = strategy_config(&["local"], &source.display().to_string());
        config.enabled = false;
        self.add_strategy_config(name, config)
    }

    /// Add a strategy with full configuration
    pub fn add_strategy_config(mut self, name: &str, config: StrategyConfig) -> Self {
        self.strategies.insert(name.to_string(), config);
        self
    }

    /// Add a profile
    pub fn add_profile(mut self, name: &str, profile: Profile) -> Self {
        self.profiles.insert(name.to_string(), profile);
        self
    }

    /// Set notification configuration
    pub fn with_notifications(mut self, config: NotificationConfig) -> Self {
        self.notifications = config;
        self
    }

    pub fn with_disaster_recovery(mut self, config: DisasterRecoveryConfig) -> Self {
        self.disaster_recovery = config;
        self
    }

    pub fn add_monitored_service(mut self, service: MonitoredServiceConfig) -> Self {
        self.disaster_recovery.services.push(service);
        self
    }

    pub fn add_plan(mut self, plan: FailoverPlan) -> Self {
        self.failover_plans.insert(plan.name.clone(), plan);
        self
    }

    /// Get the temp directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// File used as the database of file-kind strategies
    pub fn source_path(&self) -> PathBuf {
        self.temp_dir.path().join("source.db")
    }

    /// Get a local destination's directory
    pub fn destination_path(&self, name: &str) -> Option<PathBuf> {
        self.destinations
            .get(name)
            .and_then(|d| d.option("path"))
            .map(PathBuf::from)
    }

    fn config(&self) -> Config {
        Config {
            global: self.global.clone(),
            destinations: self.destinations.clone(),
            notifications: self.notifications.clone(),
            profiles: self.profiles.clone(),
            strategies: self.strategies.clone(),
            disaster_recovery: self.disaster_recovery.clone(),
            failover_plans: self.failover_plans.clone(),
        }
    }

    /// Build the Config
    pub fn build(self) -> Config {
        self.config()
    }

    /// Write the config as TOML into the temp dir and return its path
    pub fn write_toml(&self) -> PathBuf {
        let path = self.temp_dir.path().join("config.toml");
        let content = toml::to_string(&self.config()).expect("Failed to serialize config");
        fs::write(&path, content).expect("Failed to write config file");
        path
    }

    /// Keep the temp directory alive alongside the config
    pub fn persist(self) -> (Config, TempDir) {
        let config = self.config();
        (config, self.temp_dir)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
