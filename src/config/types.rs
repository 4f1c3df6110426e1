use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub global: GlobalConfig,
    #[serde(default)]
    pub destinations: HashMap<String, StorageConfig>,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
    #[serde(default)]
    pub strategies: HashMap<String, StrategyConfig>,
    #[serde(default)]
    pub disaster_recovery: DisasterRecoveryConfig,
    #[serde(default)]
    pub failover_plans: HashMap<String, FailoverPlan>,
}

/// Global configuration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Scratch directory for in-flight artifacts
    #[serde(default = "default_work_directory")]
    pub work_directory: PathBuf,

    /// Job ledger file
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Default retention policy
    #[serde(default = "default_retention_daily")]
    pub retention_daily: u32,
    #[serde(default = "default_retention_weekly")]
    pub retention_weekly: u32,
    #[serde(default = "default_retention_monthly")]
    pub retention_monthly: u32,
    #[serde(default)]
    pub retention_yearly: u32,

    /// Execution limits
    #[serde(default = "default_timeout")]
    pub default_timeout_seconds: u64,
    #[serde(default = "default_max_concurrent_jobs")]
    pub default_max_concurrent_jobs: usize,

    /// How often every strategy is pruned in the background
    #[serde(default = "default_retention_sweep_interval")]
    pub retention_sweep_interval_minutes: u64,

    /// Logging configuration
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_max_files")]
    pub log_max_files: u32,
    #[serde(default = "default_log_max_size_mb")]
    pub log_max_size_mb: u64,

    /// Default exclusion patterns
    #[serde(default)]
    pub default_excludes: Vec<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            work_directory: default_work_directory(),
            ledger_path: default_ledger_path(),
            retention_daily: default_retention_daily(),
            retention_weekly: default_retention_weekly(),
            retention_monthly: default_retention_monthly(),
            retention_yearly: 0,
            default_timeout_seconds: default_timeout(),
            default_max_concurrent_jobs: default_max_concurrent_jobs(),
            retention_sweep_interval_minutes: default_retention_sweep_interval(),
            log_directory: default_log_directory(),
            log_level: default_log_level(),
            log_max_files: default_log_max_files(),
            log_max_size_mb: default_log_max_size_mb(),
            default_excludes: Vec::new(),
        }
    }
}

/// Storage destination configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct StorageConfig {
    /// Filled from the `[destinations.<name>]` key during resolution
    #[serde(default)]
    pub name: String,

    pub kind: StorageKind,

    /// 1 = tried first
    #[serde(default = "default_destination_priority")]
    pub priority: u32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub description: String,

    /// Backend-specific settings (paths, bucket names, command templates)
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl StorageConfig {
    /// Local directory destination
    pub fn local(name: &str, path: impl Into<PathBuf>, priority: u32) -> Self {
        let mut options = BTreeMap::new();
        options.insert("path".to_string(), path.into().display().to_string());
        Self {
            name: name.to_string(),
            kind: StorageKind::Local,
            priority,
            enabled: true,
            description: String::new(),
            options,
        }
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    S3,
    Gcs,
    Azure,
    Ftp,
    Rsync,
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorageKind::Local => "local",
            StorageKind::S3 => "s3",
            StorageKind::Gcs => "gcs",
            StorageKind::Azure => "azure",
            StorageKind::Ftp => "ftp",
            StorageKind::Rsync => "rsync",
        };
        f.write_str(name)
    }
}

/// Notification configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub discord_webhook_url: String,

    #[serde(default = "default_notify_on")]
    pub notify_on: Vec<Severity>,

    #[serde(default = "default_rate_limit")]
    pub rate_limit_minutes: u64,

    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            discord_webhook_url: String::new(),
            notify_on: default_notify_on(),
            rate_limit_minutes: default_rate_limit(),
            cache_file: default_cache_file(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Profile for grouping common strategy settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Profile {
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default)]
    pub retention_daily: Option<u32>,
    #[serde(default)]
    pub retention_weekly: Option<u32>,
    #[serde(default)]
    pub retention_monthly: Option<u32>,
    #[serde(default)]
    pub retention_yearly: Option<u32>,

    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    #[serde(default)]
    pub max_concurrent_jobs: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    #[default]
    Full,
    Incremental,
    Differential,
    Manual,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    Gzip,
    Bzip2,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
pub enum EncryptionAlgorithm {
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub algorithm: EncryptionAlgorithm,

    /// File holding the key: 64 hex characters, or a passphrase
    pub key_file: PathBuf,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgres,
    Mysql,
    Mongodb,
    Sqlite,
    /// File-level copy of `connection`
    File,
}

/// What to dump and how to reach it
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub kind: DatabaseKind,

    /// Connection string, or source path for `kind = "file"`
    pub connection: String,

    /// Override for the dump command template
    #[serde(default)]
    pub dump_command: Option<String>,

    /// Override for the load command template
    #[serde(default)]
    pub load_command: Option<String>,
}

impl DatabaseConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: DatabaseKind::File,
            connection: path.into().display().to_string(),
            dump_command: None,
            load_command: None,
        }
    }
}

/// Strategy configuration (raw, before profile merging)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Profile to inherit from (optional)
    #[serde(default)]
    pub profile: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub kind: BackupKind,

    /// Cron schedule
    pub schedule: String,

    /// Storage destinations (destination names)
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    #[serde(default)]
    pub max_concurrent_jobs: Option<usize>,

    #[serde(default = "default_strategy_priority")]
    pub priority: u32,

    /// Retention overrides
    #[serde(default)]
    pub retention_daily: Option<u32>,
    #[serde(default)]
    pub retention_weekly: Option<u32>,
    #[serde(default)]
    pub retention_monthly: Option<u32>,
    #[serde(default)]
    pub retention_yearly: Option<u32>,

    #[serde(default)]
    pub compression: Option<CompressionAlgorithm>,

    #[serde(default)]
    pub encryption: Option<EncryptionConfig>,

    #[serde(default)]
    pub pre_backup_hooks: Vec<Hook>,

    #[serde(default)]
    pub post_backup_hooks: Vec<Hook>,

    #[serde(default)]
    pub excludes: Vec<String>,

    pub database: DatabaseConfig,
}

/// Resolved backup strategy (after profile merging)
#[derive(Debug, Clone, PartialEq)]
pub struct BackupStrategy {
    pub name: String,
    pub description: String,
    pub kind: BackupKind,
    pub enabled: bool,
    pub schedule: String,
    pub retention: RetentionPolicy,
    pub compression: Option<CompressionAlgorithm>,
    pub encryption: Option<EncryptionConfig>,
    pub priority: u32,
    pub max_concurrent_jobs: usize,
    pub timeout_seconds: u64,
    /// Sorted by ascending priority
    pub destinations: Vec<StorageConfig>,
    pub pre_backup_hooks: Vec<Hook>,
    pub post_backup_hooks: Vec<Hook>,
    pub excludes: Vec<String>,
    pub database: DatabaseConfig,
}

impl BackupStrategy {
    /// Strategy with global defaults and no destinations
    pub fn new(name: &str, database: DatabaseConfig) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            kind: BackupKind::Full,
            enabled: true,
            schedule: "0 2 * * *".to_string(),
            retention: RetentionPolicy {
                daily: default_retention_daily(),
                weekly: default_retention_weekly(),
                monthly: default_retention_monthly(),
                yearly: 0,
            },
            compression: None,
            encryption: None,
            priority: default_strategy_priority(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            timeout_seconds: default_timeout(),
            destinations: Vec::new(),
            pre_backup_hooks: Vec::new(),
            post_backup_hooks: Vec::new(),
            excludes: Vec::new(),
            database,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn destination(&self, name: &str) -> Option<&StorageConfig> {
        self.destinations.iter().find(|d| d.name == name)
    }
}

/// Number of backups that survive pruning per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetentionPolicy {
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
    #[serde(default)]
    pub yearly: u32,
}

impl RetentionPolicy {
    /// All tiers zero: delete right after upload confirmation
    pub fn is_zero(&self) -> bool {
        self.daily == 0 && self.weekly == 0 && self.monthly == 0 && self.yearly == 0
    }

    pub fn max_kept(&self) -> usize {
        (self.daily + self.weekly + self.monthly + self.yearly) as usize
    }
}

/// Hook to run before or after backup
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Hook {
    /// Name/description of the hook
    #[serde(default)]
    pub name: String,

    /// Command to execute
    pub command: String,

    /// Optional working directory
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Timeout in seconds (optional)
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Whether to continue on failure
    #[serde(default)]
    pub continue_on_error: bool,
}

impl Hook {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.command
        } else {
            &self.name
        }
    }
}

/// Disaster recovery targets and health monitoring settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisasterRecoveryConfig {
    /// Recovery point objective
    #[serde(default = "default_rpo_minutes")]
    pub rpo_minutes: u64,

    /// Recovery time objective
    #[serde(default = "default_rto_minutes")]
    pub rto_minutes: u64,

    #[serde(default = "default_primary_region")]
    pub primary_region: String,

    /// Ordered list of regions to fail over to
    #[serde(default)]
    pub failover_regions: Vec<String>,

    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: u64,

    /// Consecutive failed checks before a service is degraded
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Run matching failover plans automatically on degradation
    #[serde(default)]
    pub auto_failover: bool,

    #[serde(default)]
    pub notification_channels: Vec<String>,

    #[serde(default)]
    pub services: Vec<MonitoredServiceConfig>,
}

impl Default for DisasterRecoveryConfig {
    fn default() -> Self {
        Self {
            rpo_minutes: default_rpo_minutes(),
            rto_minutes: default_rto_minutes(),
            primary_region: default_primary_region(),
            failover_regions: Vec::new(),
            health_check_interval_seconds: default_health_check_interval(),
            failure_threshold: default_failure_threshold(),
            auto_failover: false,
            notification_channels: Vec::new(),
            services: Vec::new(),
        }
    }
}

impl DisasterRecoveryConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }
}

/// A dependent service polled by the health monitor
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MonitoredServiceConfig {
    pub name: String,

    pub check: HealthCheckKind,

    /// URL, `host:port`, or shell command depending on `check`
    pub target: String,

    #[serde(default = "default_health_check_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckKind {
    Http,
    Tcp,
    Command,
}

/// Ordered remediation procedure
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FailoverPlan {
    /// Filled from the `[failover_plans.<name>]` key during loading
    #[serde(default)]
    pub name: String,

    /// Monitored service names whose degradation starts this plan (`*` = any)
    #[serde(default)]
    pub triggers: Vec<String>,

    pub steps: Vec<FailoverStep>,

    #[serde(default)]
    pub rollback_steps: Vec<FailoverStep>,

    /// Region that becomes active once the plan succeeds
    #[serde(default)]
    pub target_region: Option<String>,
}

impl FailoverPlan {
    pub fn is_triggered_by(&self, service: &str) -> bool {
        self.triggers.iter().any(|t| t == "*" || t == service)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FailoverStep {
    pub id: String,

    pub action: FailoverAction,

    #[serde(default)]
    pub config: BTreeMap<String, String>,

    #[serde(default = "default_step_timeout")]
    pub timeout_seconds: u64,

    /// Extra attempts after the first one
    #[serde(default)]
    pub retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl FailoverStep {
    pub fn new(id: &str, action: FailoverAction) -> Self {
        Self {
            id: id.to_string(),
            action,
            config: BTreeMap::new(),
            timeout_seconds: default_step_timeout(),
            retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailoverAction {
    DnsSwitch,
    DatabaseFailover,
    ServiceRestart,
    Notification,
    Custom,
}

// Default value functions

fn default_work_directory() -> PathBuf { PathBuf::from("~/.local/share/backup-orchestrator/work") }
fn default_ledger_path() -> PathBuf { PathBuf::from("~/.local/share/backup-orchestrator/ledger.json") }
fn default_retention_daily() -> u32 { 7 }
fn default_retention_weekly() -> u32 { 4 }
fn default_retention_monthly() -> u32 { 6 }
fn default_timeout() -> u64 { 3600 }
fn default_max_concurrent_jobs() -> usize { 1 }
fn default_retention_sweep_interval() -> u64 { 60 }
fn default_log_directory() -> PathBuf { PathBuf::from("~/logs") }
fn default_log_level() -> String { "info".to_string() }
fn default_log_max_files() -> u32 { 10 }
fn default_log_max_size_mb() -> u64 { 10 }
fn default_enabled() -> bool { true }
fn default_destination_priority() -> u32 { 1 }
fn default_strategy_priority() -> u32 { 5 }
fn default_notify_on() -> Vec<Severity> {
    vec![Severity::Critical, Severity::Warning]
}
fn default_rate_limit() -> u64 { 60 }
fn default_cache_file() -> PathBuf {
    PathBuf::from("~/.cache/backup-orchestrator-notifications.json")
}
fn default_rpo_minutes() -> u64 { 60 }
fn default_rto_minutes() -> u64 { 240 }
fn default_primary_region() -> String { "primary".to_string() }
fn default_health_check_interval() -> u64 { 30 }
fn default_failure_threshold() -> u32 { 3 }
fn default_health_check_timeout() -> u64 { 10 }
fn default_step_timeout() -> u64 { 60 }
fn default_retry_delay_ms() -> u64 { 1000 }
