//! Test fixtures and sample data
//!
//! Provides pre-built ledger records and config templates for testing.

use backup_orchestrator::config::{BackupStrategy, DatabaseConfig, StrategyConfig};
use backup_orchestrator::jobs::{ArtifactInfo, BackupJob, StorageLocation};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// A completed job that claims to have been taken at `taken_at`
pub fn completed_job(strategy: &BackupStrategy, taken_at: DateTime<Utc>) -> BackupJob {
    let mut job = BackupJob::new(strategy);
    job.mark_running().expect("pending -> running");
    job.mark_completed(
        ArtifactInfo {
            size_bytes: 64,
            checksum: "0".repeat(64),
            content_checksum: "0".repeat(64),
        },
        Vec::<StorageLocation>::new(),
    )
    .expect("running -> completed");
    job.created_at = taken_at;
    job.started_at = Some(taken_at);
    job.finished_at = Some(taken_at + Duration::minutes(5));
    job
}

/// A failed job taken at `taken_at`
pub fn failed_job(strategy: &BackupStrategy, taken_at: DateTime<Utc>) -> BackupJob {
    let mut job = BackupJob::new(strategy);
    job.mark_running().expect("pending -> running");
    job.mark_failed("dump tool exited with 1").expect("running -> failed");
    job.created_at = taken_at;
    job.started_at = Some(taken_at);
    job
}

/// One completed job per day at 02:00 UTC, oldest first, the last on `last_day`
pub fn daily_jobs(strategy: &BackupStrategy, count: usize, last_day: DateTime<Utc>) -> Vec<BackupJob> {
    (0..count)
        .rev()
        .map(|days_back| completed_job(strategy, last_day - Duration::days(days_back as i64)))
        .collect()
}

/// Fixed reference instant: Sunday 2024-06-30 02:00 UTC
pub fn reference_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 30, 2, 0, 0).unwrap()
}

/// Raw strategy config over a file database
pub fn strategy_config(targets: &[&str], source: &str) -> StrategyConfig {
    StrategyConfig {
        enabled: true,
        profile: None,
        description: "Test strategy".to_string(),
        kind: Default::default(),
        schedule: "0 2 * * *".to_string(),
        targets: targets.iter().map(|t| t.to_string()).collect(),
        timeout_seconds: None,
        max_concurrent_jobs: None,
        priority: 10,
        retention_daily: None,
        retention_weekly: None,
        retention_monthly: None,
        retention_yearly: None,
        compression: None,
        encryption: None,
        pre_backup_hooks: vec![],
        post_backup_hooks: vec![],
        excludes: vec![],
        database: DatabaseConfig::file(source),
    }
}

/// Minimal valid config TOML template
///
/// Placeholders: `{work_dir}`, `{ledger}`, `{log_dir}`, `{backup_path}`, `{source}`
pub fn minimal_config_toml() -> &'static str {
    r#"
[global]
work_directory = "{work_dir}"
ledger_path = "{ledger}"
log_directory = "{log_dir}"

[destinations.local]
kind = "local"
options = { path = "{backup_path}" }

[strategies.daily-full]
schedule = "0 2 * * *"
targets = ["local"]
compression = "gzip"

[strategies.daily-full.database]
kind = "file"
connection = "{source}"
"#
}

/// Config with profiles, a remote destination and disaster recovery
pub fn full_config_toml() -> &'static str {
    r#"
[global]
work_directory = "{work_dir}"
ledger_path = "{ledger}"
log_directory = "{log_dir}"
retention_daily = 7
retention_weekly = 4
retention_monthly = 12
default_timeout_seconds = 600

[destinations.local]
kind = "local"
priority = 1
options = { path = "{backup_path}" }

[destinations.offsite]
kind = "s3"
priority = 2
options = { put = "aws s3 cp {src} s3://backups/{key}", get = "aws s3 cp {uri} {dst}", delete = "aws s3 rm {uri}", uri = "s3://backups/{key}" }

[profiles.critical]
targets = ["local", "offsite"]
retention_daily = 14
timeout_seconds = 1800

[strategies.orders]
profile = "critical"
schedule = "*/15 * * * *"
max_concurrent_jobs = 1

[strategies.orders.database]
kind = "postgres"
connection = "postgres://backup@db/orders"

[strategies.logs]
schedule = "@daily"
targets = ["local"]
retention_daily = 3

[strategies.logs.database]
kind = "file"
connection = "{source}"

[disaster_recovery]
rpo_minutes = 60
primary_region = "eu-central"
failure_threshold = 3
auto_failover = false

[[disaster_recovery.services]]
name = "postgres"
check = "tcp"
target = "127.0.0.1:5432"

[failover_plans.db-outage]
triggers = ["postgres"]
target_region = "eu-west"

[[failover_plans.db-outage.steps]]
id = "promote"
action = "database_failover"
retries = 2
config = { command = "pg_ctl promote -D {data_dir}", data_dir = "/var/lib/postgresql" }

[[failover_plans.db-outage.rollback_steps]]
id = "notify"
action = "notification"
config = { message = "promotion failed" }
"#
}

/// Fill a config template with concrete paths
pub fn render_config(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}
