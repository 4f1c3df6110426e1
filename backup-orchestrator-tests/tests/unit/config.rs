//! Configuration loading, inheritance and validation

use backup_orchestrator::config::{
    load_config, resolve_all_strategies, BackupKind, CompressionAlgorithm, ConfigError,
    DatabaseKind, EncryptionConfig, FailoverAction, FailoverPlan, FailoverStep, HealthCheckKind,
    MonitoredServiceConfig, Profile, StorageConfig, StorageKind,
};
use std::fs;
use test_utils::{full_config_toml, minimal_config_toml, render_config, strategy_config, ConfigBuilder};

fn write_template(builder: &ConfigBuilder, template: &str) -> std::path::PathBuf {
    let dir = builder.temp_dir();
    let content = render_config(
        template,
        &[
            ("work_dir", &dir.join("work").display().to_string()),
            ("ledger", &dir.join("ledger.json").display().to_string()),
            ("log_dir", &dir.join("logs").display().to_string()),
            ("backup_path", &dir.join("backups").display().to_string()),
            ("source", &builder.source_path().display().to_string()),
        ],
    );
    let path = dir.join("template.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_minimal_template_loads() {
    let builder = ConfigBuilder::new();
    let config = load_config(write_template(&builder, minimal_config_toml())).unwrap();

    let strategies = resolve_all_strategies(&config).unwrap();
    let strategy = &strategies["daily-full"];
    assert_eq!(strategy.kind, BackupKind::Full);
    assert_eq!(strategy.compression, Some(CompressionAlgorithm::Gzip));
    assert_eq!(strategy.database.kind, DatabaseKind::File);
    assert_eq!(strategy.destinations.len(), 1);
    assert_eq!(strategy.destinations[0].name, "local");
}

#[test]
fn test_profile_inheritance() {
    let builder = ConfigBuilder::new();
    let config = load_config(write_template(&builder, full_config_toml())).unwrap();
    let strategies = resolve_all_strategies(&config).unwrap();

    let orders = &strategies["orders"];
    let names: Vec<_> = orders.destinations.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["local", "offsite"]);
    assert_eq!(orders.destinations[1].kind, StorageKind::S3);
    // profile beats global
    assert_eq!(orders.retention.daily, 14);
    assert_eq!(orders.timeout_seconds, 1800);
    // global fills the gaps
    assert_eq!(orders.retention.weekly, 4);
    assert_eq!(orders.retention.monthly, 12);
    assert_eq!(orders.max_concurrent_jobs, 1);

    let logs = &strategies["logs"];
    assert_eq!(logs.retention.daily, 3);
    assert_eq!(logs.timeout_seconds, 600);
}

#[test]
fn test_disaster_recovery_section() {
    let builder = ConfigBuilder::new();
    let config = load_config(write_template(&builder, full_config_toml())).unwrap();

    let dr = &config.disaster_recovery;
    assert_eq!(dr.rpo_minutes, 60);
    assert_eq!(dr.primary_region, "eu-central");
    assert!(!dr.auto_failover);
    assert_eq!(dr.services[0].check, HealthCheckKind::Tcp);

    let plan = &config.failover_plans["db-outage"];
    assert_eq!(plan.name, "db-outage");
    assert_eq!(plan.steps[0].action, FailoverAction::DatabaseFailover);
    assert_eq!(plan.steps[0].retries, 2);
    assert_eq!(plan.steps[0].config["data_dir"], "/var/lib/postgresql");
    assert_eq!(plan.rollback_steps[0].action, FailoverAction::Notification);
    assert_eq!(plan.target_region.as_deref(), Some("eu-west"));
}

#[test]
fn test_builder_config_round_trips_through_toml() {
    let builder = ConfigBuilder::minimal()
        .add_strategy("orders")
        .add_disabled_strategy("archive");
    let path = builder.write_toml();

    let config = load_config(&path).unwrap();
    let strategies = resolve_all_strategies(&config).unwrap();
    assert!(strategies["orders"].enabled);
    assert!(!strategies["archive"].enabled);
}

#[test]
fn test_unknown_destination_rejected() {
    let source = "/tmp/source.db";
    let builder = ConfigBuilder::minimal().add_strategy_config("orders", strategy_config(&["nowhere"], source));
    let err = load_config(builder.write_toml()).unwrap_err();
    assert!(matches!(err, ConfigError::DestinationNotFound(ref d) if d == "nowhere"));
}

#[test]
fn test_unknown_profile_rejected() {
    let mut strategy = strategy_config(&["local"], "/tmp/source.db");
    strategy.profile = Some("missing".to_string());
    let builder = ConfigBuilder::minimal().add_strategy_config("orders", strategy);
    assert!(matches!(
        load_config(builder.write_toml()).unwrap_err(),
        ConfigError::ProfileNotFound(_)
    ));
}

#[test]
fn test_profile_targets_used_when_strategy_has_none() {
    let profile = Profile {
        targets: vec!["local".to_string()],
        ..Default::default()
    };
    let mut strategy = strategy_config(&[], "/tmp/source.db");
    strategy.profile = Some("standard".to_string());
    let builder = ConfigBuilder::minimal()
        .add_profile("standard", profile)
        .add_strategy_config("orders", strategy);

    let config = load_config(builder.write_toml()).unwrap();
    let strategies = resolve_all_strategies(&config).unwrap();
    assert_eq!(strategies["orders"].destinations[0].name, "local");
}

#[test]
fn test_invalid_schedule_rejected() {
    let mut strategy = strategy_config(&["local"], "/tmp/source.db");
    strategy.schedule = "every tuesday".to_string();
    let builder = ConfigBuilder::minimal().add_strategy_config("orders", strategy);

    let err = load_config(builder.write_toml()).unwrap_err();
    assert!(err.to_string().contains("invalid schedule"));
}

#[test]
fn test_missing_key_file_rejected() {
    let mut strategy = strategy_config(&["local"], "/tmp/source.db");
    strategy.encryption = Some(EncryptionConfig {
        algorithm: Default::default(),
        key_file: "/nonexistent/backup.key".into(),
    });
    let builder = ConfigBuilder::minimal().add_strategy_config("orders", strategy);

    let err = load_config(builder.write_toml()).unwrap_err();
    assert!(err.to_string().contains("key file"));
}

#[test]
fn test_plan_trigger_must_name_monitored_service() {
    let plan = FailoverPlan {
        name: "db-outage".to_string(),
        triggers: vec!["redis".to_string()],
        steps: vec![FailoverStep::new("promote", FailoverAction::DatabaseFailover)],
        rollback_steps: vec![],
        target_region: None,
    };
    let builder = ConfigBuilder::minimal()
        .add_monitored_service(MonitoredServiceConfig {
            name: "postgres".to_string(),
            check: HealthCheckKind::Tcp,
            target: "127.0.0.1:5432".to_string(),
            timeout_seconds: 5,
        })
        .add_plan(plan);

    let err = load_config(builder.write_toml()).unwrap_err();
    assert!(err.to_string().contains("unknown service 'redis'"));
}

#[test]
fn test_remote_destination_needs_templates() {
    let mut bucket = StorageConfig::local("bucket", "/unused", 2);
    bucket.kind = StorageKind::S3;
    bucket.options.clear();
    let builder = ConfigBuilder::minimal().add_destination("bucket", bucket);

    let err = load_config(builder.write_toml()).unwrap_err();
    assert!(err.to_string().contains("'put' command template"));
}
