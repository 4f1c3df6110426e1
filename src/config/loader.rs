use super::types::*;
use crate::utils::cron::CronSchedule;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Profile '{0}' not found")]
    ProfileNotFound(String),

    #[error("Destination '{0}' not found")]
    DestinationNotFound(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&contents)?;

    // Names live in the table keys
    for (name, destination) in config.destinations.iter_mut() {
        destination.name = name.clone();
    }
    for (name, plan) in config.failover_plans.iter_mut() {
        plan.name = name.clone();
    }

    validate_config(&config)?;
    Ok(config)
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.global.default_max_concurrent_jobs == 0 {
        return Err(ConfigError::ValidationError(
            "default_max_concurrent_jobs must be at least 1".to_string(),
        ));
    }

    if config.global.retention_sweep_interval_minutes == 0 {
        return Err(ConfigError::ValidationError(
            "global.retention_sweep_interval_minutes must be at least 1".to_string(),
        ));
    }

    for (name, destination) in &config.destinations {
        validate_destination(name, destination)?;
    }

    for (name, strategy) in &config.strategies {
        validate_strategy(name, strategy, config)?;
    }

    validate_disaster_recovery(config)?;

    Ok(())
}

fn validate_destination(name: &str, destination: &StorageConfig) -> Result<()> {
    match destination.kind {
        StorageKind::Local => {
            if destination.option("path").is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "Destination '{}': local destinations need a 'path' option",
                    name
                )));
            }
        }
        _ => {
            for op in ["put", "get", "delete"] {
                if destination.option(op).is_none() {
                    return Err(ConfigError::ValidationError(format!(
                        "Destination '{}': {} destinations need a '{}' command template",
                        name, destination.kind, op
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_strategy(name: &str, strategy: &StrategyConfig, config: &Config) -> Result<()> {
    // Check that profile exists if specified
    if let Some(ref profile_name) = strategy.profile {
        if !config.profiles.contains_key(profile_name) {
            return Err(ConfigError::ProfileNotFound(profile_name.clone()));
        }
    }

    // Validate that targets exist (either from strategy or inherited from profile)
    let targets = get_effective_targets(strategy, config);
    if targets.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Strategy '{}' has no storage targets",
            name
        )));
    }
    for target in targets {
        if !config.destinations.contains_key(&target) {
            return Err(ConfigError::DestinationNotFound(target));
        }
    }

    if let Err(e) = CronSchedule::parse(&strategy.schedule) {
        return Err(ConfigError::ValidationError(format!(
            "Strategy '{}': invalid schedule '{}': {}",
            name, strategy.schedule, e
        )));
    }

    if strategy.max_concurrent_jobs == Some(0) {
        return Err(ConfigError::ValidationError(format!(
            "Strategy '{}': max_concurrent_jobs must be at least 1",
            name
        )));
    }

    if let Some(ref encryption) = strategy.encryption {
        let key_file = super::expand_tilde(&encryption.key_file);
        if !key_file.exists() {
            return Err(ConfigError::ValidationError(format!(
                "Strategy '{}': encryption key file does not exist: {:?}",
                name, key_file
            )));
        }
    }

    Ok(())
}

fn validate_disaster_recovery(config: &Config) -> Result<()> {
    let dr = &config.disaster_recovery;

    if dr.failure_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "disaster_recovery.failure_threshold must be at least 1".to_string(),
        ));
    }

    if dr.health_check_interval_seconds == 0 {
        return Err(ConfigError::ValidationError(
            "disaster_recovery.health_check_interval_seconds must be at least 1".to_string(),
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for service in &dr.services {
        if !seen.insert(service.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Monitored service '{}' is defined twice",
                service.name
            )));
        }
    }

    for (name, plan) in &config.failover_plans {
        if plan.steps.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Failover plan '{}' has no steps",
                name
            )));
        }
        for trigger in &plan.triggers {
            if trigger != "*" && !seen.contains(trigger.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Failover plan '{}' is triggered by unknown service '{}'",
                    name, trigger
                )));
            }
        }
    }

    Ok(())
}

/// Get effective targets for a strategy (considering profile inheritance)
fn get_effective_targets(strategy: &StrategyConfig, config: &Config) -> Vec<String> {
    if !strategy.targets.is_empty() {
        return strategy.targets.clone();
    }

    if let Some(ref profile_name) = strategy.profile {
        if let Some(profile) = config.profiles.get(profile_name) {
            return profile.targets.clone();
        }
    }

    Vec::new()
}

/// Resolve a strategy configuration by merging with profile and global defaults
pub fn resolve_strategy(
    name: &str,
    strategy: &StrategyConfig,
    config: &Config,
) -> Result<BackupStrategy> {
    let profile = strategy
        .profile
        .as_ref()
        .and_then(|p| config.profiles.get(p));

    // Resolve destinations (strategy > profile > error)
    let targets = get_effective_targets(strategy, config);
    if targets.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Strategy '{}' has no targets defined and no profile",
            name
        )));
    }

    let mut destinations = Vec::with_capacity(targets.len());
    for target in &targets {
        let mut destination = config
            .destinations
            .get(target)
            .cloned()
            .ok_or_else(|| ConfigError::DestinationNotFound(target.clone()))?;
        destination.name = target.clone();
        destinations.push(destination);
    }
    destinations.sort_by_key(|d| d.priority);

    // Resolve timeout (strategy > profile > global)
    let timeout_seconds = strategy
        .timeout_seconds
        .or_else(|| profile.and_then(|p| p.timeout_seconds))
        .unwrap_or(config.global.default_timeout_seconds);

    let max_concurrent_jobs = strategy
        .max_concurrent_jobs
        .or_else(|| profile.and_then(|p| p.max_concurrent_jobs))
        .unwrap_or(config.global.default_max_concurrent_jobs);

    // Resolve retention (strategy > profile > global)
    let retention = RetentionPolicy {
        daily: strategy
            .retention_daily
            .or_else(|| profile.and_then(|p| p.retention_daily))
            .unwrap_or(config.global.retention_daily),
        weekly: strategy
            .retention_weekly
            .or_else(|| profile.and_then(|p| p.retention_weekly))
            .unwrap_or(config.global.retention_weekly),
        monthly: strategy
            .retention_monthly
            .or_else(|| profile.and_then(|p| p.retention_monthly))
            .unwrap_or(config.global.retention_monthly),
        yearly: strategy
            .retention_yearly
            .or_else(|| profile.and_then(|p| p.retention_yearly))
            .unwrap_or(config.global.retention_yearly),
    };

    let mut excludes = config.global.default_excludes.clone();
    excludes.extend(strategy.excludes.iter().cloned());

    Ok(BackupStrategy {
        name: name.to_string(),
        description: strategy.description.clone(),
        kind: strategy.kind,
        enabled: strategy.enabled,
        schedule: strategy.schedule.clone(),
        retention,
        compression: strategy.compression,
        encryption: strategy.encryption.clone(),
        priority: strategy.priority,
        max_concurrent_jobs,
        timeout_seconds,
        destinations,
        pre_backup_hooks: strategy.pre_backup_hooks.clone(),
        post_backup_hooks: strategy.post_backup_hooks.clone(),
        excludes,
        database: strategy.database.clone(),
    })
}

/// Resolve all strategies in the configuration
pub fn resolve_all_strategies(config: &Config) -> Result<HashMap<String, BackupStrategy>> {
    let mut resolved = HashMap::new();

    for (name, strategy) in &config.strategies {
        let resolved_strategy = resolve_strategy(name, strategy, config)?;
        resolved.insert(name.clone(), resolved_strategy);
    }

    Ok(resolved)
}
