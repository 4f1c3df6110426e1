use anyhow::{Context, Result};
use backup_orchestrator::config::{self, Config};
use backup_orchestrator::jobs::{BackupJob, JobStatus, RestoreOptions};
use backup_orchestrator::managers::backup::BackupManager;
use backup_orchestrator::managers::health::HealthStatus;
use backup_orchestrator::managers::logging::{self, LoggingConfig};
use backup_orchestrator::utils::ledger::status_counts;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "backup-orchestrator")]
#[command(about = "Database backup and disaster-recovery orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "backup-orchestrator.toml")]
    config: PathBuf,

    /// Write file logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run schedules, health checks, retention sweeps and failover until interrupted
    Daemon,

    /// Run backups for all enabled strategies or a specific strategy
    Run {
        /// Specific strategy to back up (defaults to all enabled strategies)
        #[arg(short, long)]
        strategy: Option<String>,
    },

    /// Restore a database from a completed backup job
    Restore {
        /// Strategy whose jobs to choose from (interactive if no job is given)
        #[arg(short, long)]
        strategy: Option<String>,

        /// Job id to restore
        #[arg(short, long)]
        job: Option<String>,

        /// Load into this target instead of the strategy's own database
        #[arg(short, long)]
        target: Option<String>,

        /// Restore specific tables only (can be used multiple times)
        #[arg(long)]
        table: Vec<String>,

        /// Point in time to recover to (RFC 3339)
        #[arg(long)]
        point_in_time: Option<String>,

        /// Skip checksum verification
        #[arg(long)]
        no_verify: bool,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Apply retention policies
    Prune {
        /// Specific strategy to prune (defaults to all)
        #[arg(short, long)]
        strategy: Option<String>,
    },

    /// List recorded backup jobs
    Jobs {
        /// Only jobs of this strategy
        #[arg(short, long)]
        strategy: Option<String>,

        /// Show at most this many of the newest jobs
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show strategies, recovery points and service health
    Status,

    /// Run a failover plan manually
    Failover {
        /// Plan name
        plan: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Status);

    // Validation must work before a log directory exists
    if let Commands::Validate = command {
        logging::init_console_logging();
        return handle_validate(&cli.config);
    }

    let config = config::load_config(&cli.config)
        .with_context(|| format!("Failed to load {:?}", cli.config))?;

    // Setup logging with file rotation (must keep guard alive)
    let logging_config = LoggingConfig::from_global(&config.global).with_json(cli.json_logs);
    let _log_guard = logging::init_logging(&logging_config)?;

    let manager = Arc::new(BackupManager::from_config(&config)?);

    match command {
        Commands::Daemon => {
            manager.start()?;
            println!("Backup orchestrator running. Press Ctrl+C to stop.");
            tokio::signal::ctrl_c().await?;
            manager.shutdown();
        }

        Commands::Run { strategy } => {
            if let Some(name) = strategy {
                println!("Running backup for strategy: {}", name);
                let job = manager.run_backup(&name).await?;
                println!("✓ Backup completed: job {} ({} bytes)", job.id, job.size_bytes.unwrap_or(0));
            } else {
                println!("Running backups for all enabled strategies...");
                let mut failures = 0;
                for (name, result) in manager.run_all().await {
                    match result {
                        Ok(job) => println!("  ✓ {} - job {}", name, job.short_id()),
                        Err(e) => {
                            failures += 1;
                            eprintln!("  ✗ {} - {} ({})", name, e, e.kind());
                        }
                    }
                }
                if failures > 0 {
                    anyhow::bail!("{} backup(s) failed", failures);
                }
                println!("✓ All backups completed successfully");
            }
        }

        Commands::Restore {
            strategy,
            job,
            target,
            table,
            point_in_time,
            no_verify,
            yes,
        } => {
            use dialoguer::{Confirm, Select};

            let job_id = match (job, strategy) {
                (Some(id), _) => id,
                (None, Some(name)) => {
                    let mut jobs: Vec<BackupJob> = manager
                        .list_jobs(Some(&name))?
                        .into_iter()
                        .filter(|j| j.status == JobStatus::Completed)
                        .collect();
                    if jobs.is_empty() {
                        anyhow::bail!("No completed backups found for strategy '{}'", name);
                    }
                    jobs.sort_by_key(|j| j.taken_at());

                    println!("Available backups:");
                    let items: Vec<String> = jobs
                        .iter()
                        .map(|j| {
                            format!(
                                "{} - {} ({} bytes)",
                                j.short_id(),
                                j.taken_at().format("%Y-%m-%d %H:%M:%S"),
                                j.size_bytes.unwrap_or(0)
                            )
                        })
                        .collect();
                    let selection = Select::new()
                        .with_prompt("Select backup to restore")
                        .items(&items)
                        .default(items.len() - 1) // Default to most recent
                        .interact()?;
                    jobs[selection].id.clone()
                }
                (None, None) => anyhow::bail!("Specify --job or --strategy"),
            };

            let mut options = RestoreOptions::new(&job_id);
            options.target_location = target;
            options.tables = table;
            options.verify_integrity = !no_verify;
            options.point_in_time = point_in_time
                .map(|s| DateTime::parse_from_rfc3339(&s).map(|t| t.with_timezone(&Utc)))
                .transpose()
                .context("Invalid --point-in-time")?;

            let job = manager.get_job(&job_id)?;
            println!("\nRestoring job {} of '{}'", job.id, job.strategy);
            match &options.target_location {
                Some(t) => println!("Restore target: {}", t),
                None => println!("Restore target: the strategy's database (IN-PLACE)"),
            }
            if !options.tables.is_empty() {
                println!("Tables: {}", options.tables.join(", "));
            }

            if !yes {
                let confirm = Confirm::new()
                    .with_prompt("Do you want to proceed with the restore?")
                    .default(false)
                    .interact()?;
                if !confirm {
                    println!("Restore cancelled.");
                    return Ok(());
                }
            }

            manager.restore(&options).await?;
            println!("\n✓ Restore completed successfully!");
        }

        Commands::Prune { strategy } => {
            let names = match strategy {
                Some(name) => vec![name],
                None => manager.strategies().into_iter().map(|s| s.name).collect(),
            };
            for name in names {
                let report = manager.prune(&name).await?;
                println!(
                    "{}: deleted {}, kept {}{}",
                    name,
                    report.deleted_count,
                    report.kept_count,
                    if report.storage_failures > 0 {
                        format!(" ({} storage cleanup failure(s))", report.storage_failures)
                    } else {
                        String::new()
                    }
                );
            }
        }

        Commands::Jobs { strategy, limit } => {
            let jobs = manager.list_jobs(strategy.as_deref())?;
            let skip = jobs.len().saturating_sub(limit);
            for job in jobs.iter().skip(skip) {
                println!(
                    "{}  {:<12} {:<10} {}  {}",
                    job.short_id(),
                    job.strategy,
                    job.status.to_string(),
                    job.created_at.format("%Y-%m-%d %H:%M:%S"),
                    job.error.as_deref().unwrap_or("")
                );
            }
            println!("\n{} job(s) in ledger", jobs.len());
        }

        Commands::Status => print_status(&config, &manager).await?,

        Commands::Failover { plan, yes } => {
            if !yes {
                let confirm = dialoguer::Confirm::new()
                    .with_prompt(format!("Run failover plan '{}' now?", plan))
                    .default(false)
                    .interact()?;
                if !confirm {
                    println!("Failover cancelled.");
                    return Ok(());
                }
            }
            let report = manager.trigger_failover(&plan).await?;
            println!(
                "✓ Plan '{}' completed in {:.1}s: {}",
                report.plan,
                report.duration.as_secs_f64(),
                report.executed_steps.join(" -> ")
            );
            println!("Active region: {}", manager.active_region());
        }

        Commands::Validate => unreachable!("handled before config loading"),
    }

    Ok(())
}

fn handle_validate(path: &Path) -> Result<()> {
    let config = config::load_config(path)?;
    let strategies = config::resolve_all_strategies(&config)?;

    println!("Configuration is valid!");
    println!("Strategies: {}", strategies.len());
    println!("Destinations: {}", config.destinations.len());
    println!("Profiles: {}", config.profiles.len());
    println!("Monitored services: {}", config.disaster_recovery.services.len());
    println!("Failover plans: {}", config.failover_plans.len());
    Ok(())
}

async fn print_status(config: &Config, manager: &BackupManager) -> Result<()> {
    println!("=== Backup Status Overview ===\n");
    println!("Active region: {}", manager.active_region());
    println!("RPO: {} minutes, RTO: {} minutes\n", config.disaster_recovery.rpo_minutes, config.disaster_recovery.rto_minutes);

    println!("Strategies:");
    for strategy in manager.strategies() {
        let state = if strategy.enabled { "enabled" } else { "disabled" };
        let last = match manager.latest_backup(&strategy.name)? {
            Some(job) => {
                let hours = (Utc::now() - job.taken_at()).num_hours();
                format!("last backup {} hours ago", hours)
            }
            None => "no backups".to_string(),
        };
        println!("  {} ({}, '{}') - {}", strategy.name, state, strategy.schedule, last);
    }

    let jobs = manager.list_jobs(None)?;
    println!("\nJobs:");
    for (status, count) in status_counts(&jobs) {
        println!("  {}: {}", status, count);
    }

    manager.poll_health().await;
    let health = manager.health();
    if !health.is_empty() {
        println!("\nServices:");
        for state in health {
            let marker = match state.status {
                HealthStatus::Healthy => "✓",
                HealthStatus::Degraded => "✗",
            };
            println!(
                "  {} {}{}",
                marker,
                state.service,
                state
                    .last_error
                    .map(|e| format!(" - {}", e))
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}
