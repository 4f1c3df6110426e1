//! Backup manager - the operator-facing façade over every component
//!
//! Owns the strategy registry and wires executor, restore pipeline, retention,
//! scheduler, health monitor and failover orchestrator onto one shared ledger,
//! storage adapter and notifier.

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{
    expand_tilde, resolve_all_strategies, BackupStrategy, Config, ConfigError, DisasterRecoveryConfig,
    FailoverAction, FailoverPlan,
};
use crate::error::DrError;
use crate::jobs::{BackupJob, JobStatus, RestoreOptions};
use crate::managers::executor::BackupExecutor;
use crate::managers::failover::{FailoverOrchestrator, FailoverReport, StepHandler};
use crate::managers::health::{HealthCheckState, HealthMonitor, HealthTransition};
use crate::managers::notification::{AlertEvent, DiscordWebhookSink, EventKind, LogSink, Notifier};
use crate::managers::restore::RestorePipeline;
use crate::managers::retention::{PruneReport, RetentionManager};
use crate::managers::scheduler::Scheduler;
use crate::utils::dump::{CommandDumpExecutor, DumpExecutor};
use crate::utils::executor::{CommandExecutor, RealExecutor};
use crate::utils::ledger::{JobRepository, JsonFileLedger, MemoryLedger};
use crate::utils::storage::StorageAdapter;

/// A strategy whose newest completed backup is older than the RPO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpoViolation {
    pub strategy: String,
    /// None when the strategy has never completed a backup
    pub last_backup: Option<DateTime<Utc>>,
}

pub struct BackupManager {
    strategies: RwLock<HashMap<String, BackupStrategy>>,
    /// Removed strategies whose jobs may still be in the ledger
    retired: RwLock<HashMap<String, BackupStrategy>>,
    plans: HashMap<String, FailoverPlan>,
    dr: DisasterRecoveryConfig,
    sweep_interval: Duration,
    ledger: Arc<dyn JobRepository>,
    notifier: Notifier,
    executor: Arc<BackupExecutor>,
    restore: RestorePipeline,
    retention: Arc<RetentionManager>,
    health: Arc<HealthMonitor>,
    failover: Arc<FailoverOrchestrator>,
    scheduler: Scheduler,
    started: AtomicBool,
}

/// Dependency wiring for [`BackupManager`]
///
/// Every collaborator has a production default, so tests only swap the ones
/// they observe.
pub struct BackupManagerBuilder {
    strategies: Vec<BackupStrategy>,
    plans: Vec<FailoverPlan>,
    dr: DisasterRecoveryConfig,
    work_dir: PathBuf,
    sweep_interval: Duration,
    ledger: Option<Arc<dyn JobRepository>>,
    commands: Option<Arc<dyn CommandExecutor>>,
    storage: Option<StorageAdapter>,
    dumper: Option<Arc<dyn DumpExecutor>>,
    notifier: Option<Notifier>,
    health: Option<HealthMonitor>,
    step_handlers: Vec<(FailoverAction, Arc<dyn StepHandler>)>,
}

impl Default for BackupManagerBuilder {
    fn default() -> Self {
        Self {
            strategies: Vec::new(),
            plans: Vec::new(),
            dr: DisasterRecoveryConfig::default(),
            work_dir: std::env::temp_dir().join("backup-orchestrator"),
            sweep_interval: Duration::from_secs(3600),
            ledger: None,
            commands: None,
            storage: None,
            dumper: None,
            notifier: None,
            health: None,
            step_handlers: Vec::new(),
        }
    }
}

impl BackupManagerBuilder {
    pub fn strategy(mut self, strategy: BackupStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategies(mut self, strategies: impl IntoIterator<Item = BackupStrategy>) -> Self {
        self.strategies.extend(strategies);
        self
    }

    pub fn plan(mut self, plan: FailoverPlan) -> Self {
        self.plans.push(plan);
        self
    }

    pub fn plans_from(mut self, plans: impl IntoIterator<Item = FailoverPlan>) -> Self {
        self.plans.extend(plans);
        self
    }

    pub fn disaster_recovery(mut self, dr: DisasterRecoveryConfig) -> Self {
        self.dr = dr;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn JobRepository>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn commands(mut self, commands: Arc<dyn CommandExecutor>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn storage(mut self, storage: StorageAdapter) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn dumper(mut self, dumper: Arc<dyn DumpExecutor>) -> Self {
        self.dumper = Some(dumper);
        self
    }

    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replace the monitor built from the disaster-recovery service list
    pub fn health_monitor(mut self, monitor: HealthMonitor) -> Self {
        self.health = Some(monitor);
        self
    }

    pub fn step_handler(mut self, action: FailoverAction, handler: Arc<dyn StepHandler>) -> Self {
        self.step_handlers.push((action, handler));
        self
    }

    pub fn build(self) -> anyhow::Result<BackupManager> {
        let commands = self.commands.unwrap_or_else(|| Arc::new(RealExecutor));
        let ledger = self.ledger.unwrap_or_else(|| Arc::new(MemoryLedger::new()));
        let storage = self
            .storage
            .unwrap_or_else(|| StorageAdapter::standard(commands.clone()));
        let dumper = self
            .dumper
            .unwrap_or_else(|| Arc::new(CommandDumpExecutor::new(commands.clone())));
        let notifier = self
            .notifier
            .unwrap_or_else(|| Notifier::new().with_sink(Arc::new(LogSink)));

        let health = match self.health {
            Some(monitor) => monitor,
            None => HealthMonitor::from_config(&self.dr, commands.clone(), notifier.clone())?,
        };

        let failover = self.step_handlers.into_iter().fold(
            FailoverOrchestrator::standard(&self.dr.primary_region, commands.clone(), notifier.clone()),
            |orchestrator, (action, handler)| orchestrator.with_handler(action, handler),
        );

        let retention = Arc::new(RetentionManager::new(ledger.clone(), storage.clone(), notifier.clone()));
        let executor = BackupExecutor::new(
            ledger.clone(),
            storage.clone(),
            dumper.clone(),
            commands,
            notifier.clone(),
            self.work_dir.clone(),
        )
        .with_retention(retention.clone());
        let restore = RestorePipeline::new(ledger.clone(), storage, dumper, notifier.clone(), self.work_dir);

        let mut strategies = HashMap::new();
        for strategy in self.strategies {
            if strategies.contains_key(&strategy.name) {
                anyhow::bail!("Strategy '{}' is defined twice", strategy.name);
            }
            strategies.insert(strategy.name.clone(), strategy);
        }

        Ok(BackupManager {
            strategies: RwLock::new(strategies),
            retired: RwLock::new(HashMap::new()),
            plans: self.plans.into_iter().map(|p| (p.name.clone(), p)).collect(),
            dr: self.dr,
            sweep_interval: self.sweep_interval,
            ledger,
            notifier,
            executor: Arc::new(executor),
            restore,
            retention,
            health: Arc::new(health),
            failover: Arc::new(failover),
            scheduler: Scheduler::new(),
            started: AtomicBool::new(false),
        })
    }
}

impl BackupManager {
    pub fn builder() -> BackupManagerBuilder {
        BackupManagerBuilder::default()
    }

    /// Production wiring from a loaded configuration
    ///
    /// Opens the JSON ledger and fails jobs a previous process left unfinished.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let strategies = resolve_all_strategies(config)?;

        let ledger_path = expand_tilde(&config.global.ledger_path);
        let ledger = JsonFileLedger::open(&ledger_path)
            .with_context(|| format!("Failed to open job ledger {:?}", ledger_path))?;
        ledger.recover_interrupted()?;

        let mut notifier = Notifier::new().with_sink(Arc::new(LogSink));
        if !config.notifications.discord_webhook_url.is_empty() {
            notifier.add_sink(Arc::new(DiscordWebhookSink::new(config.notifications.clone())?));
        }

        let sweep_minutes = config.global.retention_sweep_interval_minutes;
        let sweep_seconds = sweep_minutes
            .checked_mul(60)
            .filter(|s| *s > 0)
            .ok_or_else(|| anyhow::anyhow!("Invalid retention sweep interval: {} minute(s)", sweep_minutes))?;

        BackupManager::builder()
            .strategies(strategies.into_values())
            .plans_from(config.failover_plans.values().cloned())
            .disaster_recovery(config.disaster_recovery.clone())
            .work_dir(expand_tilde(&config.global.work_directory))
            .sweep_interval(Duration::from_secs(sweep_seconds))
            .ledger(Arc::new(ledger))
            .notifier(notifier)
            .build()
    }

    // --- strategy registry ---

    pub fn register_strategy(&self, strategy: BackupStrategy) -> Result<(), DrError> {
        {
            let mut strategies = self.strategies.write();
            if strategies.contains_key(&strategy.name) {
                return Err(DrError::StrategyExists(strategy.name));
            }
            strategies.insert(strategy.name.clone(), strategy.clone());
        }
        self.retired.write().remove(&strategy.name);
        info!("Registered strategy '{}'", strategy.name);
        self.reschedule(&strategy)
    }

    pub fn update_strategy(&self, strategy: BackupStrategy) -> Result<(), DrError> {
        {
            let mut strategies = self.strategies.write();
            match strategies.get_mut(&strategy.name) {
                Some(existing) => *existing = strategy.clone(),
                None => return Err(DrError::StrategyNotFound(strategy.name)),
            }
        }
        info!("Updated strategy '{}'", strategy.name);
        self.reschedule(&strategy)
    }

    /// Stop scheduling a strategy
    ///
    /// Its jobs stay in the ledger and remain restorable; sweeps keep applying
    /// its retention policy until no job of it is left.
    pub fn remove_strategy(&self, name: &str) -> Result<BackupStrategy, DrError> {
        let removed = self
            .strategies
            .write()
            .remove(name)
            .ok_or_else(|| DrError::StrategyNotFound(name.to_string()))?;
        self.scheduler.unschedule(name);
        self.retired.write().insert(name.to_string(), removed.clone());
        info!("Removed strategy '{}'", name);
        Ok(removed)
    }

    /// Active or removed strategy, for operations on existing jobs
    fn job_strategy(&self, name: &str) -> Result<BackupStrategy, DrError> {
        self.strategy(name).or_else(|e| self.retired.read().get(name).cloned().ok_or(e))
    }

    /// Removed strategies that still have jobs in the ledger
    pub fn retired_strategies(&self) -> Vec<String> {
        let mut names: Vec<_> = self.retired.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn strategy(&self, name: &str) -> Result<BackupStrategy, DrError> {
        self.strategies
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DrError::StrategyNotFound(name.to_string()))
    }

    /// All strategies, highest priority (lowest number) first
    pub fn strategies(&self) -> Vec<BackupStrategy> {
        let mut strategies: Vec<_> = self.strategies.read().values().cloned().collect();
        strategies.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        strategies
    }

    fn reschedule(&self, strategy: &BackupStrategy) -> Result<(), DrError> {
        if !self.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.scheduler
            .schedule(strategy, self.executor.clone())
            .map_err(|e| schedule_error(&strategy.name, e))
    }

    // --- backups ---

    pub async fn run_backup(&self, name: &str) -> Result<BackupJob, DrError> {
        let strategy = self.strategy(name)?;
        self.executor.execute(&strategy).await
    }

    /// Back up every enabled strategy, in priority order
    pub async fn run_all(&self) -> Vec<(String, Result<BackupJob, DrError>)> {
        let mut results = Vec::new();
        for strategy in self.strategies().into_iter().filter(|s| s.enabled) {
            let result = self.executor.execute(&strategy).await;
            results.push((strategy.name, result));
        }
        results
    }

    pub fn cancel_job(&self, job_id: &str) -> bool {
        self.executor.cancel(job_id)
    }

    pub async fn restore(&self, options: &RestoreOptions) -> Result<BackupJob, DrError> {
        let job = self.restore.resolve_job(&options.job_id)?;
        let strategy = self.job_strategy(&job.strategy)?;
        self.restore.restore(&strategy, options).await
    }

    pub async fn prune(&self, name: &str) -> Result<PruneReport, DrError> {
        let strategy = self.job_strategy(name)?;
        self.retention.prune(&strategy).await
    }

    /// Prune every strategy, then check recovery points
    ///
    /// Cleanup failures are logged and never stop the sweep.
    pub async fn sweep(&self) -> Vec<RpoViolation> {
        for strategy in self.strategies() {
            if let Err(e) = self.retention.prune(&strategy).await {
                warn!("{}", e);
            }
        }

        let retired: Vec<BackupStrategy> = self.retired.read().values().cloned().collect();
        for strategy in retired {
            if let Err(e) = self.retention.prune(&strategy).await {
                warn!("{}", e);
                continue;
            }
            match self.ledger.list_by_strategy(&strategy.name) {
                Ok(jobs) if jobs.is_empty() => {
                    self.retired.write().remove(&strategy.name);
                    debug!("Removed strategy '{}' has no jobs left", strategy.name);
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to list jobs of removed strategy '{}': {:#}", strategy.name, e),
            }
        }

        self.check_rpo().await
    }

    // --- ledger queries ---

    pub fn list_jobs(&self, strategy: Option<&str>) -> Result<Vec<BackupJob>, DrError> {
        match strategy {
            Some(name) => self.ledger.list_by_strategy(name),
            None => self.ledger.list(),
        }
        .map_err(DrError::Ledger)
    }

    pub fn get_job(&self, job_id: &str) -> Result<BackupJob, DrError> {
        self.ledger
            .get(job_id)
            .map_err(DrError::Ledger)?
            .ok_or_else(|| DrError::BackupNotFound(job_id.to_string()))
    }

    /// Newest completed job of a strategy
    pub fn latest_backup(&self, strategy: &str) -> Result<Option<BackupJob>, DrError> {
        Ok(self
            .list_jobs(Some(strategy))?
            .into_iter()
            .filter(|job| job.status == JobStatus::Completed)
            .max_by_key(|job| job.taken_at()))
    }

    /// Enabled strategies whose newest backup is older than `rpo_minutes`
    pub async fn check_rpo(&self) -> Vec<RpoViolation> {
        let window = chrono::Duration::minutes(self.dr.rpo_minutes as i64);
        let now = Utc::now();
        let mut violations = Vec::new();

        for strategy in self.strategies().into_iter().filter(|s| s.enabled) {
            let last_backup = match self.latest_backup(&strategy.name) {
                Ok(job) => job.map(|j| j.taken_at()),
                Err(e) => {
                    warn!("RPO check for '{}' skipped: {}", strategy.name, e);
                    continue;
                }
            };
            if matches!(last_backup, Some(taken) if now - taken <= window) {
                continue;
            }

            warn!(
                "Strategy '{}' exceeds its {} minute recovery point objective",
                strategy.name, self.dr.rpo_minutes
            );
            let mut event = AlertEvent::new(EventKind::RpoViolated)
                .with("strategy", &strategy.name)
                .with("rpo_minutes", self.dr.rpo_minutes);
            event = match last_backup {
                Some(taken) => event.with("last_backup", taken.to_rfc3339()),
                None => event.with("last_backup", "never"),
            };
            self.notifier.emit(event).await;

            violations.push(RpoViolation {
                strategy: strategy.name,
                last_backup,
            });
        }
        violations
    }

    // --- disaster recovery ---

    pub fn health(&self) -> Vec<HealthCheckState> {
        self.health.snapshot()
    }

    pub async fn poll_health(&self) {
        self.health.poll_once().await;
    }

    pub fn plans(&self) -> Vec<FailoverPlan> {
        let mut plans: Vec<_> = self.plans.values().cloned().collect();
        plans.sort_by(|a, b| a.name.cmp(&b.name));
        plans
    }

    /// Manual failover, available whatever `auto_failover` says
    pub async fn trigger_failover(&self, plan: &str) -> Result<FailoverReport, DrError> {
        let plan = self
            .plans
            .get(plan)
            .ok_or_else(|| DrError::PlanNotFound(plan.to_string()))?;
        self.failover.run_plan(plan).await
    }

    pub fn active_region(&self) -> String {
        self.failover.active_region()
    }

    // --- lifecycle ---

    /// Start schedules, health polling, the retention sweep and, when enabled,
    /// automatic failover
    pub fn start(self: &Arc<Self>) -> Result<(), DrError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for strategy in self.strategies() {
            self.scheduler
                .schedule(&strategy, self.executor.clone())
                .map_err(|e| schedule_error(&strategy.name, e))?;
        }

        let health = self.health.clone();
        self.scheduler
            .spawn_periodic("health-poll", self.dr.health_check_interval(), move || {
                let health = health.clone();
                async move {
                    health.poll_once().await;
                }
            });

        let manager: Weak<Self> = Arc::downgrade(self);
        self.scheduler
            .spawn_periodic("retention-sweep", self.sweep_interval, move || {
                let manager = manager.clone();
                async move {
                    if let Some(manager) = manager.upgrade() {
                        let violations = manager.sweep().await;
                        debug!("Sweep finished with {} RPO violation(s)", violations.len());
                    }
                }
            });

        if self.dr.auto_failover {
            self.spawn_auto_failover();
        } else {
            debug!("Automatic failover disabled; plans run on manual trigger only");
        }

        info!(
            "Backup manager started: {} strategy timer(s), {} monitored service(s), {} failover plan(s)",
            self.scheduler.scheduled().len(),
            self.health.snapshot().len(),
            self.plans.len()
        );
        Ok(())
    }

    fn spawn_auto_failover(&self) {
        let mut events = self.health.subscribe();
        let failover = self.failover.clone();
        let plans: Vec<FailoverPlan> = self.plans.values().cloned().collect();

        self.scheduler.spawn_task("auto-failover", async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Auto-failover listener missed {} health event(s)", n);
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                };
                if event.transition != HealthTransition::Degraded {
                    continue;
                }

                for plan in plans.iter().filter(|p| p.is_triggered_by(&event.service)) {
                    let failover = failover.clone();
                    let plan = plan.clone();
                    let service = event.service.clone();
                    tokio::spawn(async move {
                        info!("Service '{}' degraded, running plan '{}'", service, plan.name);
                        match failover.run_plan(&plan).await {
                            Ok(report) => info!(
                                "Automatic failover '{}' finished in {:?}",
                                report.plan, report.duration
                            ),
                            Err(DrError::FailoverInProgress(name)) => {
                                info!("Plan '{}' already running, ignoring trigger", name)
                            }
                            Err(e) => warn!("Automatic failover failed: {}", e),
                        }
                    });
                }
            }
        });
    }

    pub fn shutdown(&self) {
        if self.started.swap(false, Ordering::SeqCst) {
            self.scheduler.shutdown();
            info!("Backup manager stopped");
        }
    }
}

fn schedule_error(strategy: &str, err: crate::utils::cron::CronError) -> DrError {
    DrError::Config(ConfigError::ValidationError(format!(
        "Strategy '{}' has an invalid schedule: {}",
        strategy, err
    )))
}
