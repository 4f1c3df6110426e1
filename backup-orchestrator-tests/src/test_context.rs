//! Test context and harness for scenario testing
//!
//! Wires a `BackupManager` onto in-memory collaborators over a temporary
//! directory, keeping handles to every mock so tests can steer and inspect them.

use backup_orchestrator::config::{
    BackupStrategy, DatabaseConfig, DisasterRecoveryConfig, FailoverAction, FailoverPlan,
    StorageConfig, StorageKind,
};
use backup_orchestrator::managers::backup::BackupManager;
use backup_orchestrator::managers::health::HealthMonitor;
use backup_orchestrator::managers::notification::mock::RecordingSink;
use backup_orchestrator::managers::notification::Notifier;
use backup_orchestrator::managers::failover::mock::RecordingHandler;
use backup_orchestrator::utils::dump::mock::MemoryDumpExecutor;
use backup_orchestrator::utils::executor::mock::MockExecutor;
use backup_orchestrator::utils::ledger::{JobRepository, MemoryLedger};
use backup_orchestrator::utils::storage::mock::FaultyDriver;
use backup_orchestrator::utils::storage::StorageAdapter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Test context that manages test resources and provides common utilities
pub struct TestContext {
    /// Temporary directory for artifacts, destinations and work files
    temp_dir: TempDir,
    pub ledger: Arc<MemoryLedger>,
    pub dumper: MemoryDumpExecutor,
    pub driver: FaultyDriver,
    pub sink: RecordingSink,
    pub commands: MockExecutor,
    pub steps: RecordingHandler,
}

impl TestContext {
    /// Create a new test context with a temporary directory
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
            ledger: Arc::new(MemoryLedger::new()),
            dumper: MemoryDumpExecutor::new(b"COPY orders FROM stdin;\n1\t42.00\n\\.\n"),
            driver: FaultyDriver::new(),
            sink: RecordingSink::new(),
            commands: MockExecutor::new(),
            steps: RecordingHandler::new(),
        }
    }

    /// Get the temporary directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a subdirectory in the temp dir
    pub fn create_subdir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create subdirectory");
        path
    }

    /// Strategy with `destinations` local destinations named `dest-1`, `dest-2`, ...
    pub fn strategy(&self, name: &str, destinations: usize) -> BackupStrategy {
        let mut strategy = BackupStrategy::new(name, DatabaseConfig::file("/unused"));
        strategy.destinations = (1..=destinations)
            .map(|i| {
                let dest = format!("dest-{}", i);
                StorageConfig::local(&dest, self.temp_dir.path().join("storage").join(&dest), i as u32)
            })
            .collect();
        strategy
    }

    pub fn notifier(&self) -> Notifier {
        Notifier::new().with_sink(Arc::new(self.sink.clone()))
    }

    pub fn storage(&self) -> StorageAdapter {
        StorageAdapter::new().with_driver(StorageKind::Local, Arc::new(self.driver.clone()))
    }

    /// Manager over the context's mocks, with no monitored services
    pub fn manager(&self, strategies: Vec<BackupStrategy>) -> Arc<BackupManager> {
        self.manager_with(strategies, Vec::new(), HealthMonitor::new(3, self.notifier()), DisasterRecoveryConfig::default())
    }

    /// Manager with failover plans, a prepared health monitor and DR settings
    ///
    /// Every step action is routed to [`TestContext::steps`].
    pub fn manager_with(
        &self,
        strategies: Vec<BackupStrategy>,
        plans: Vec<FailoverPlan>,
        health: HealthMonitor,
        dr: DisasterRecoveryConfig,
    ) -> Arc<BackupManager> {
        let ledger: Arc<dyn JobRepository> = self.ledger.clone();
        let mut builder = BackupManager::builder()
            .strategies(strategies)
            .plans_from(plans)
            .disaster_recovery(dr)
            .work_dir(self.temp_dir.path().join("work"))
            .ledger(ledger)
            .commands(Arc::new(self.commands.clone()))
            .storage(self.storage())
            .dumper(Arc::new(self.dumper.clone()))
            .notifier(self.notifier())
            .health_monitor(health);

        for action in [
            FailoverAction::DnsSwitch,
            FailoverAction::DatabaseFailover,
            FailoverAction::ServiceRestart,
            FailoverAction::Notification,
            FailoverAction::Custom,
        ] {
            builder = builder.step_handler(action, Arc::new(self.steps.clone()));
        }

        Arc::new(builder.build().expect("Failed to build manager"))
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
