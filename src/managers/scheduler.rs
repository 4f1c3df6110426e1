//! Cron-driven backup triggers and periodic background tasks
//!
//! Every strategy gets its own timer task. A tick spawns the backup instead of
//! awaiting it, so a slow job never delays the next tick; the executor's
//! concurrency slots decide whether the tick actually runs.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BackupStrategy;
use crate::error::DrError;
use crate::managers::executor::BackupExecutor;
use crate::utils::cron::{CronError, CronSchedule};

#[derive(Default)]
pub struct Scheduler {
    strategies: Mutex<HashMap<String, JoinHandle<()>>>,
    background: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the timer for a strategy
    ///
    /// Disabled strategies only have their existing timer removed.
    pub fn schedule(&self, strategy: &BackupStrategy, executor: Arc<BackupExecutor>) -> Result<(), CronError> {
        let cron = CronSchedule::parse(&strategy.schedule)?;
        self.unschedule(&strategy.name);

        if !strategy.enabled {
            debug!("Strategy '{}' is disabled, not scheduling", strategy.name);
            return Ok(());
        }

        let strategy = strategy.clone();
        let name = strategy.name.clone();
        info!("Scheduling '{}' with '{}'", name, strategy.schedule);
        let handle = tokio::spawn(run_timer(cron, strategy, executor));
        self.strategies.lock().insert(name, handle);
        Ok(())
    }

    pub fn unschedule(&self, name: &str) -> bool {
        match self.strategies.lock().remove(name) {
            Some(handle) => {
                handle.abort();
                debug!("Stopped timer for '{}'", name);
                true
            }
            None => false,
        }
    }

    pub fn scheduled(&self) -> Vec<String> {
        let mut names: Vec<_> = self.strategies.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Run `task` every `period`, first after one full period
    ///
    /// A zero period is refused and nothing is spawned.
    pub fn spawn_periodic<F, Fut>(&self, name: &str, period: Duration, mut task: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            warn!("Periodic task '{}' has a zero period, not starting it", name);
            return false;
        }
        let label = name.to_string();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                debug!("Running periodic task '{}'", label);
                task().await;
            }
        });
        self.background.lock().push((name.to_string(), handle));
        true
    }

    /// Keep a long-lived task alongside the timers so shutdown stops it too
    pub fn spawn_task<Fut>(&self, name: &str, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.background.lock().push((name.to_string(), handle));
    }

    /// Abort every timer and background task
    pub fn shutdown(&self) {
        for (_, handle) in self.strategies.lock().drain() {
            handle.abort();
        }
        for (name, handle) in self.background.lock().drain(..) {
            debug!("Stopping periodic task '{}'", name);
            handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_timer(cron: CronSchedule, strategy: BackupStrategy, executor: Arc<BackupExecutor>) {
    let mut cursor = Utc::now();
    loop {
        let now = Utc::now();
        let next = match cron.next_after(cursor) {
            // Missed ticks are skipped, not replayed
            Some(next) if next < now => cron.next_after(now),
            other => other,
        };
        let Some(next) = next else {
            warn!("Schedule '{}' of '{}' never fires again", strategy.schedule, strategy.name);
            return;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
        cursor = next;

        let executor = executor.clone();
        let strategy = strategy.clone();
        tokio::spawn(async move {
            match executor.execute(&strategy).await {
                Ok(job) => debug!("Scheduled job {} for '{}' finished", job.short_id(), strategy.name),
                Err(DrError::ConcurrencyLimitExceeded { running, .. }) => info!(
                    "Skipping tick for '{}': {} job(s) still running",
                    strategy.name, running
                ),
                Err(e) => warn!("Scheduled backup of '{}' failed: {}", strategy.name, e),
            }
        });
    }
}
