//! Tiered retention
//!
//! Completed jobs are walked newest first. The daily tier keeps the newest job
//! of each of the `daily` most recent calendar days (UTC). Each following tier
//! (ISO week, month, year) only looks at jobs strictly older than the oldest
//! job kept so far and keeps the newest job of each period, up to its count.
//! Everything else is deleted, so a policy of all zeros deletes every
//! completed job.
//!
//! Failed jobs age out with the history they sit in: one older than the
//! oldest kept completed job is deleted. With no completed job kept, only the
//! newest `max_kept()` failures survive. Pending and running jobs are never
//! touched.

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{BackupStrategy, RetentionPolicy};
use crate::error::DrError;
use crate::jobs::{BackupJob, JobStatus};
use crate::managers::notification::{AlertEvent, EventKind, Notifier};
use crate::utils::ledger::JobRepository;
use crate::utils::storage::StorageAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Period {
    Day(i32, u32),
    Week(i32, u32),
    Month(i32, u32),
    Year(i32),
}

fn period(tier: usize, at: DateTime<Utc>) -> Period {
    match tier {
        0 => Period::Day(at.year(), at.ordinal()),
        1 => {
            let week = at.iso_week();
            Period::Week(week.year(), week.week())
        }
        2 => Period::Month(at.year(), at.month()),
        _ => Period::Year(at.year()),
    }
}

/// Which jobs survive and which go
#[derive(Debug, Default)]
pub struct RetentionPlan {
    pub keep: Vec<BackupJob>,
    pub delete: Vec<BackupJob>,
}

/// Decide what to keep among a strategy's jobs
///
/// `keep` only lists completed jobs. Surviving failed jobs and unfinished
/// jobs appear in neither list.
pub fn plan_retention(jobs: &[BackupJob], policy: &RetentionPolicy) -> RetentionPlan {
    let mut completed: Vec<&BackupJob> = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .collect();
    completed.sort_by(|a, b| b.taken_at().cmp(&a.taken_at()).then_with(|| b.id.cmp(&a.id)));

    let counts = [policy.daily, policy.weekly, policy.monthly, policy.yearly];
    let mut kept: HashSet<&str> = HashSet::new();
    let mut boundary: Option<DateTime<Utc>> = None;

    for (tier, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let mut seen: HashSet<Period> = HashSet::new();
        let mut oldest_kept = None;

        for job in &completed {
            if seen.len() >= count as usize {
                break;
            }
            let at = job.taken_at();
            if boundary.is_some_and(|b| at >= b) {
                continue;
            }
            // Newest first, so the first job seen in a period is its representative
            if seen.insert(period(tier, at)) {
                kept.insert(job.id.as_str());
                oldest_kept = Some(at);
            }
        }

        if oldest_kept.is_some() {
            boundary = oldest_kept;
        }
    }

    let mut plan = RetentionPlan::default();
    for job in completed {
        if kept.contains(job.id.as_str()) {
            plan.keep.push(job.clone());
        } else {
            plan.delete.push(job.clone());
        }
    }
    plan.delete.extend(expired_failures(jobs, policy, boundary));
    plan
}

fn expired_failures(
    jobs: &[BackupJob],
    policy: &RetentionPolicy,
    oldest_kept: Option<DateTime<Utc>>,
) -> Vec<BackupJob> {
    let mut failed: Vec<&BackupJob> = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Failed)
        .collect();
    failed.sort_by(|a, b| b.taken_at().cmp(&a.taken_at()).then_with(|| b.id.cmp(&a.id)));

    match oldest_kept {
        Some(oldest) => failed
            .into_iter()
            .filter(|j| j.taken_at() < oldest)
            .cloned()
            .collect(),
        None => failed.into_iter().skip(policy.max_kept()).cloned().collect(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub deleted_count: usize,
    pub kept_count: usize,
    /// Storage locations that could not be removed
    pub storage_failures: usize,
}

/// Applies retention plans to the ledger and storage
pub struct RetentionManager {
    ledger: Arc<dyn JobRepository>,
    storage: StorageAdapter,
    notifier: Notifier,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RetentionManager {
    pub fn new(ledger: Arc<dyn JobRepository>, storage: StorageAdapter, notifier: Notifier) -> Self {
        Self {
            ledger,
            storage,
            notifier,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn strategy_lock(&self, strategy: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(strategy.to_string())
            .or_default()
            .clone()
    }

    /// Delete the jobs the strategy's policy no longer covers
    ///
    /// The ledger record goes first; storage removal afterwards is best-effort
    /// and only logged when it fails.
    pub async fn prune(&self, strategy: &BackupStrategy) -> Result<PruneReport, DrError> {
        let lock = self.strategy_lock(&strategy.name);
        let _guard = lock.lock().await;

        let jobs = self
            .ledger
            .list_by_strategy(&strategy.name)
            .map_err(|e| DrError::RetentionCleanupError {
                strategy: strategy.name.clone(),
                message: format!("{:#}", e),
            })?;

        let plan = plan_retention(&jobs, &strategy.retention);
        let mut report = PruneReport {
            kept_count: plan.keep.len(),
            ..Default::default()
        };
        let mut ledger_errors = Vec::new();

        for job in &plan.delete {
            match self.ledger.delete(&job.id) {
                Ok(_) => report.deleted_count += 1,
                Err(e) => {
                    warn!("Failed to remove job {} from ledger: {:#}", job.short_id(), e);
                    ledger_errors.push(format!("{}: {:#}", job.id, e));
                    continue;
                }
            }

            for location in &job.locations {
                if let Err(e) = self.storage.delete(location, &strategy.destinations).await {
                    warn!("Storage cleanup for job {} failed: {:#}", job.short_id(), e);
                    report.storage_failures += 1;
                }
            }
            debug!("Pruned job {} of strategy '{}'", job.short_id(), strategy.name);
        }

        if report.deleted_count > 0 || report.storage_failures > 0 {
            info!(
                "Retention for '{}': deleted {}, kept {}, {} storage failure(s)",
                strategy.name, report.deleted_count, report.kept_count, report.storage_failures
            );
            self.notifier
                .emit(
                    AlertEvent::new(EventKind::RetentionSummary)
                        .with("strategy", &strategy.name)
                        .with("deleted", report.deleted_count)
                        .with("kept", report.kept_count)
                        .with("storage_failures", report.storage_failures),
                )
                .await;
        }

        if !ledger_errors.is_empty() {
            return Err(DrError::RetentionCleanupError {
                strategy: strategy.name.clone(),
                message: ledger_errors.join("; "),
            });
        }
        Ok(report)
    }
}
