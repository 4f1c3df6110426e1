//! Job ledger: the single source of truth for backup job records
//!
//! Every mutation builds the next state from a copy, persists it, and only then
//! publishes it, so concurrent readers never observe a half-applied transition.

use crate::jobs::{BackupJob, JobStatus};
use anyhow::{Context, Result};
use fd_lock::RwLock as FileLock;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LEDGER_VERSION: u32 = 1;

/// Repository interface over job records
pub trait JobRepository: Send + Sync {
    fn create(&self, job: &BackupJob) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<BackupJob>>;

    /// Replace a job record; completed and failed records are immutable
    fn update(&self, job: &BackupJob) -> Result<()>;

    /// Returns false if no such job existed
    fn delete(&self, id: &str) -> Result<bool>;

    /// All jobs, oldest first
    fn list(&self) -> Result<Vec<BackupJob>>;

    fn list_by_strategy(&self, strategy: &str) -> Result<Vec<BackupJob>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|job| job.strategy == strategy)
            .collect())
    }
}

type JobTable = BTreeMap<String, BackupJob>;

fn apply_create(table: &mut JobTable, job: &BackupJob) -> Result<()> {
    if table.contains_key(&job.id) {
        anyhow::bail!("Job {} already exists", job.id);
    }
    table.insert(job.id.clone(), job.clone());
    Ok(())
}

fn apply_update(table: &mut JobTable, job: &BackupJob) -> Result<()> {
    let existing = table
        .get(&job.id)
        .with_context(|| format!("Job {} not found", job.id))?;
    if existing.status.is_terminal() {
        anyhow::bail!(
            "Job {} is {} and can no longer be modified",
            job.id,
            existing.status
        );
    }
    if existing.strategy != job.strategy {
        anyhow::bail!("Job {} cannot change strategy", job.id);
    }
    table.insert(job.id.clone(), job.clone());
    Ok(())
}

fn sorted(table: &JobTable) -> Vec<BackupJob> {
    let mut jobs: Vec<_> = table.values().cloned().collect();
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    jobs
}

/// In-process ledger (tests, dry runs)
#[derive(Default)]
pub struct MemoryLedger {
    jobs: RwLock<JobTable>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobRepository for MemoryLedger {
    fn create(&self, job: &BackupJob) -> Result<()> {
        apply_create(&mut self.jobs.write(), job)
    }

    fn get(&self, id: &str) -> Result<Option<BackupJob>> {
        Ok(self.jobs.read().get(id).cloned())
    }

    fn update(&self, job: &BackupJob) -> Result<()> {
        apply_update(&mut self.jobs.write(), job)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.jobs.write().remove(id).is_some())
    }

    fn list(&self) -> Result<Vec<BackupJob>> {
        Ok(sorted(&self.jobs.read()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    jobs: Vec<BackupJob>,
}

/// JSON file ledger that survives restarts
///
/// Writes go to a temporary file which is renamed over the ledger while an
/// exclusive lock on `<ledger>.lock` is held, so two processes sharing a ledger
/// never interleave writes.
pub struct JsonFileLedger {
    path: PathBuf,
    lock_path: PathBuf,
    jobs: RwLock<JobTable>,
}

impl JsonFileLedger {
    /// Open (or create) a ledger file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create ledger directory {:?}", parent))?;
        }

        let jobs = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read job ledger {:?}", path))?;
            let file: LedgerFile = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse job ledger {:?}", path))?;
            if file.version != LEDGER_VERSION {
                anyhow::bail!(
                    "Unsupported ledger version {} in {:?}",
                    file.version,
                    path
                );
            }
            file.jobs.into_iter().map(|job| (job.id.clone(), job)).collect()
        } else {
            JobTable::new()
        };

        debug!("Opened job ledger {:?} with {} job(s)", path, jobs.len());

        let mut lock_name = path.as_os_str().to_os_string();
        lock_name.push(".lock");

        Ok(Self {
            path: path.to_path_buf(),
            lock_path: PathBuf::from(lock_name),
            jobs: RwLock::new(jobs),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, table: &JobTable) -> Result<()> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .with_context(|| format!("Failed to open ledger lock {:?}", self.lock_path))?;
        let mut lock = FileLock::new(lock_file);
        let _guard = lock.write().context("Failed to lock job ledger")?;

        let file = LedgerFile {
            version: LEDGER_VERSION,
            jobs: sorted(table),
        };
        let content = serde_json::to_vec_pretty(&file).context("Failed to serialize job ledger")?;

        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut tmp = fs::File::create(&tmp_path)
            .with_context(|| format!("Failed to create {:?}", tmp_path))?;
        tmp.write_all(&content)
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        tmp.sync_all().context("Failed to sync job ledger")?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace job ledger {:?}", self.path))?;
        Ok(())
    }

    /// Apply a mutation to a copy, persist it, then publish it
    fn mutate<T>(&self, f: impl FnOnce(&mut JobTable) -> Result<T>) -> Result<T> {
        let mut guard = self.jobs.write();
        let mut next = guard.clone();
        let value = f(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(value)
    }

    /// Fail jobs a previous process left pending or running
    pub fn recover_interrupted(&self) -> Result<usize> {
        let recovered = self.mutate(|table| {
            let mut count = 0;
            for job in table.values_mut() {
                if !job.status.is_terminal() {
                    job.mark_failed("interrupted: process stopped before the job finished")?;
                    count += 1;
                }
            }
            Ok(count)
        })?;

        if recovered > 0 {
            warn!("Marked {} interrupted job(s) as failed", recovered);
        }
        Ok(recovered)
    }
}

impl JobRepository for JsonFileLedger {
    fn create(&self, job: &BackupJob) -> Result<()> {
        self.mutate(|table| apply_create(table, job))
    }

    fn get(&self, id: &str) -> Result<Option<BackupJob>> {
        Ok(self.jobs.read().get(id).cloned())
    }

    fn update(&self, job: &BackupJob) -> Result<()> {
        self.mutate(|table| apply_update(table, job))
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.mutate(|table| Ok(table.remove(id).is_some()))?;
        if removed {
            info!("Removed job {} from ledger", id);
        }
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<BackupJob>> {
        Ok(sorted(&self.jobs.read()))
    }
}

/// Count of jobs in each status, for status reporting
pub fn status_counts(jobs: &[BackupJob]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for status in [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ] {
        counts.insert(
            status.to_string(),
            jobs.iter().filter(|j| j.status == status).count(),
        );
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackupStrategy, DatabaseConfig};
    use tempfile::TempDir;

    fn job(strategy: &str) -> BackupJob {
        BackupJob::new(&BackupStrategy::new(strategy, DatabaseConfig::file("/tmp/db")))
    }

    #[test]
    fn test_file_ledger_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");

        let mut first = job("daily");
        {
            let ledger = JsonFileLedger::open(&path).unwrap();
            ledger.create(&first).unwrap();
            first.mark_running().unwrap();
            ledger.update(&first).unwrap();
            ledger.create(&job("weekly")).unwrap();
        }

        let ledger = JsonFileLedger::open(&path).unwrap();
        assert_eq!(ledger.list().unwrap().len(), 2);
        let loaded = ledger.get(&first.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(ledger.list_by_strategy("daily").unwrap().len(), 1);
    }

    #[test]
    fn test_terminal_job_update_rejected() {
        let ledger = MemoryLedger::new();
        let mut j = job("daily");
        ledger.create(&j).unwrap();
        j.mark_running().unwrap();
        j.mark_failed("boom").unwrap();
        ledger.update(&j).unwrap();

        let mut tampered = j.clone();
        tampered.error = Some("rewritten".to_string());
        assert!(ledger.update(&tampered).is_err());
        assert_eq!(ledger.get(&j.id).unwrap().unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_duplicate_create_rejected() {
        let ledger = MemoryLedger::new();
        let j = job("daily");
        ledger.create(&j).unwrap();
        assert!(ledger.create(&j).is_err());
    }

    #[test]
    fn test_recover_interrupted_jobs() {
        let dir = TempDir::new().unwrap();
        let ledger = JsonFileLedger::open(&dir.path().join("ledger.json")).unwrap();

        let pending = job("daily");
        let mut running = job("daily");
        ledger.create(&pending).unwrap();
        ledger.create(&running).unwrap();
        running.mark_running().unwrap();
        ledger.update(&running).unwrap();

        assert_eq!(ledger.recover_interrupted().unwrap(), 2);
        let jobs = ledger.list().unwrap();
        assert!(jobs.iter().all(|j| j.status == JobStatus::Failed));
        assert!(jobs[0].error.as_deref().unwrap().starts_with("interrupted"));
        assert_eq!(ledger.recover_interrupted().unwrap(), 0);
    }

    #[test]
    fn test_failed_persist_does_not_publish() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = JsonFileLedger::open(&path).unwrap();
        let j = job("daily");
        ledger.create(&j).unwrap();

        // Make the temp path a directory so the write fails
        fs::create_dir_all(dir.path().join("ledger.json.tmp")).unwrap();
        assert!(ledger.create(&job("daily")).is_err());
        assert_eq!(ledger.list().unwrap().len(), 1);
    }

    #[test]
    fn test_status_counts() {
        let mut a = job("daily");
        a.mark_running().unwrap();
        let counts = status_counts(&[a, job("daily")]);
        assert_eq!(counts["running"], 1);
        assert_eq!(counts["pending"], 1);
        assert_eq!(counts["completed"], 0);
    }
}
