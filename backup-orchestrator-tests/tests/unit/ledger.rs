//! Durable job ledger

use backup_orchestrator::config::{BackupStrategy, DatabaseConfig};
use backup_orchestrator::jobs::{BackupJob, JobStatus};
use backup_orchestrator::utils::ledger::{status_counts, JobRepository, JsonFileLedger};
use tempfile::TempDir;
use test_utils::{completed_job, reference_day};

fn strategy(name: &str) -> BackupStrategy {
    BackupStrategy::new(name, DatabaseConfig::file("/unused"))
}

#[test]
fn test_jobs_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state").join("ledger.json");

    let job = completed_job(&strategy("orders"), reference_day());
    {
        let ledger = JsonFileLedger::open(&path).unwrap();
        ledger.create(&job).unwrap();
        ledger.create(&completed_job(&strategy("logs"), reference_day())).unwrap();
    }

    let reopened = JsonFileLedger::open(&path).unwrap();
    assert_eq!(reopened.get(&job.id).unwrap(), Some(job));
    assert_eq!(reopened.list_by_strategy("orders").unwrap().len(), 1);
    assert_eq!(reopened.list().unwrap().len(), 2);
}

#[test]
fn test_interrupted_jobs_fail_on_recovery() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.json");
    let s = strategy("orders");

    let pending = BackupJob::new(&s);
    let mut running = BackupJob::new(&s);
    let done = completed_job(&s, reference_day());
    {
        let ledger = JsonFileLedger::open(&path).unwrap();
        ledger.create(&pending).unwrap();
        ledger.create(&running).unwrap();
        running.mark_running().unwrap();
        ledger.update(&running).unwrap();
        ledger.create(&done).unwrap();
    }

    let ledger = JsonFileLedger::open(&path).unwrap();
    assert_eq!(ledger.recover_interrupted().unwrap(), 2);

    let jobs = ledger.list().unwrap();
    let counts = status_counts(&jobs);
    assert_eq!(counts["failed"], 2);
    assert_eq!(counts["completed"], 1);
    assert_eq!(counts["running"], 0);

    let failed = ledger.get(&running.id).unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("interrupted"));

    // Nothing left to recover
    assert_eq!(ledger.recover_interrupted().unwrap(), 0);
}

#[test]
fn test_terminal_jobs_are_immutable() {
    let dir = TempDir::new().unwrap();
    let ledger = JsonFileLedger::open(&dir.path().join("ledger.json")).unwrap();

    let job = completed_job(&strategy("orders"), reference_day());
    ledger.create(&job).unwrap();

    let mut tampered = job.clone();
    tampered.size_bytes = Some(1);
    assert!(ledger.update(&tampered).is_err());
    assert_eq!(ledger.get(&job.id).unwrap().unwrap().size_bytes, job.size_bytes);

    // Deletion is still allowed (retention)
    assert!(ledger.delete(&job.id).unwrap());
    assert!(!ledger.delete(&job.id).unwrap());
}

#[test]
fn test_rejected_write_leaves_file_untouched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.json");
    let ledger = JsonFileLedger::open(&path).unwrap();

    let job = completed_job(&strategy("orders"), reference_day());
    ledger.create(&job).unwrap();
    let before = std::fs::read_to_string(&path).unwrap();

    assert!(ledger.create(&job).is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    assert_eq!(ledger.list().unwrap().len(), 1);
}
