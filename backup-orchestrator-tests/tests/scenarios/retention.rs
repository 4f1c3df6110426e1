//! Retention applied through the manager

use backup_orchestrator::managers::notification::EventKind;
use backup_orchestrator::utils::ledger::JobRepository;
use std::path::Path;
use test_utils::{
    daily_jobs, failed_job, reference_day, DrError, JobStatus, RetentionPolicy, TestContext,
};

fn policy(daily: u32, weekly: u32, monthly: u32) -> RetentionPolicy {
    RetentionPolicy {
        daily,
        weekly,
        monthly,
        yearly: 0,
    }
}

#[tokio::test]
async fn test_thirty_daily_backups_under_7_4_12() {
    let ctx = TestContext::new();
    let mut strategy = ctx.strategy("orders", 1);
    strategy.retention = policy(7, 4, 12);
    for job in daily_jobs(&strategy, 30, reference_day()) {
        ctx.ledger.create(&job).unwrap();
    }
    let manager = ctx.manager(vec![strategy]);

    let report = manager.prune("orders").await.unwrap();

    // 7 days, the 4 preceding ISO weeks, then June itself
    assert_eq!(report.kept_count, 12);
    assert_eq!(report.deleted_count, 18);
    assert!(report.kept_count <= 7 + 4 + 12);
    assert_eq!(manager.list_jobs(Some("orders")).unwrap().len(), 12);
    assert_eq!(ctx.sink.count(EventKind::RetentionSummary), 1);
}

#[tokio::test]
async fn test_prune_is_idempotent() {
    let ctx = TestContext::new();
    let mut strategy = ctx.strategy("orders", 1);
    strategy.retention = policy(3, 1, 0);
    for job in daily_jobs(&strategy, 10, reference_day()) {
        ctx.ledger.create(&job).unwrap();
    }
    let manager = ctx.manager(vec![strategy]);

    let first = manager.prune("orders").await.unwrap();
    assert!(first.deleted_count > 0);

    let second = manager.prune("orders").await.unwrap();
    assert_eq!(second.deleted_count, 0);
    assert_eq!(second.kept_count, first.kept_count);
    // Nothing to report the second time
    assert_eq!(ctx.sink.count(EventKind::RetentionSummary), 1);
}

#[tokio::test]
async fn test_prune_ages_out_old_failed_jobs() {
    let ctx = TestContext::new();
    let mut strategy = ctx.strategy("orders", 1);
    strategy.retention = policy(1, 0, 0);
    for job in daily_jobs(&strategy, 3, reference_day()) {
        ctx.ledger.create(&job).unwrap();
    }
    let stale = failed_job(&strategy, reference_day() - chrono::Duration::days(10));
    let recent = failed_job(&strategy, reference_day() + chrono::Duration::hours(3));
    ctx.ledger.create(&stale).unwrap();
    ctx.ledger.create(&recent).unwrap();
    let manager = ctx.manager(vec![strategy]);

    let report = manager.prune("orders").await.unwrap();
    assert_eq!(report.deleted_count, 3);
    assert_eq!(report.kept_count, 1);

    let remaining = manager.list_jobs(Some("orders")).unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().any(|j| j.id == recent.id && j.status == JobStatus::Failed));
    assert!(!remaining.iter().any(|j| j.id == stale.id));
}

// Two backups land on the same day, so the daily tier keeps only the newer one.
// The prune spawned after the second backup may win the race against the
// explicit call; either way the final state is the same.
#[tokio::test]
async fn test_prune_removes_stored_artifacts() {
    let ctx = TestContext::new();
    let manager = ctx.manager(vec![ctx.strategy("orders", 2)]);
    let older = manager.run_backup("orders").await.unwrap();
    let newer = manager.run_backup("orders").await.unwrap();

    manager.prune("orders").await.unwrap();

    for location in &older.locations {
        assert!(!Path::new(&location.uri).exists());
    }
    for location in &newer.locations {
        assert!(Path::new(&location.uri).exists());
    }
    assert!(matches!(manager.get_job(&older.id), Err(DrError::BackupNotFound(_))));
    assert_eq!(manager.list_jobs(Some("orders")).unwrap().len(), 1);
}

#[tokio::test]
async fn test_storage_failure_still_drops_ledger_entry() {
    let ctx = TestContext::new();
    let manager = ctx.manager(vec![ctx.strategy("orders", 2)]);
    let older = manager.run_backup("orders").await.unwrap();
    ctx.driver.break_delete("dest-2");
    manager.run_backup("orders").await.unwrap();

    manager.prune("orders").await.unwrap();

    assert!(manager.get_job(&older.id).is_err());
    assert!(!Path::new(&older.locations[0].uri).exists());
    assert!(Path::new(&older.locations[1].uri).exists());
}
