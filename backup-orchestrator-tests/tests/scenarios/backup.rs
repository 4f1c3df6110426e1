//! Backup execution: concurrency, fan-out and failure recording

use backup_orchestrator::managers::notification::EventKind;
use std::time::Duration;
use test_utils::{DrError, JobStatus, MockResponse, TestContext};

#[tokio::test]
async fn test_concurrent_execute_over_limit() {
    let ctx = TestContext::new();
    let mut strategy = ctx.strategy("orders", 1);
    strategy.max_concurrent_jobs = 1;
    ctx.dumper.clone().with_delay(Duration::from_millis(300));
    let manager = ctx.manager(vec![strategy]);

    let (a, b) = tokio::join!(manager.run_backup("orders"), manager.run_backup("orders"));
    let results = [a, b];

    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(DrError::ConcurrencyLimitExceeded { .. })))
        .count();
    assert_eq!(rejected, 1);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    // The rejected call never created a job
    let jobs = manager.list_jobs(Some("orders")).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert_eq!(ctx.dumper.dump_count(), 1);
}

#[tokio::test]
async fn test_one_broken_destination_out_of_three() {
    let ctx = TestContext::new();
    let manager = ctx.manager(vec![ctx.strategy("orders", 3)]);
    ctx.driver.break_put("dest-2");

    let job = manager.run_backup("orders").await.unwrap();
    let stored: Vec<_> = job.locations.iter().map(|l| l.destination.as_str()).collect();
    assert_eq!(stored, vec!["dest-1", "dest-3"]);
    assert_eq!(ctx.driver.calls_for("put").len(), 3);
}

#[tokio::test]
async fn test_all_destinations_broken() {
    let ctx = TestContext::new();
    let manager = ctx.manager(vec![ctx.strategy("orders", 3)]);
    for dest in ["dest-1", "dest-2", "dest-3"] {
        ctx.driver.break_put(dest);
    }

    let err = manager.run_backup("orders").await.unwrap_err();
    assert!(matches!(err, DrError::AllDestinationsFailed { attempted: 3, .. }));

    // Recorded in the ledger with the same message, and alerted
    let jobs = manager.list_jobs(Some("orders")).unwrap();
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(jobs[0].error.as_deref(), Some(err.to_string().as_str()));
    assert_eq!(ctx.sink.count(EventKind::BackupFailed), 1);
    let alert = &ctx.sink.events()[0];
    assert_eq!(alert.get("error_kind"), Some("all_destinations_failed"));
}

#[tokio::test]
async fn test_dump_failure_is_recorded() {
    let ctx = TestContext::new();
    let manager = ctx.manager(vec![ctx.strategy("orders", 1)]);
    ctx.dumper.fail_dumps("pg_dump: connection refused");

    let err = manager.run_backup("orders").await.unwrap_err();
    assert!(matches!(err, DrError::DumpFailed(_)));
    assert!(err.to_string().contains("connection refused"));
    assert!(ctx.driver.calls_for("put").is_empty());
}

#[tokio::test]
async fn test_failing_post_hook_removes_stored_copies() {
    let ctx = TestContext::new();
    let mut strategy = ctx.strategy("orders", 2);
    strategy.post_backup_hooks = vec![backup_orchestrator::config::Hook {
        name: "verify-replica".to_string(),
        command: "check-replica --strict".to_string(),
        working_dir: None,
        timeout_seconds: Some(5),
        continue_on_error: false,
    }];
    ctx.commands.clone().expect(
        "check-replica",
        MockResponse::Failure {
            stderr: "replica lag".to_string(),
            exit_code: 2,
        },
    );
    let manager = ctx.manager(vec![strategy]);

    let err = manager.run_backup("orders").await.unwrap_err();
    assert!(matches!(err, DrError::HookFailed { .. }));
    assert_eq!(ctx.driver.calls_for("delete"), vec!["dest-1", "dest-2"]);
}

#[tokio::test]
async fn test_disabled_strategy_creates_no_job() {
    let ctx = TestContext::new();
    let mut strategy = ctx.strategy("orders", 1);
    strategy.enabled = false;
    let manager = ctx.manager(vec![strategy]);

    assert!(matches!(
        manager.run_backup("orders").await,
        Err(DrError::StrategyDisabled(_))
    ));
    assert!(manager.list_jobs(None).unwrap().is_empty());
}
