//! Health monitoring and failover plans

use backup_orchestrator::managers::health::{HealthMonitor, HealthStatus, HealthTransition};
use backup_orchestrator::managers::notification::EventKind;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{
    DisasterRecoveryConfig, DrError, FailoverAction, FailoverPlan, FailoverStep, FlakyCheck,
    TestContext,
};

fn step(id: &str, action: FailoverAction) -> FailoverStep {
    let mut step = FailoverStep::new(id, action);
    step.retry_delay_ms = 10;
    step
}

fn db_outage_plan() -> FailoverPlan {
    let mut dns = step("dns", FailoverAction::DnsSwitch);
    dns.retries = 1;
    FailoverPlan {
        name: "db-outage".to_string(),
        triggers: vec!["postgres".to_string()],
        steps: vec![
            step("promote", FailoverAction::DatabaseFailover),
            dns,
            step("announce", FailoverAction::Notification),
        ],
        rollback_steps: vec![
            step("undo-dns", FailoverAction::DnsSwitch),
            step("demote", FailoverAction::DatabaseFailover),
        ],
        target_region: Some("eu-west".to_string()),
    }
}

fn monitor(ctx: &TestContext, threshold: u32, check: &FlakyCheck) -> HealthMonitor {
    let mut monitor = HealthMonitor::new(threshold, ctx.notifier());
    monitor.add_service("postgres", Duration::from_secs(1), Arc::new(check.clone()));
    monitor
}

#[tokio::test]
async fn test_degrades_only_at_threshold_and_recovers() {
    let ctx = TestContext::new();
    let check = FlakyCheck::new();
    let monitor = monitor(&ctx, 3, &check);
    check.set_healthy(false);

    assert!(monitor.poll_once().await.is_empty());
    assert!(monitor.poll_once().await.is_empty());
    let state = monitor.state("postgres").unwrap();
    assert_eq!(state.status, HealthStatus::Healthy);
    assert_eq!(state.consecutive_failures, 2);

    let events = monitor.poll_once().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].transition, HealthTransition::Degraded);
    assert_eq!(monitor.state("postgres").unwrap().status, HealthStatus::Degraded);

    // Staying down raises nothing new
    assert!(monitor.poll_once().await.is_empty());
    assert_eq!(ctx.sink.count(EventKind::HealthDegraded), 1);

    check.set_healthy(true);
    let events = monitor.poll_once().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].transition, HealthTransition::Recovered);
    let state = monitor.state("postgres").unwrap();
    assert_eq!(state.status, HealthStatus::Healthy);
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(state.last_error, None);
    assert_eq!(ctx.sink.count(EventKind::HealthRecovered), 1);
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let ctx = TestContext::new();
    let check = FlakyCheck::new();
    let monitor = monitor(&ctx, 3, &check);

    check.set_healthy(false);
    monitor.poll_once().await;
    monitor.poll_once().await;
    check.set_healthy(true);
    monitor.poll_once().await;
    check.set_healthy(false);
    monitor.poll_once().await;
    monitor.poll_once().await;

    assert_eq!(monitor.state("postgres").unwrap().status, HealthStatus::Healthy);
    assert_eq!(ctx.sink.count(EventKind::HealthDegraded), 0);
    assert_eq!(check.probes(), 5);
}

#[tokio::test]
async fn test_failed_step_rolls_back_and_skips_the_rest() {
    let ctx = TestContext::new();
    ctx.steps.clone().fail_step("dns");
    let check = FlakyCheck::new();
    let manager = ctx.manager_with(
        vec![],
        vec![db_outage_plan()],
        monitor(&ctx, 3, &check),
        DisasterRecoveryConfig::default(),
    );

    let err = manager.trigger_failover("db-outage").await.unwrap_err();

    match err {
        DrError::FailoverStepFailed { step, attempts, .. } => {
            assert_eq!(step, "dns");
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ctx.steps.calls(), vec!["promote", "dns", "dns", "undo-dns", "demote"]);
    assert_eq!(ctx.steps.attempts("announce"), 0);
    assert_eq!(manager.active_region(), "primary");
    assert_eq!(ctx.sink.count(EventKind::FailoverRolledBack), 1);
    assert_eq!(ctx.sink.count(EventKind::FailoverCompleted), 0);
}

#[tokio::test]
async fn test_completed_plan_switches_region() {
    let ctx = TestContext::new();
    let check = FlakyCheck::new();
    let manager = ctx.manager_with(
        vec![],
        vec![db_outage_plan()],
        monitor(&ctx, 3, &check),
        DisasterRecoveryConfig::default(),
    );

    let report = manager.trigger_failover("db-outage").await.unwrap();

    assert_eq!(report.executed_steps, vec!["promote", "dns", "announce"]);
    assert_eq!(manager.active_region(), "eu-west");
    assert_eq!(ctx.sink.count(EventKind::FailoverStepCompleted), 3);
    assert_eq!(ctx.sink.count(EventKind::FailoverCompleted), 1);
}

#[tokio::test]
async fn test_unknown_plan() {
    let ctx = TestContext::new();
    let manager = ctx.manager(vec![]);
    assert!(matches!(
        manager.trigger_failover("nope").await,
        Err(DrError::PlanNotFound(_))
    ));
}

#[tokio::test]
#[serial(timers)]
async fn test_periodic_health_poll_triggers_automatic_failover() {
    let ctx = TestContext::new();
    let check = FlakyCheck::new();
    check.set_healthy(false);
    let dr = DisasterRecoveryConfig {
        auto_failover: true,
        health_check_interval_seconds: 1,
        failure_threshold: 1,
        ..DisasterRecoveryConfig::default()
    };
    let manager = ctx.manager_with(vec![], vec![db_outage_plan()], monitor(&ctx, 1, &check), dr);

    manager.start().unwrap();
    let mut waited = Duration::ZERO;
    while manager.active_region() != "eu-west" && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += Duration::from_millis(100);
    }
    manager.shutdown();

    assert_eq!(manager.active_region(), "eu-west");
    assert_eq!(ctx.steps.calls(), vec!["promote", "dns", "announce"]);
    assert!(check.probes() >= 1);
}
