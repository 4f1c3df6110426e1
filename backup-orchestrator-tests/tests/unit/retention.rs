//! Retention planning over long histories

use backup_orchestrator::config::{BackupStrategy, DatabaseConfig, RetentionPolicy};
use backup_orchestrator::managers::retention::plan_retention;
use chrono::{Duration, NaiveDate};
use test_utils::{completed_job, daily_jobs, failed_job, reference_day};

fn strategy() -> BackupStrategy {
    BackupStrategy::new("orders", DatabaseConfig::file("/unused"))
}

fn kept_dates(jobs: &[backup_orchestrator::jobs::BackupJob]) -> Vec<NaiveDate> {
    jobs.iter().map(|j| j.taken_at().date_naive()).collect()
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

#[test]
fn test_all_tiers_over_400_days() {
    let jobs = daily_jobs(&strategy(), 400, reference_day());
    let policy = RetentionPolicy {
        daily: 7,
        weekly: 4,
        monthly: 12,
        yearly: 2,
    };

    let plan = plan_retention(&jobs, &policy);
    let kept = kept_dates(&plan.keep);

    // 7 days, then the Sundays closing the 4 previous ISO weeks
    assert_eq!(kept[0], date("2024-06-30"));
    assert_eq!(kept[6], date("2024-06-24"));
    assert_eq!(
        kept[7..11],
        [date("2024-06-23"), date("2024-06-16"), date("2024-06-09"), date("2024-06-02")]
    );
    // Month ends, newest first, from June 2024 back to July 2023
    assert_eq!(kept[11], date("2024-06-01"));
    assert_eq!(kept[12], date("2024-05-31"));
    assert_eq!(kept[15], date("2024-02-29"));
    assert_eq!(kept[22], date("2023-07-31"));
    // Only one older year is left to represent
    assert_eq!(kept[23], date("2023-07-30"));
    assert_eq!(kept.len(), 24);
    assert_eq!(plan.delete.len(), 400 - 24);
}

#[test]
fn test_multiple_jobs_per_day_keep_the_newest() {
    let s = strategy();
    let mut jobs = Vec::new();
    for hours in [0, 6, 12, 18] {
        jobs.push(completed_job(&s, reference_day() + Duration::hours(hours)));
    }
    let policy = RetentionPolicy {
        daily: 1,
        ..Default::default()
    };

    let plan = plan_retention(&jobs, &policy);
    assert_eq!(plan.keep.len(), 1);
    assert_eq!(plan.keep[0].taken_at(), reference_day() + Duration::hours(18));
    assert_eq!(plan.delete.len(), 3);
}

#[test]
fn test_zero_policy_clears_failed_jobs_too() {
    let s = strategy();
    let mut jobs = daily_jobs(&s, 3, reference_day());
    jobs.push(failed_job(&s, reference_day() - Duration::days(10)));

    let plan = plan_retention(&jobs, &RetentionPolicy::default());
    assert!(plan.keep.is_empty());
    assert_eq!(plan.delete.len(), 4);
    assert_eq!(plan.delete.iter().filter(|j| j.error.is_some()).count(), 1);
}

#[test]
fn test_failures_between_kept_jobs_survive() {
    let s = strategy();
    let mut jobs = daily_jobs(&s, 60, reference_day());
    let policy = RetentionPolicy {
        daily: 7,
        weekly: 4,
        ..Default::default()
    };
    // Inside the weekly window, and well past it
    let inside = failed_job(&s, reference_day() - Duration::days(12));
    let outside = failed_job(&s, reference_day() - Duration::days(45));
    jobs.push(inside.clone());
    jobs.push(outside.clone());

    let plan = plan_retention(&jobs, &policy);
    assert!(plan.delete.iter().any(|j| j.id == outside.id));
    assert!(!plan.delete.iter().any(|j| j.id == inside.id));
    assert!(!plan.keep.iter().any(|j| j.id == inside.id));
}
