//! Schedule expressions as seen by configuration authors

use backup_orchestrator::utils::cron::{validate_cron_schedule, CronSchedule};
use chrono::{DateTime, Datelike, Timelike, Utc};
use rstest::rstest;

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

#[test]
fn test_business_hours_sequence() {
    // Every two hours from 9 to 17 on weekdays
    let schedule = CronSchedule::parse("0 9-17/2 * * 1-5").unwrap();

    // Friday evening
    let mut t = at("2025-03-14T18:00:00Z");
    let mut fired = Vec::new();
    for _ in 0..6 {
        t = schedule.next_after(t).unwrap();
        fired.push(t);
    }

    // Skips the weekend and starts Monday 09:00
    assert_eq!(fired[0], at("2025-03-17T09:00:00Z"));
    let hours: Vec<u32> = fired.iter().map(|t| t.hour()).collect();
    assert_eq!(hours, vec![9, 11, 13, 15, 17, 9]);
    assert_eq!(fired[5].weekday(), chrono::Weekday::Tue);
    assert!(fired.windows(2).all(|w| w[0] < w[1]));
}

#[rstest]
#[case("@yearly", "2025-06-01T00:00:00Z", "2026-01-01T00:00:00Z")]
#[case("@monthly", "2025-06-15T08:00:00Z", "2025-07-01T00:00:00Z")]
#[case("@weekly", "2025-06-11T08:00:00Z", "2025-06-15T00:00:00Z")]
#[case("@daily", "2025-06-11T08:00:00Z", "2025-06-12T00:00:00Z")]
#[case("@every 5m", "2025-06-11T08:00:00Z", "2025-06-11T08:05:00Z")]
fn test_macros(#[case] expr: &str, #[case] after: &str, #[case] expected: &str) {
    let schedule = CronSchedule::parse(expr).unwrap();
    assert_eq!(schedule.next_after(at(after)), Some(at(expected)));
}

#[rstest]
#[case("0 24 * * *")]
#[case("0 0 0 * *")]
#[case("0 0 * 13 *")]
#[case("0 0 * * 8")]
#[case("5-1 * * * *")]
#[case("")]
fn test_out_of_range_fields_rejected(#[case] expr: &str) {
    assert!(!validate_cron_schedule(expr), "{:?} should be rejected", expr);
}
