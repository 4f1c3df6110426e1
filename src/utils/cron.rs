//! Cron schedule parsing and next-fire computation
//!
//! Supports the classic five fields (minute hour day-of-month month day-of-week),
//! the `@hourly`-style macros, and `@every <n><s|m|h|d>` fixed intervals.
//! All times are UTC.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Timelike, Utc};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronSchedule {
    Fields(CronFields),
    Every(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronFields {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid {field} field '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("invalid interval '{0}'")]
    InvalidInterval(String),

    #[error("unknown macro '{0}'")]
    UnknownMacro(String),
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let expr = expr.trim();

        if let Some(interval) = expr.strip_prefix("@every") {
            return parse_interval(interval.trim()).map(CronSchedule::Every);
        }

        let expanded = match expr {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other if other.starts_with('@') => {
                return Err(CronError::UnknownMacro(other.to_string()))
            }
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let mut days_of_week = parse_field(fields[4], "day-of-week", 0, 7)?;
        // 7 is an alias for Sunday
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(CronSchedule::Fields(CronFields {
            minutes: parse_field(fields[0], "minute", 0, 59)?,
            hours: parse_field(fields[1], "hour", 0, 23)?,
            days_of_month: parse_field(fields[2], "day-of-month", 1, 31)?,
            months: parse_field(fields[3], "month", 1, 12)?,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        }))
    }

    /// First fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            CronSchedule::Every(interval) => {
                let step = ChronoDuration::from_std(*interval).ok()?;
                after.checked_add_signed(step)
            }
            CronSchedule::Fields(fields) => fields.next_after(after),
        }
    }
}

impl CronFields {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after.with_second(0)?.with_nanosecond(0)? + ChronoDuration::minutes(1);
        let horizon = after.year() + 5;

        while t.year() <= horizon {
            if !bit(self.months, t.month()) {
                t = start_of_next_month(t)?;
                continue;
            }
            if !self.day_matches(t) {
                t = start_of_day(t.date_naive().succ_opt()?)?;
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = t.with_minute(0)? + ChronoDuration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t += ChronoDuration::minutes(1);
                continue;
            }
            return Some(t);
        }

        None
    }

    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom = bit(self.days_of_month, t.day());
        let dow = bit(self.days_of_week, t.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn start_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    start_of_day(NaiveDate::from_ymd_opt(year, month, 1)?)
}

fn parse_field(text: &str, field: &'static str, min: u32, max: u32) -> Result<u64, CronError> {
    let invalid = || CronError::InvalidField {
        field,
        value: text.to_string(),
    };

    let mut mask = 0u64;
    for part in text.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let a: u32 = a.parse().map_err(|_| invalid())?;
            let b: u32 = b.parse().map_err(|_| invalid())?;
            (a, b)
        } else {
            let a: u32 = range.parse().map_err(|_| invalid())?;
            // "5/15" means from 5 to the end of the range
            if part.contains('/') {
                (a, max)
            } else {
                (a, a)
            }
        };

        if start < min || end > max || start > end {
            return Err(invalid());
        }

        let mut value = start;
        while value <= end {
            mask |= 1u64 << value;
            value += step;
        }
    }

    Ok(mask)
}

fn parse_interval(text: &str) -> Result<Duration, CronError> {
    let invalid = || CronError::InvalidInterval(text.to_string());

    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (amount, unit) = text.split_at(split);
    let amount: u64 = amount.parse().map_err(|_| invalid())?;
    if amount == 0 {
        return Err(invalid());
    }

    let seconds = match unit {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3600,
        "d" => amount * 86400,
        _ => return Err(invalid()),
    };

    Ok(Duration::from_secs(seconds))
}

/// Validate cron schedule syntax
pub fn validate_cron_schedule(schedule: &str) -> bool {
    CronSchedule::parse(schedule).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[rstest]
    #[case("0 2 * * *", true)]
    #[case("*/5 * * * *", true)]
    #[case("0 0 1 * *", true)]
    #[case("0 9-17/2 * * 1-5", true)]
    #[case("0 0 * * 7", true)]
    #[case("@daily", true)]
    #[case("@every 30s", true)]
    #[case("invalid", false)]
    #[case("0 2 * *", false)]
    #[case("0 2 * * * *", false)]
    #[case("60 * * * *", false)]
    #[case("*/0 * * * *", false)]
    #[case("@every 10x", false)]
    #[case("@fortnightly", false)]
    fn test_validate_cron_schedule(#[case] expr: &str, #[case] valid: bool) {
        assert_eq!(validate_cron_schedule(expr), valid, "{}", expr);
    }

    #[rstest]
    #[case("0 2 * * *", "2025-03-10T01:30:00Z", "2025-03-10T02:00:00Z")]
    #[case("0 2 * * *", "2025-03-10T02:00:00Z", "2025-03-11T02:00:00Z")]
    #[case("*/15 * * * *", "2025-03-10T10:07:13Z", "2025-03-10T10:15:00Z")]
    #[case("0 0 1 * *", "2025-12-15T00:00:00Z", "2026-01-01T00:00:00Z")]
    #[case("30 4 * * 0", "2025-03-10T00:00:00Z", "2025-03-16T04:30:00Z")]
    #[case("0 0 29 2 *", "2025-01-01T00:00:00Z", "2028-02-29T00:00:00Z")]
    #[case("@hourly", "2025-03-10T10:59:59Z", "2025-03-10T11:00:00Z")]
    fn test_next_after(#[case] expr: &str, #[case] after: &str, #[case] expected: &str) {
        let schedule = CronSchedule::parse(expr).unwrap();
        assert_eq!(schedule.next_after(at(after)), Some(at(expected)));
    }

    #[test]
    fn test_dom_or_dow_when_both_restricted() {
        // 1st of the month OR any Monday
        let schedule = CronSchedule::parse("0 0 1 * 1").unwrap();
        // 2025-03-02 is a Sunday, so the next match is Monday the 3rd
        assert_eq!(
            schedule.next_after(at("2025-03-02T12:00:00Z")),
            Some(at("2025-03-03T00:00:00Z"))
        );
    }

    #[test]
    fn test_every_interval() {
        let schedule = CronSchedule::parse("@every 90s").unwrap();
        assert_eq!(schedule, CronSchedule::Every(Duration::from_secs(90)));
        assert_eq!(
            schedule.next_after(at("2025-03-10T10:00:00Z")),
            Some(at("2025-03-10T10:01:30Z"))
        );
    }

    #[test]
    fn test_impossible_schedule_has_no_next() {
        let schedule = CronSchedule::parse("0 0 31 2 *").unwrap();
        assert_eq!(schedule.next_after(at("2025-01-01T00:00:00Z")), None);
    }
}
