//! 5-field cron evaluator (min hour dom month dow) over local wall-clock.
//!
//! The dispatcher polls once per second; expressions are minute-granular,
//! so a fired (task, minute) pair is deduped through the task's
//! `last_run` key.

use chrono::{Datelike, NaiveDateTime, Timelike};

use qr_domain::{Error, Result};

/// Check one cron field against a value.
fn cron_field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    // */N steps.
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
    }
    // Comma-separated values and N-M ranges.
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if let Ok(n) = part.parse::<u32>() {
            if value == n {
                return true;
            }
        }
    }
    false
}

/// Whether a local datetime's minute matches the expression.
pub fn cron_matches(cron: &str, dt: &NaiveDateTime) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    cron_field_matches(fields[0], dt.minute())
        && cron_field_matches(fields[1], dt.hour())
        && cron_field_matches(fields[2], dt.day())
        && cron_field_matches(fields[3], dt.month())
        && cron_field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

/// Dedupe key: the local minute a task fired in.
pub fn minute_key(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M").to_string()
}

const FIELD_RANGES: [(u32, u32, &str); 5] = [
    (0, 59, "minute"),
    (0, 23, "hour"),
    (1, 31, "day of month"),
    (1, 12, "month"),
    (0, 6, "day of week"),
];

fn validate_field(field: &str, min: u32, max: u32, name: &str) -> Result<()> {
    let bad = || Error::invalid_input(format!("invalid cron {name} field {field:?}"));
    if field == "*" {
        return Ok(());
    }
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().map_err(|_| bad())?;
        if n == 0 || n > max {
            return Err(bad());
        }
        return Ok(());
    }
    for part in field.split(',') {
        if part.is_empty() {
            return Err(bad());
        }
        if let Some((start_s, end_s)) = part.split_once('-') {
            let start: u32 = start_s.parse().map_err(|_| bad())?;
            let end: u32 = end_s.parse().map_err(|_| bad())?;
            if start < min || end > max || start > end {
                return Err(bad());
            }
        } else {
            let n: u32 = part.parse().map_err(|_| bad())?;
            if n < min || n > max {
                return Err(bad());
            }
        }
    }
    Ok(())
}

/// Validate an expression at schedule time.
pub fn validate_cron(cron: &str) -> Result<()> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(Error::invalid_input(format!(
            "cron expression {cron:?} must have 5 fields"
        )));
    }
    for (field, (min, max, name)) in fields.iter().zip(FIELD_RANGES) {
        validate_field(field, min, max, name)?;
    }
    Ok(())
}

/// Next matching local minute after `after`, within one year.
pub fn cron_next(cron: &str, after: &NaiveDateTime) -> Option<NaiveDateTime> {
    let mut candidate = (*after + chrono::Duration::seconds(60 - i64::from(after.second())))
        .with_second(0)?;
    for _ in 0..(366 * 24 * 60) {
        if cron_matches(cron, &candidate) {
            return Some(candidate);
        }
        candidate += chrono::Duration::minutes(1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn nine_oclock_daily() {
        assert!(cron_matches("0 9 * * *", &dt(2024, 6, 15, 9, 0, 0)));
        assert!(cron_matches("0 9 * * *", &dt(2024, 6, 15, 9, 0, 30)));
        assert!(!cron_matches("0 9 * * *", &dt(2024, 6, 15, 9, 1, 0)));
        assert!(!cron_matches("0 9 * * *", &dt(2024, 6, 15, 10, 0, 0)));
    }

    #[test]
    fn every_five_minutes() {
        assert!(cron_matches("*/5 * * * *", &dt(2024, 6, 15, 10, 0, 0)));
        assert!(cron_matches("*/5 * * * *", &dt(2024, 6, 15, 10, 55, 0)));
        assert!(!cron_matches("*/5 * * * *", &dt(2024, 6, 15, 10, 3, 0)));
    }

    #[test]
    fn ranges_and_lists() {
        assert!(cron_matches("0 9-17 * * *", &dt(2024, 6, 15, 12, 0, 0)));
        assert!(!cron_matches("0 9-17 * * *", &dt(2024, 6, 15, 20, 0, 0)));
        assert!(cron_matches("0,30 * * * *", &dt(2024, 6, 15, 4, 30, 0)));
        assert!(!cron_matches("0,30 * * * *", &dt(2024, 6, 15, 4, 20, 0)));
    }

    #[test]
    fn weekday_field() {
        // 2024-06-16 is a Sunday (0).
        assert!(cron_matches("0 0 * * 0", &dt(2024, 6, 16, 0, 0, 0)));
        assert!(!cron_matches("0 0 * * 1", &dt(2024, 6, 16, 0, 0, 0)));
    }

    #[test]
    fn validation_accepts_common_forms() {
        for expr in ["* * * * *", "0 9 * * *", "*/5 * * * *", "0,30 9-17 1 6 0-5"] {
            validate_cron(expr).unwrap();
        }
    }

    #[test]
    fn validation_rejects_malformed() {
        for expr in [
            "",
            "0 9 * *",
            "0 9 * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 7",
            "a * * * *",
            "*/0 * * * *",
            "5-2 * * * *",
        ] {
            assert!(validate_cron(expr).is_err(), "{expr:?} should be rejected");
        }
    }

    #[test]
    fn minute_key_is_minute_granular() {
        assert_eq!(
            minute_key(&dt(2024, 6, 15, 9, 0, 12)),
            minute_key(&dt(2024, 6, 15, 9, 0, 48))
        );
        assert_ne!(
            minute_key(&dt(2024, 6, 15, 9, 0, 59)),
            minute_key(&dt(2024, 6, 15, 9, 1, 0))
        );
    }

    #[test]
    fn next_occurrence() {
        let next = cron_next("30 * * * *", &dt(2024, 6, 15, 10, 0, 0)).unwrap();
        assert_eq!(next, dt(2024, 6, 15, 10, 30, 0));
        let next = cron_next("0 9 * * *", &dt(2024, 6, 15, 10, 0, 0)).unwrap();
        assert_eq!(next, dt(2024, 6, 16, 9, 0, 0));
    }
}
