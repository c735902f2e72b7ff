//! Quiet-hours window — a wall-clock span during which agent loops skip
//! cycles. Inclusive start, exclusive end, wraps midnight.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A `from..until` wall-clock window in `HH:MM` resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    /// Inclusive start, minutes since midnight.
    pub from_min: u16,
    /// Exclusive end, minutes since midnight.
    pub until_min: u16,
}

fn parse_hhmm(s: &str) -> Result<u16> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| Error::invalid_input(format!("quiet hours time {s:?} is not HH:MM")))?;
    let h: u16 = h
        .parse()
        .map_err(|_| Error::invalid_input(format!("quiet hours hour in {s:?}")))?;
    let m: u16 = m
        .parse()
        .map_err(|_| Error::invalid_input(format!("quiet hours minute in {s:?}")))?;
    if h > 23 || m > 59 {
        return Err(Error::invalid_input(format!("quiet hours time {s:?} out of range")));
    }
    Ok(h * 60 + m)
}

impl QuietHours {
    /// Parse a `"HH:MM".."HH:MM"` pair. A zero-width window (`from == until`)
    /// is rejected: it is the only way this encoding could express a
    /// degenerate (empty or >24h) span.
    pub fn parse(from: &str, until: &str) -> Result<Self> {
        let from_min = parse_hhmm(from)?;
        let until_min = parse_hhmm(until)?;
        if from_min == until_min {
            return Err(Error::invalid_input(
                "quiet hours window must not start and end at the same time",
            ));
        }
        Ok(Self { from_min, until_min })
    }

    /// Whether the given local wall-clock time falls inside the window.
    pub fn contains(&self, t: NaiveTime) -> bool {
        use chrono::Timelike;
        let min = (t.hour() * 60 + t.minute()) as u16;
        if self.from_min < self.until_min {
            min >= self.from_min && min < self.until_min
        } else {
            // Wraps midnight: 22:00..06:00 covers [22:00, 24:00) ∪ [00:00, 06:00).
            min >= self.from_min || min < self.until_min
        }
    }

    pub fn from_hhmm(&self) -> String {
        format!("{:02}:{:02}", self.from_min / 60, self.from_min % 60)
    }

    pub fn until_hhmm(&self) -> String {
        format!("{:02}:{:02}", self.until_min / 60, self.until_min % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn plain_window() {
        let q = QuietHours::parse("09:00", "17:00").unwrap();
        assert!(q.contains(t(9, 0)), "inclusive start");
        assert!(q.contains(t(12, 30)));
        assert!(!q.contains(t(17, 0)), "exclusive end");
        assert!(!q.contains(t(8, 59)));
    }

    #[test]
    fn wraps_midnight() {
        let q = QuietHours::parse("22:00", "06:00").unwrap();
        assert!(q.contains(t(23, 0)));
        assert!(q.contains(t(2, 15)));
        assert!(q.contains(t(22, 0)));
        assert!(!q.contains(t(6, 0)));
        assert!(!q.contains(t(7, 0)));
        assert!(!q.contains(t(12, 0)));
    }

    #[test]
    fn zero_width_rejected() {
        let err = QuietHours::parse("10:00", "10:00").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidInput);
    }

    #[test]
    fn malformed_rejected() {
        assert!(QuietHours::parse("25:00", "06:00").is_err());
        assert!(QuietHours::parse("22:61", "06:00").is_err());
        assert!(QuietHours::parse("2200", "06:00").is_err());
        assert!(QuietHours::parse("", "06:00").is_err());
    }

    #[test]
    fn hhmm_roundtrip() {
        let q = QuietHours::parse("22:30", "06:05").unwrap();
        assert_eq!(q.from_hhmm(), "22:30");
        assert_eq!(q.until_hhmm(), "06:05");
    }

    #[test]
    fn serde_roundtrip() {
        let q = QuietHours::parse("22:00", "06:00").unwrap();
        let json = serde_json::to_string(&q).unwrap();
        let back: QuietHours = serde_json::from_str(&json).unwrap();
        assert_eq!(q, back);
    }
}
