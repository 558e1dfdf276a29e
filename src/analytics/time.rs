//! GTFS time-of-day values.
//!
//! Stop times are written `HH:MM:SS` relative to the start of the service
//! day, and `HH` may be 24 or more for trips that run past midnight.

use std::fmt;

use chrono::{NaiveTime, TimeDelta, Timelike};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid GTFS time {0:?}")]
pub struct TimeParseError(pub String);

/// A stop time normalized to a wall-clock time plus whole days after the
/// service day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceTime {
    pub days: u32,
    pub time: NaiveTime,
}

impl ServiceTime {
    pub fn parse(value: &str) -> Result<Self, TimeParseError> {
        let invalid = || TimeParseError(value.to_string());

        let mut parts = value.trim().split(':');
        let (Some(h), Some(m), Some(s), None) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let field = |p: &str| -> Result<u32, TimeParseError> {
            if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            p.parse().map_err(|_| invalid())
        };
        let (hours, minutes, seconds) = (field(h)?, field(m)?, field(s)?);

        let time = NaiveTime::from_hms_opt(hours % 24, minutes, seconds).ok_or_else(invalid)?;
        Ok(Self {
            days: hours / 24,
            time,
        })
    }

    /// Time elapsed since midnight at the start of the service day.
    pub fn offset(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.days))
            + TimeDelta::seconds(i64::from(self.time.num_seconds_from_midnight()))
    }
}

impl fmt::Display for ServiceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.days * 24 + self.time.hour(),
            self.time.minute(),
            self.time.second()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_same_day_time() {
        let t = ServiceTime::parse("05:30:00").unwrap();
        assert_eq!(t.days, 0);
        assert_eq!(t.time, hms(5, 30, 0));
    }

    #[test]
    fn test_overflow_hours_roll_into_next_days() {
        let next_day = ServiceTime::parse("25:30:00").unwrap();
        assert_eq!((next_day.days, next_day.time), (1, hms(1, 30, 0)));

        let two_days = ServiceTime::parse("48:00:00").unwrap();
        assert_eq!((two_days.days, two_days.time), (2, hms(0, 0, 0)));
    }

    #[test]
    fn test_ordering_follows_service_day_offset() {
        let late = ServiceTime::parse("23:50:00").unwrap();
        let after_midnight = ServiceTime::parse("24:10:00").unwrap();
        let early_next = ServiceTime::parse("00:10:00").unwrap();
        assert!(after_midnight > late);
        assert!(early_next < late);
    }

    #[test]
    fn test_difference_across_midnight() {
        let start = ServiceTime::parse("23:50:00").unwrap();
        let end = ServiceTime::parse("24:20:00").unwrap();
        assert_eq!((end.offset() - start.offset()).num_minutes(), 30);
    }

    #[test]
    fn test_single_digit_hour_and_whitespace() {
        assert_eq!(ServiceTime::parse(" 8:05:00").unwrap().time, hms(8, 5, 0));
    }

    #[test]
    fn test_invalid_times() {
        for bad in ["", "08:00", "08:00:00:00", "ab:00:00", "08:61:00", "08:00:60", "-1:00:00"] {
            assert!(ServiceTime::parse(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_display_keeps_overflow_hours() {
        assert_eq!(ServiceTime::parse("25:03:09").unwrap().to_string(), "25:03:09");
    }
}
