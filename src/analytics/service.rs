//! Which weekdays a service pattern runs on.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use sqlx::SqlitePool;
use tracing::warn;

/// Active flags indexed Monday = 0 .. Sunday = 6.
pub type ActiveDays = [bool; 7];

/// `calendar_dates.exception_type` value for a date the service was added on.
pub const SERVICE_ADDED: i64 = 1;

#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct CalendarRow {
    pub monday: Option<i64>,
    pub tuesday: Option<i64>,
    pub wednesday: Option<i64>,
    pub thursday: Option<i64>,
    pub friday: Option<i64>,
    pub saturday: Option<i64>,
    pub sunday: Option<i64>,
}

impl CalendarRow {
    fn flags(&self) -> [Option<i64>; 7] {
        [
            self.monday,
            self.tuesday,
            self.wednesday,
            self.thursday,
            self.friday,
            self.saturday,
            self.sunday,
        ]
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CalendarDateRow {
    pub date: Option<String>,
    pub exception_type: Option<i64>,
}

/// Resolves the weekdays of one service.
///
/// A calendar row wins outright. Without one, each date the service was added
/// on activates its weekday; removed dates never contribute.
pub fn active_days(calendar: Option<&CalendarRow>, exceptions: &[CalendarDateRow]) -> ActiveDays {
    let mut days = [false; 7];

    if let Some(calendar) = calendar {
        for (day, flag) in calendar.flags().into_iter().enumerate() {
            days[day] = flag.is_some_and(|v| v != 0);
        }
        return days;
    }

    for exception in exceptions {
        if exception.exception_type != Some(SERVICE_ADDED) {
            continue;
        }
        let Some(raw) = exception.date.as_deref() else {
            continue;
        };
        match NaiveDate::parse_from_str(raw.trim(), "%Y%m%d") {
            Ok(date) => days[date.weekday().num_days_from_monday() as usize] = true,
            Err(e) => warn!(date = raw, error = %e, "Skipping unparsable calendar date"),
        }
    }
    days
}

/// Looks up the active weekdays of every given service.
pub async fn resolve_services<'a, I>(
    pool: &SqlitePool,
    service_ids: I,
) -> Result<HashMap<String, ActiveDays>, sqlx::Error>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut resolved = HashMap::new();

    for service_id in service_ids {
        let calendar: Option<CalendarRow> = sqlx::query_as(
            "SELECT CAST(monday AS INTEGER) AS monday, CAST(tuesday AS INTEGER) AS tuesday, \
             CAST(wednesday AS INTEGER) AS wednesday, CAST(thursday AS INTEGER) AS thursday, \
             CAST(friday AS INTEGER) AS friday, CAST(saturday AS INTEGER) AS saturday, \
             CAST(sunday AS INTEGER) AS sunday \
             FROM calendar WHERE service_id = ? LIMIT 1",
        )
        .bind(service_id)
        .fetch_optional(pool)
        .await?;

        let exceptions: Vec<CalendarDateRow> = if calendar.is_some() {
            vec![]
        } else {
            sqlx::query_as(
                "SELECT CAST(date AS TEXT) AS date, CAST(exception_type AS INTEGER) AS exception_type \
                 FROM calendar_dates WHERE service_id = ?",
            )
            .bind(service_id)
            .fetch_all(pool)
            .await?
        };

        resolved.insert(
            service_id.to_string(),
            active_days(calendar.as_ref(), &exceptions),
        );
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::memory_pool;

    fn added(date: &str) -> CalendarDateRow {
        CalendarDateRow {
            date: Some(date.to_string()),
            exception_type: Some(SERVICE_ADDED),
        }
    }

    #[test]
    fn test_calendar_flags() {
        let calendar = CalendarRow {
            monday: Some(1),
            saturday: Some(1),
            sunday: Some(0),
            ..Default::default()
        };
        assert_eq!(
            active_days(Some(&calendar), &[]),
            [true, false, false, false, false, true, false]
        );
    }

    #[test]
    fn test_calendar_row_ignores_exceptions() {
        let calendar = CalendarRow {
            monday: Some(1),
            ..Default::default()
        };
        // 2024-01-03 is a Wednesday.
        let days = active_days(Some(&calendar), &[added("20240103")]);
        assert_eq!(days, [true, false, false, false, false, false, false]);
    }

    #[test]
    fn test_added_dates_without_calendar() {
        let removed = CalendarDateRow {
            date: Some("20240105".into()),
            exception_type: Some(2),
        };
        let days = active_days(None, &[added("20240103"), added("20240110"), removed]);
        assert_eq!(days, [false, false, true, false, false, false, false]);
    }

    #[test]
    fn test_no_calendar_and_no_additions() {
        assert_eq!(active_days(None, &[]), [false; 7]);
        assert_eq!(active_days(None, &[added("not-a-date")]), [false; 7]);
    }

    #[tokio::test]
    async fn test_resolve_services_from_storage() {
        let pool = memory_pool().await;
        sqlx::query(
            "INSERT INTO calendar (service_id, monday, tuesday, wednesday, thursday, friday, saturday, sunday) \
             VALUES ('WK', 1, 1, 1, 1, 1, 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO calendar_dates (service_id, date, exception_type) VALUES ('HOL', 20240107, 1)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let resolved = resolve_services(&pool, ["WK", "HOL", "NONE"]).await.unwrap();

        assert_eq!(resolved["WK"], [true, true, true, true, true, false, false]);
        assert_eq!(resolved["HOL"], [false, false, false, false, false, false, true]);
        assert_eq!(resolved["NONE"], [false; 7]);
    }
}
