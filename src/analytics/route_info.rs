//! Per-weekday trip counts and average trip durations for a route.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::TimeDelta;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use super::service::{ActiveDays, resolve_services};
use super::time::ServiceTime;
use crate::error::QueryError;

/// Only trips in this direction are analyzed. Both directions of a route are
/// assumed to run comparable schedules.
pub const ANALYZED_DIRECTION: i64 = 0;

pub const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    pub days: [&'static str; 7],
    pub trips_by_day: [u32; 7],
    /// Minutes, 0.0 on days without trips.
    pub avg_route_time: [f64; 7],
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StopTimeRow {
    pub trip_id: String,
    pub service_id: Option<String>,
    pub stop_sequence: Option<i64>,
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
}

/// Start and end of a trip relative to its service day.
#[derive(Debug, Clone, Default)]
pub struct TripSpan {
    pub service_id: Option<String>,
    pub start: Option<ServiceTime>,
    pub end: Option<ServiceTime>,
}

impl TripSpan {
    /// Trip duration, wrapping the end past midnight when it precedes the start.
    pub fn duration(&self) -> Option<TimeDelta> {
        let (start, mut end) = (self.start?.offset(), self.end?.offset());
        if end < start {
            end += TimeDelta::days(1);
        }
        Some(end - start)
    }
}

/// Folds ordered stop-time rows into one span per trip.
///
/// Rows must be ordered by trip then stop sequence. A row whose times do not
/// parse is skipped.
pub fn trip_spans(rows: &[StopTimeRow]) -> BTreeMap<String, TripSpan> {
    let mut spans: BTreeMap<String, TripSpan> = BTreeMap::new();
    let mut skipped = 0usize;

    for row in rows {
        let span = spans.entry(row.trip_id.clone()).or_default();
        span.service_id.clone_from(&row.service_id);

        let parsed = ServiceTime::parse(row.arrival_time.as_deref().unwrap_or(""))
            .and_then(|a| Ok((a, ServiceTime::parse(row.departure_time.as_deref().unwrap_or(""))?)));
        let (arrival, departure) = match parsed {
            Ok(times) => times,
            Err(e) => {
                debug!(trip_id = %row.trip_id, stop_sequence = ?row.stop_sequence, error = %e, "Skipping stop time");
                skipped += 1;
                continue;
            }
        };

        if span.start.is_none() || row.stop_sequence == Some(1) {
            span.start = Some(arrival);
        }
        span.end = Some(departure);
    }

    if skipped > 0 {
        warn!(skipped, "Stop times with unparsable times were ignored");
    }
    spans
}

/// Counts trips and averages their durations for every weekday their service
/// runs on.
pub fn aggregate(
    spans: &BTreeMap<String, TripSpan>,
    service_days: &HashMap<String, ActiveDays>,
) -> RouteInfo {
    let mut trips_by_day = [0u32; 7];
    let mut minutes_by_day: [Vec<f64>; 7] = Default::default();

    for span in spans.values() {
        let Some(duration) = span.duration() else {
            continue;
        };
        let Some(days) = span.service_id.as_ref().and_then(|s| service_days.get(s)) else {
            continue;
        };
        if let (Some(start), Some(end)) = (span.start, span.end) {
            if end < start {
                debug!(start = %start, end = %end, "Trip end wraps past midnight");
            }
        }
        let minutes = duration.num_seconds() as f64 / 60.0;
        for (day, _) in days.iter().enumerate().filter(|(_, active)| **active) {
            trips_by_day[day] += 1;
            minutes_by_day[day].push(minutes);
        }
    }

    RouteInfo {
        days: WEEKDAY_NAMES,
        trips_by_day,
        avg_route_time: minutes_by_day.map(|m| average(&m)),
    }
}

fn average(values: &[f64]) -> f64 {
    match values.len() {
        0 => 0.0,
        n => values.iter().sum::<f64>() / n as f64,
    }
}

/// Builds weekday statistics for `route_id` from storage.
#[tracing::instrument(skip(pool))]
pub async fn route_info(pool: &SqlitePool, route_id: &str) -> Result<RouteInfo, QueryError> {
    let rows: Vec<StopTimeRow> = sqlx::query_as(
        "SELECT t.trip_id AS trip_id, t.service_id AS service_id, \
         CAST(st.stop_sequence AS INTEGER) AS stop_sequence, \
         CAST(st.arrival_time AS TEXT) AS arrival_time, \
         CAST(st.departure_time AS TEXT) AS departure_time \
         FROM stop_times st JOIN trips t ON st.trip_id = t.trip_id \
         WHERE t.route_id = ? AND t.direction_id = ? \
         ORDER BY t.trip_id, st.stop_sequence",
    )
    .bind(route_id)
    .bind(ANALYZED_DIRECTION)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Err(QueryError::NotFound(
            "No stop times found for the given route_id".to_string(),
        ));
    }

    let spans = trip_spans(&rows);
    let services: BTreeSet<&str> = spans
        .values()
        .filter_map(|s| s.service_id.as_deref())
        .collect();
    let service_days = resolve_services(pool, services).await?;

    let info = aggregate(&spans, &service_days);
    info!(trips = spans.len(), rows = rows.len(), "Route statistics computed");
    Ok(info)
}
