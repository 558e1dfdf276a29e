//! Output formatting and persistence for route statistics.
//!
//! Supports pretty JSON and CSV append.

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::analytics::RouteInfo;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// One weekday of a route's statistics, as written to CSV.
#[derive(Debug, Serialize)]
pub struct WeekdayRecord<'a> {
    pub route_id: &'a str,
    pub day: &'a str,
    pub trips: u32,
    pub avg_route_time_min: f64,
}

pub fn weekday_records<'a>(route_id: &'a str, info: &'a RouteInfo) -> Vec<WeekdayRecord<'a>> {
    (0..7)
        .map(|i| WeekdayRecord {
            route_id,
            day: info.days[i],
            trips: info.trips_by_day[i],
            avg_route_time_min: info.avg_route_time[i],
        })
        .collect()
}

/// Renders route statistics as pretty-printed JSON.
pub fn to_pretty_json(info: &RouteInfo) -> Result<String> {
    Ok(serde_json::to_string_pretty(info)?)
}

/// Appends one row per weekday of `info` to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_route_info(path: &Path, route_id: &str, info: &RouteInfo) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending route statistics");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    for record in weekday_records(route_id, info) {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}
