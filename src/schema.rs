//! Fixed target schema for the GTFS tables this crate imports.
//!
//! Every table the loader writes and every column it keeps is declared here.
//! Columns present in a feed but absent from this registry are dropped at
//! import time, so adding a table or a column is a change to this file only.

use sqlx::{Executor, Sqlite};
use tracing::debug;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnType,
}

impl Column {
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnType::Text,
        }
    }

    pub const fn integer(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnType::Integer,
        }
    }
}

#[derive(Debug)]
pub struct TableSchema {
    pub name: &'static str,
    pub source_file: &'static str,
    pub columns: &'static [Column],
    pub primary_key: &'static [&'static str],
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this table.
    pub fn create_statement(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("\"{}\" {}", c.name, c.kind.sql()))
            .collect();
        if !self.primary_key.is_empty() {
            let keys: Vec<String> = self.primary_key.iter().map(|k| format!("\"{k}\"")).collect();
            parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
            self.name,
            parts.join(", ")
        )
    }
}

pub static AGENCY: TableSchema = TableSchema {
    name: "agency",
    source_file: "agency.txt",
    columns: &[
        Column::text("agency_id"),
        Column::text("agency_name"),
        Column::text("agency_url"),
        Column::text("agency_timezone"),
        Column::text("agency_lang"),
        Column::text("agency_phone"),
        Column::text("agency_email"),
        Column::text("agency_fare_url"),
    ],
    primary_key: &["agency_id"],
};

// stop_lat/stop_lon are kept as text so coordinates round-trip exactly.
pub static STOPS: TableSchema = TableSchema {
    name: "stops",
    source_file: "stops.txt",
    columns: &[
        Column::text("stop_id"),
        Column::text("stop_code"),
        Column::text("stop_name"),
        Column::text("tts_stop_name"),
        Column::text("stop_desc"),
        Column::text("stop_lat"),
        Column::text("stop_lon"),
        Column::text("zone_id"),
        Column::text("stop_url"),
        Column::integer("wheelchair_boarding"),
        Column::text("stop_timezone"),
        Column::integer("location_type"),
        Column::integer("level_id"),
        Column::text("platform_code"),
        Column::text("parent_station"),
    ],
    primary_key: &["stop_id"],
};

pub static ROUTES: TableSchema = TableSchema {
    name: "routes",
    source_file: "routes.txt",
    columns: &[
        Column::text("route_id"),
        Column::text("agency_id"),
        Column::text("route_short_name"),
        Column::text("route_long_name"),
        Column::text("route_desc"),
        Column::integer("route_type"),
        Column::text("route_url"),
        Column::text("route_color"),
        Column::text("route_text_color"),
    ],
    primary_key: &["route_id"],
};

pub static TRIPS: TableSchema = TableSchema {
    name: "trips",
    source_file: "trips.txt",
    columns: &[
        Column::text("route_id"),
        Column::text("service_id"),
        Column::text("trip_id"),
        Column::text("trip_headsign"),
        Column::text("trip_short_name"),
        Column::integer("direction_id"),
        Column::text("block_id"),
        Column::text("shape_id"),
        Column::integer("wheelchair_accessible"),
        Column::integer("exceptional"),
    ],
    primary_key: &["trip_id"],
};

pub static STOP_TIMES: TableSchema = TableSchema {
    name: "stop_times",
    source_file: "stop_times.txt",
    columns: &[
        Column::text("trip_id"),
        Column::text("arrival_time"),
        Column::text("departure_time"),
        Column::text("stop_id"),
        Column::integer("stop_sequence"),
        Column::text("stop_headsign"),
        Column::integer("pickup_type"),
        Column::integer("drop_off_type"),
        Column::text("shape_dist_traveled"),
        Column::integer("timepoint"),
    ],
    primary_key: &["trip_id", "stop_sequence"],
};

pub static CALENDAR: TableSchema = TableSchema {
    name: "calendar",
    source_file: "calendar.txt",
    columns: &[
        Column::text("service_id"),
        Column::integer("monday"),
        Column::integer("tuesday"),
        Column::integer("wednesday"),
        Column::integer("thursday"),
        Column::integer("friday"),
        Column::integer("saturday"),
        Column::integer("sunday"),
        Column::text("start_date"),
        Column::text("end_date"),
    ],
    primary_key: &["service_id"],
};

pub static CALENDAR_DATES: TableSchema = TableSchema {
    name: "calendar_dates",
    source_file: "calendar_dates.txt",
    columns: &[
        Column::text("service_id"),
        Column::integer("date"),
        Column::integer("exception_type"),
    ],
    primary_key: &["service_id", "date"],
};

/// All tables, in the order they are loaded.
pub static ALL_TABLES: &[&TableSchema] = &[
    &AGENCY,
    &STOPS,
    &ROUTES,
    &TRIPS,
    &STOP_TIMES,
    &CALENDAR,
    &CALENDAR_DATES,
];

pub fn get_table(name: &str) -> Option<&'static TableSchema> {
    ALL_TABLES.iter().find(|t| t.name == name).copied()
}

/// Looks a table up by its feed file name, e.g. `stops.txt`.
pub fn table_for_file(file_name: &str) -> Option<&'static TableSchema> {
    ALL_TABLES
        .iter()
        .find(|t| t.source_file == file_name)
        .copied()
}

/// Applies the registry to storage. Tables that already exist are left alone.
pub async fn create_tables<'e, E>(executor: E) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite> + Copy,
{
    for table in ALL_TABLES {
        debug!(table = table.name, "Creating table if missing");
        sqlx::query(&table.create_statement())
            .execute(executor)
            .await?;
    }
    Ok(())
}
