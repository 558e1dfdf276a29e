//! Writes extracted datasets into storage.
//!
//! Only columns declared in the schema registry are written. The whole import
//! runs in one transaction: a failed batch on any table rolls back every
//! table written before it.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use tracing::{debug, error, info, warn};

use crate::error::LoadError;
use crate::extract::{Dataset, Datasets};
use crate::schema::{ALL_TABLES, Column, ColumnType, TableSchema, get_table};

pub const DEFAULT_BATCH_SIZE: usize = 50_000;

// SQLITE_MAX_VARIABLE_NUMBER for SQLite >= 3.32.
const MAX_BIND_PARAMS: usize = 32_766;

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Upper bound on rows per insert statement.
    pub batch_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Outcome of a successful load.
#[derive(Debug, Default, Serialize)]
pub struct LoadReport {
    /// Rows written per table.
    pub rows: BTreeMap<String, usize>,
    /// Datasets that had no table in the registry.
    pub skipped: Vec<String>,
}

impl LoadReport {
    pub fn total_rows(&self) -> usize {
        self.rows.values().sum()
    }
}

enum Cell<'a> {
    Null,
    Integer(i64),
    Text(&'a str),
}

/// Loads every dataset that has a table in the registry.
#[tracing::instrument(skip_all, fields(datasets = datasets.len(), batch_size = options.batch_size))]
pub async fn load_datasets(
    pool: &SqlitePool,
    datasets: &Datasets,
    options: &LoadOptions,
) -> Result<LoadReport, LoadError> {
    let mut report = LoadReport::default();

    for name in datasets.keys() {
        if get_table(name).is_none() {
            warn!(table = %name, "Table not found in schema registry, skipping");
            report.skipped.push(name.clone());
        }
    }
    report.skipped.sort();

    let mut tx = pool.begin().await?;

    for table in ALL_TABLES {
        let Some(dataset) = datasets.get(table.name) else {
            continue;
        };
        match insert_table(&mut tx, table, dataset, options.batch_size).await {
            Ok(rows) => {
                info!(table = table.name, rows, "Inserted rows");
                report.rows.insert(table.name.to_string(), rows);
            }
            Err(e) => {
                error!(table = table.name, error = %e, "Error inserting data, rolling back import");
                if let Err(rollback) = tx.rollback().await {
                    error!(error = %rollback, "Rollback failed");
                }
                return Err(LoadError::Write {
                    table: table.name.to_string(),
                    source: e,
                });
            }
        }
    }

    tx.commit().await?;
    Ok(report)
}

async fn insert_table(
    tx: &mut Transaction<'_, Sqlite>,
    table: &TableSchema,
    dataset: &Dataset,
    batch_size: usize,
) -> Result<usize, sqlx::Error> {
    let columns: Vec<(&Column, usize)> = table
        .columns
        .iter()
        .filter_map(|c| dataset.column_index(c.name).map(|idx| (c, idx)))
        .collect();

    let dropped: Vec<&str> = dataset
        .headers()
        .filter(|h| table.column(h).is_none())
        .collect();
    if !dropped.is_empty() {
        debug!(table = table.name, ?dropped, "Dropping undeclared columns");
    }

    if columns.is_empty() {
        if !dataset.is_empty() {
            warn!(
                table = table.name,
                rows = dataset.len(),
                "No declared columns in dataset, nothing written"
            );
        }
        return Ok(0);
    }

    let column_list = columns
        .iter()
        .map(|(c, _)| format!("\"{}\"", c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let rows_per_statement = batch_size.clamp(1, (MAX_BIND_PARAMS / columns.len()).max(1));

    let mut written = 0;
    for chunk in dataset.records().chunks(rows_per_statement) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("INSERT INTO \"{}\" ({column_list}) ", table.name));
        builder.push_values(chunk, |mut row, record| {
            for (column, idx) in &columns {
                match coerce(record.get(*idx), column.kind) {
                    Cell::Null => row.push_bind(None::<String>),
                    Cell::Integer(value) => row.push_bind(value),
                    Cell::Text(value) => row.push_bind(value.to_owned()),
                };
            }
        });
        builder.build().execute(&mut **tx).await?;
        written += chunk.len();
        debug!(table = table.name, written, "Batch written");
    }

    Ok(written)
}

fn coerce(raw: Option<&str>, kind: ColumnType) -> Cell<'_> {
    let Some(value) = raw.filter(|v| !v.trim().is_empty()) else {
        return Cell::Null;
    };
    match kind {
        ColumnType::Text => Cell::Text(value),
        ColumnType::Integer => match parse_integer(value.trim()) {
            Some(n) => Cell::Integer(n),
            None => Cell::Text(value),
        },
    }
}

/// Accepts integral decimals such as `1.0`, which spreadsheet exports produce.
fn parse_integer(value: &str) -> Option<i64> {
    if let Ok(n) = value.parse::<i64>() {
        return Some(n);
    }
    let f: f64 = value.parse().ok()?;
    (f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15).then_some(f as i64)
}
