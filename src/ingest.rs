//! Archive-to-database import with coarse progress reporting.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::IngestError;
use crate::extract::{Datasets, UnpackedFeed, default_workers};
use crate::loader::{LoadOptions, LoadReport, load_datasets};
use crate::storage::{StorageOptions, create_fresh, remove_database, replace_database, staging_path};

/// Import milestones as seen by a progress observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Unpacked,
    Read,
    Loaded,
    Failed,
}

impl Progress {
    /// Percentage complete, or -1 when the import failed.
    pub fn code(self) -> i32 {
        match self {
            Progress::Unpacked => 25,
            Progress::Read => 75,
            Progress::Loaded => 100,
            Progress::Failed => -1,
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, progress: Progress) {
        self(progress)
    }
}

/// Writes progress to the log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, progress: Progress) {
        info!(progress = progress.code(), "Import progress");
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub storage: StorageOptions,
    pub load: LoadOptions,
    /// Tables read at the same time.
    pub max_workers: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            storage: StorageOptions::default(),
            load: LoadOptions::default(),
            max_workers: default_workers(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ImportReport {
    pub db_path: PathBuf,
    pub files_unpacked: usize,
    pub load: LoadReport,
    pub elapsed_ms: u128,
}

/// Imports the archive at `zip_path` into a new database at `db_path`.
///
/// The database is built next to `db_path` and moved over any existing one
/// only after every table has loaded, so a failed import leaves the previous
/// database in place. On failure the sink receives [`Progress::Failed`].
#[tracing::instrument(skip(options, progress), fields(zip = %zip_path.display(), db = %db_path.display()))]
pub async fn import_feed(
    zip_path: &Path,
    db_path: &Path,
    options: &ImportOptions,
    progress: &dyn ProgressSink,
) -> Result<ImportReport, IngestError> {
    let result = run_import(zip_path, db_path, options, progress).await;
    if let Err(e) = &result {
        error!(error = %e, "Import failed");
        progress.report(Progress::Failed);
    }
    result
}

async fn run_import(
    zip_path: &Path,
    db_path: &Path,
    options: &ImportOptions,
    progress: &dyn ProgressSink,
) -> Result<ImportReport, IngestError> {
    let started = Instant::now();

    let unpacked = UnpackedFeed::unpack(zip_path).await?;
    let files_unpacked = unpacked.files;
    progress.report(Progress::Unpacked);

    let datasets = unpacked.read(options.max_workers).await;
    progress.report(Progress::Read);

    let staging = staging_path(db_path);
    let load = match load_and_replace(&staging, db_path, &datasets, options).await {
        Ok(load) => load,
        Err(e) => {
            if let Err(cleanup) = remove_database(&staging) {
                warn!(path = %staging.display(), error = %cleanup, "Could not remove staging database");
            }
            return Err(e);
        }
    };
    progress.report(Progress::Loaded);

    let report = ImportReport {
        db_path: db_path.to_path_buf(),
        files_unpacked,
        elapsed_ms: started.elapsed().as_millis(),
        load,
    };
    info!(
        rows = report.load.total_rows(),
        skipped = report.load.skipped.len(),
        elapsed_ms = report.elapsed_ms,
        "Import complete"
    );
    Ok(report)
}

async fn load_and_replace(
    staging: &Path,
    db_path: &Path,
    datasets: &Datasets,
    options: &ImportOptions,
) -> Result<LoadReport, IngestError> {
    let pool = create_fresh(staging, &options.storage).await?;
    let load = load_datasets(&pool, datasets, &options.load).await;
    pool.close().await;
    let load = load?;
    replace_database(staging, db_path)?;
    Ok(load)
}
