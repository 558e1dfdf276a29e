//! Unpacks a GTFS archive and reads its known tables into memory.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv::{ReaderBuilder, StringRecord, Trim};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::ExtractionError;
use crate::schema::{self, ALL_TABLES};

/// The rows of one feed file, with the header line as column names.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    headers: StringRecord,
    records: Vec<StringRecord>,
}

/// Datasets keyed by table name.
pub type Datasets = HashMap<String, Dataset>;

impl Dataset {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a dataset from in-memory cells. Mostly useful in tests.
    pub fn from_rows<H, R>(headers: H, rows: R) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        R: IntoIterator,
        R::Item: IntoIterator,
        <R::Item as IntoIterator>::Item: AsRef<str>,
    {
        Self {
            headers: headers.into_iter().collect(),
            records: rows.into_iter().map(|r| r.into_iter().collect()).collect(),
        }
    }

    /// Parses CSV with a header line. Short rows are accepted; their missing
    /// cells read as empty.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = ReaderBuilder::new()
            .flexible(true)
            .trim(Trim::Headers)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();
        let mut records = Vec::new();
        for result in rdr.records() {
            records.push(result?);
        }
        Ok(Self { headers, records })
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.headers.iter()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn records(&self) -> &[StringRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Number of tables read at the same time when the caller has no preference.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(ALL_TABLES.len())
}

/// Known table files unpacked into a scratch directory. The directory is
/// removed when this is read or dropped.
pub struct UnpackedFeed {
    scratch: TempDir,
    pub files: usize,
}

impl UnpackedFeed {
    /// Copies the known table files of the archive at `zip_path` into a fresh
    /// scratch directory.
    #[tracing::instrument(skip_all, fields(zip = %zip_path.display()))]
    pub async fn unpack(zip_path: &Path) -> Result<Self, ExtractionError> {
        let scratch = tempfile::Builder::new().prefix("gtfs_").tempdir()?;

        let archive = zip_path.to_path_buf();
        let dest = scratch.path().to_path_buf();
        let files = tokio::task::spawn_blocking(move || unpack_known_files(&archive, &dest)).await??;
        info!(files, "Archive unpacked");

        Ok(Self { scratch, files })
    }

    pub async fn read(self, max_workers: usize) -> Datasets {
        let datasets = read_tables(self.scratch.path(), max_workers).await;
        if let Err(e) = self.scratch.close() {
            warn!(error = %e, "Failed to remove scratch directory");
        }
        datasets
    }
}

/// Extracts every known table from the archive at `zip_path`.
///
/// A missing or empty file yields an empty dataset. A file that fails to
/// parse is left out of the result. Only an unreadable archive is an error.
pub async fn extract_feed(zip_path: &Path, max_workers: usize) -> Result<Datasets, ExtractionError> {
    Ok(UnpackedFeed::unpack(zip_path).await?.read(max_workers).await)
}

/// Reads each known table file under `dir` on its own blocking task.
pub async fn read_tables(dir: &Path, max_workers: usize) -> Datasets {
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut tasks = vec![];

    for table in ALL_TABLES {
        let sem = semaphore.clone();
        let path = dir.join(table.source_file);
        let span = tracing::info_span!("read_table", table = table.name);

        let task = tokio::spawn(
            async move {
                let Ok(_permit) = sem.acquire().await else {
                    return (table.name, None);
                };
                let file_name = table.source_file;
                let dataset = tokio::task::spawn_blocking(move || read_table(&path, file_name))
                    .await
                    .unwrap_or_else(|e| {
                        error!(error = %e, "Table reader panicked");
                        None
                    });
                (table.name, dataset)
            }
            .instrument(span),
        );
        tasks.push(task);
    }

    let mut datasets = Datasets::new();
    for task in tasks {
        match task.await {
            Ok((name, Some(dataset))) => {
                datasets.insert(name.to_string(), dataset);
            }
            Ok((name, None)) => warn!(table = name, "Skipping table due to reading error"),
            Err(e) => error!(error = %e, "Table read task failed"),
        }
    }
    datasets
}

fn read_table(path: &Path, file_name: &str) -> Option<Dataset> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(file = file_name, "File not present in archive, using empty table");
            return Some(Dataset::empty());
        }
        Err(e) => {
            error!(file = file_name, error = %e, "Failed to open file");
            return None;
        }
    };

    match Dataset::from_reader(file) {
        Ok(dataset) if dataset.headers.is_empty() => {
            warn!(file = file_name, "File is empty, using empty table");
            Some(dataset)
        }
        Ok(dataset) => {
            info!(file = file_name, rows = dataset.len(), "Read file");
            Some(dataset)
        }
        Err(e) => {
            error!(file = file_name, error = %e, "Failed to parse file");
            None
        }
    }
}

/// Copies the root-level known table files out of the archive into `dest`.
/// Returns how many were written.
fn unpack_known_files(zip_path: &Path, dest: &Path) -> Result<usize, ExtractionError> {
    let file = File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut written = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name().map(PathBuf::from) else {
            warn!(entry = entry.name(), "Ignoring archive entry with unsafe path");
            continue;
        };
        let known = name.components().count() == 1
            && name
                .to_str()
                .and_then(schema::table_for_file)
                .is_some();
        if !known {
            debug!(entry = %name.display(), "Ignoring unrecognized archive entry");
            continue;
        }

        let mut out = File::create(dest.join(&name))?;
        io::copy(&mut entry, &mut out)?;
        written += 1;
    }

    Ok(written)
}
