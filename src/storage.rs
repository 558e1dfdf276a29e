//! SQLite storage: pool construction and the rebindable handle the query
//! service reads through.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{IngestError, QueryError};
use crate::schema;

#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub max_connections: u32,
    /// How long a request waits for a pooled connection.
    pub acquire_timeout: Duration,
    /// How long a statement waits on a locked database file.
    pub busy_timeout: Duration,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            max_connections: 8,
            acquire_timeout: Duration::from_secs(10),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

pub async fn open_pool(
    path: &Path,
    options: &StorageOptions,
    create: bool,
) -> Result<SqlitePool, sqlx::Error> {
    let connect = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(options.busy_timeout);

    SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .acquire_timeout(options.acquire_timeout)
        .connect_with(connect)
        .await
}

/// Creates a new database at `path` with every registry table, replacing
/// whatever file was there before.
pub async fn create_fresh(path: &Path, options: &StorageOptions) -> Result<SqlitePool, IngestError> {
    remove_database(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let pool = open_pool(path, options, true).await?;
    schema::create_tables(&pool).await?;
    Ok(pool)
}

const SIDE_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// Deletes the database at `path` and its side files, if any exist.
pub fn remove_database(path: &Path) -> io::Result<()> {
    let files = std::iter::once(path.to_path_buf())
        .chain(SIDE_SUFFIXES.iter().map(|s| side_file(path, s)));
    for stale in files {
        match std::fs::remove_file(&stale) {
            Ok(()) => info!(path = %stale.display(), "Removed existing database file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Moves a fully written database from `staging` to `target`, replacing
/// whatever was at `target`. The pool on `staging` must be closed.
pub fn replace_database(staging: &Path, target: &Path) -> io::Result<()> {
    for suffix in SIDE_SUFFIXES {
        match std::fs::remove_file(side_file(target, suffix)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
    }
    for suffix in SIDE_SUFFIXES {
        let leftover = side_file(staging, suffix);
        if leftover.exists() {
            std::fs::rename(&leftover, side_file(target, suffix))?;
        }
    }
    std::fs::rename(staging, target)?;
    info!(path = %target.display(), "Database replaced");
    Ok(())
}

/// Where an import writes before it replaces the database at `path`.
pub fn staging_path(path: &Path) -> PathBuf {
    side_file(path, ".importing")
}

fn side_file(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

struct Binding {
    path: PathBuf,
    pool: SqlitePool,
}

/// The storage the query service currently reads from.
///
/// Requests clone the current pool out of the handle. [`StorageHandle::rebind`]
/// swaps in a new one; requests already holding the old pool finish against it.
pub struct StorageHandle {
    current: RwLock<Binding>,
    options: StorageOptions,
}

impl StorageHandle {
    pub async fn open(path: &Path, options: StorageOptions) -> Result<Self, QueryError> {
        let pool = prepare(path, &options).await?;
        info!(path = %path.display(), "Storage bound");
        Ok(Self {
            current: RwLock::new(Binding {
                path: path.to_path_buf(),
                pool,
            }),
            options,
        })
    }

    pub fn from_pool(path: impl Into<PathBuf>, pool: SqlitePool, options: StorageOptions) -> Self {
        Self {
            current: RwLock::new(Binding {
                path: path.into(),
                pool,
            }),
            options,
        }
    }

    pub async fn pool(&self) -> SqlitePool {
        self.current.read().await.pool.clone()
    }

    pub async fn path(&self) -> PathBuf {
        self.current.read().await.path.clone()
    }

    /// Points the handle at another database file.
    ///
    /// The new pool is opened before the swap, so a failed rebind leaves the
    /// current binding untouched.
    #[tracing::instrument(skip(self), fields(path = %path.display()))]
    pub async fn rebind(&self, path: &Path) -> Result<(), QueryError> {
        let pool = prepare(path, &self.options).await?;
        let previous = {
            let mut current = self.current.write().await;
            std::mem::replace(
                &mut *current,
                Binding {
                    path: path.to_path_buf(),
                    pool,
                },
            )
        };
        info!(previous = %previous.path.display(), "Storage rebound");

        tokio::spawn(async move {
            previous.pool.close().await;
            debug!(path = %previous.path.display(), "Previous pool closed");
        });
        Ok(())
    }
}

async fn prepare(path: &Path, options: &StorageOptions) -> Result<SqlitePool, QueryError> {
    if !path.is_file() {
        return Err(QueryError::InvalidInput(format!(
            "Database file {} does not exist",
            path.display()
        )));
    }
    let pool = open_pool(path, options, false).await?;
    schema::create_tables(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::SqlitePool;
    use sqlx::sqlite::SqlitePoolOptions;

    /// A single-connection in-memory database with every registry table.
    pub async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::schema::create_tables(&pool).await.unwrap();
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn file_with_route(dir: &Path, name: &str, route_id: &str) -> PathBuf {
        let path = dir.join(name);
        let pool = create_fresh(&path, &StorageOptions::default()).await.unwrap();
        sqlx::query("INSERT INTO routes (route_id) VALUES (?)")
            .bind(route_id)
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
        path
    }

    async fn route_ids(handle: &StorageHandle) -> Vec<String> {
        sqlx::query_scalar("SELECT route_id FROM routes")
            .fetch_all(&handle.pool().await)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_fresh_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = file_with_route(dir.path(), "feed.db", "R1").await;

        let pool = create_fresh(&path, &StorageOptions::default()).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM routes")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_replace_database_moves_staging_over_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = file_with_route(dir.path(), "feed.db", "OLD").await;
        let staging = staging_path(&target);
        let pool = create_fresh(&staging, &StorageOptions::default()).await.unwrap();
        sqlx::query("INSERT INTO routes (route_id) VALUES ('NEW')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        replace_database(&staging, &target).unwrap();

        assert!(!staging.exists());
        let handle = StorageHandle::open(&target, StorageOptions::default()).await.unwrap();
        assert_eq!(route_ids(&handle).await, vec!["NEW"]);
    }

    #[tokio::test]
    async fn test_open_missing_file_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let result = StorageHandle::open(&dir.path().join("nope.db"), StorageOptions::default()).await;
        assert!(matches!(result, Err(QueryError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_rebind_switches_new_requests() {
        let dir = tempfile::tempdir().unwrap();
        let first = file_with_route(dir.path(), "first.db", "OLD").await;
        let second = file_with_route(dir.path(), "second.db", "NEW").await;

        let handle = StorageHandle::open(&first, StorageOptions::default()).await.unwrap();
        assert_eq!(route_ids(&handle).await, vec!["OLD"]);

        handle.rebind(&second).await.unwrap();
        assert_eq!(route_ids(&handle).await, vec!["NEW"]);
        assert_eq!(handle.path().await, second);
    }

    #[tokio::test]
    async fn test_failed_rebind_keeps_current_binding() {
        let dir = tempfile::tempdir().unwrap();
        let first = file_with_route(dir.path(), "first.db", "OLD").await;
        let handle = StorageHandle::open(&first, StorageOptions::default()).await.unwrap();

        let result = handle.rebind(&dir.path().join("missing.db")).await;

        assert!(result.is_err());
        assert_eq!(route_ids(&handle).await, vec!["OLD"]);
    }
}
