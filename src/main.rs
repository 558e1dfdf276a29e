//! CLI entry point for the GTFS traffic tool.
//!
//! Provides subcommands for importing a GTFS archive into SQLite, serving the
//! query API, switching a running server to another database, and computing
//! route statistics offline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gtfs_traffic::{
    analytics::route_info,
    config::Settings,
    control::{BasicClient, HttpControl, QueryServiceControl},
    ingest::{LogProgress, import_feed},
    output::{append_route_info, to_pretty_json},
    server,
    storage::{StorageHandle, open_pool},
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_traffic")]
#[command(about = "Import GTFS feeds into SQLite and query their schedules", long_about = None)]
struct Cli {
    /// JSON settings file
    #[arg(long, global = true, env = "GTFS_TRAFFIC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a GTFS zip archive into a new SQLite database
    Import {
        /// Path to the GTFS zip archive
        #[arg(value_name = "ZIP")]
        zip: PathBuf,

        /// Database file to create (replaced if it exists)
        #[arg(long)]
        db: PathBuf,

        /// Maximum rows per insert statement
        #[arg(long)]
        batch_size: Option<usize>,

        /// Ask a running query service to switch to the new database
        #[arg(long, default_value_t = false)]
        notify: bool,
    },
    /// Serve the query API over a database
    Serve {
        /// Database file to serve
        #[arg(long, env = "GTFS_TRAFFIC_DB")]
        db: PathBuf,

        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
    },
    /// Switch a running query service to a database, or serve it if none is running
    Open {
        #[arg(value_name = "DB")]
        db: PathBuf,

        /// Address to listen on when no service is running
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print weekday trip counts and average durations for a route
    RouteInfo {
        #[arg(value_name = "DB")]
        db: PathBuf,

        #[arg(value_name = "ROUTE_ID")]
        route_id: String,

        /// CSV file to append results to instead of printing JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _file_guard = init_tracing()?;

    let cli = Cli::parse();
    let settings = Settings::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Import {
            zip,
            db,
            batch_size,
            notify,
        } => {
            let mut options = settings.import_options();
            if let Some(batch_size) = batch_size {
                options.load.batch_size = batch_size.max(1);
            }

            let report = import_feed(&zip, &db, &options, &LogProgress).await?;
            for (table, rows) in &report.load.rows {
                info!(table = %table, rows, "Imported table");
            }

            if notify {
                let control = control(&settings)?;
                if control.is_alive().await {
                    control.reload(&db).await?;
                } else {
                    info!(server = %settings.server_url, "No query service running, nothing notified");
                }
            }
        }
        Commands::Serve { db, bind } => {
            let bind = bind.unwrap_or_else(|| settings.bind_addr.clone());
            serve(&db, &bind, &settings).await?;
        }
        Commands::Open { db, bind } => {
            let control = control(&settings)?;
            if control.is_alive().await {
                control.reload(&db).await?;
                info!(db = %db.display(), "Running query service switched database");
            } else {
                let bind = bind.unwrap_or_else(|| settings.bind_addr.clone());
                warn!(server = %settings.server_url, "No query service answered, starting one");
                serve(&db, &bind, &settings).await?;
            }
        }
        Commands::RouteInfo {
            db,
            route_id,
            output,
        } => {
            if !db.is_file() {
                anyhow::bail!("database file {} does not exist", db.display());
            }
            let pool = open_pool(&db, &settings.storage_options(), false).await?;
            let info = route_info(&pool, &route_id).await;
            pool.close().await;
            let info = info?;

            match output {
                Some(path) => {
                    append_route_info(&path, &route_id, &info)?;
                    info!(path = %path.display(), "Route statistics appended");
                }
                None => println!("{}", to_pretty_json(&info)?),
            }
        }
    }

    Ok(())
}

/// Logging setup: colored stderr + JSON rolling log file.
fn init_tracing() -> Result<WorkerGuard> {
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gtfs_traffic.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_traffic.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    Ok(file_guard)
}

fn control(settings: &Settings) -> Result<HttpControl<BasicClient>> {
    let client = BasicClient::with_timeout(settings.request_timeout())?;
    HttpControl::new(client, &settings.server_url)
}

#[tracing::instrument(skip(settings), fields(db = %db.display()))]
async fn serve(db: &Path, bind: &str, settings: &Settings) -> Result<()> {
    let storage = StorageHandle::open(db, settings.storage_options())
        .await
        .with_context(|| format!("cannot serve {}", db.display()))?;
    server::run(bind, storage).await?;
    Ok(())
}
