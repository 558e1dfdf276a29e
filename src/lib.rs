pub mod analytics;
pub mod config;
pub mod control;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod loader;
pub mod output;
pub mod queries;
pub mod schema;
pub mod server;
pub mod storage;
