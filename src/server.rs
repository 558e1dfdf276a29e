//! HTTP surface of the query service.

use std::path::PathBuf;

use actix_web::{App, HttpResponse, HttpServer, web};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::analytics;
use crate::error::QueryError;
use crate::queries;
use crate::storage::StorageHandle;

#[derive(Debug, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RouteParams {
    #[serde(default)]
    pub route_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReloadRequest {
    #[serde(default)]
    pub db_path: Option<String>,
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, QueryError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(QueryError::MissingParameter(name))
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

#[tracing::instrument(skip(storage))]
async fn search(
    storage: web::Data<StorageHandle>,
    body: web::Json<SearchRequest>,
) -> Result<HttpResponse, QueryError> {
    let query = body.query.as_deref().ok_or(QueryError::MissingParameter("query"))?;
    let results = queries::search(&storage.pool().await, query).await?;
    Ok(HttpResponse::Ok().json(results))
}

#[tracing::instrument(skip(storage))]
async fn stops(
    storage: web::Data<StorageHandle>,
    params: web::Query<RouteParams>,
) -> Result<HttpResponse, QueryError> {
    let route_id = required(&params.route_id, "route_id")?;
    let stops = queries::stops_for_route(&storage.pool().await, route_id).await?;
    Ok(HttpResponse::Ok().json(stops))
}

#[tracing::instrument(skip(storage))]
async fn route_info(
    storage: web::Data<StorageHandle>,
    params: web::Query<RouteParams>,
) -> Result<HttpResponse, QueryError> {
    let route_id = required(&params.route_id, "route_id")?;
    let info = analytics::route_info(&storage.pool().await, route_id).await?;
    Ok(HttpResponse::Ok().json(info))
}

#[tracing::instrument(skip(storage))]
async fn routes(storage: web::Data<StorageHandle>) -> Result<HttpResponse, QueryError> {
    let routes = queries::list_routes(&storage.pool().await).await?;
    Ok(HttpResponse::Ok().json(routes))
}

#[tracing::instrument(skip(storage))]
async fn reload(
    storage: web::Data<StorageHandle>,
    body: web::Json<ReloadRequest>,
) -> Result<HttpResponse, QueryError> {
    let db_path = body
        .db_path
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| QueryError::InvalidInput("No db_path provided".to_string()))?;
    storage.rebind(&PathBuf::from(db_path)).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Database reloaded successfully" })))
}

/// Registers every query service route.
///
/// Bodies and query strings that fail to decode answer with the same JSON
/// error shape as the handlers.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        QueryError::InvalidInput(format!("Invalid request body: {err}")).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        QueryError::InvalidInput(format!("Invalid query string: {err}")).into()
    }))
    .route("/health", web::get().to(health))
    .route("/search", web::post().to(search))
    .route("/stops", web::get().to(stops))
    .route("/route_info", web::get().to(route_info))
    .route("/routes", web::get().to(routes))
    .route("/reload", web::post().to(reload));
}

/// Serves the query service on `bind` until the process is stopped.
pub async fn run(bind: &str, storage: StorageHandle) -> std::io::Result<()> {
    let storage = web::Data::new(storage);
    info!(bind, path = %storage.path().await.display(), "Query service starting");

    HttpServer::new(move || App::new().app_data(storage.clone()).configure(configure))
        .bind(bind)?
        .run()
        .await
}
