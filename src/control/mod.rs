//! Client side of the query service: liveness probing and remote reloads.
//!
//! The import command and the `open` flow use this to decide between asking a
//! running query service to switch databases and starting one themselves.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use std::path::Path;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Request, Url};
use serde_json::{Value, json};
use tracing::{debug, info};

#[async_trait]
pub trait QueryServiceControl: Send + Sync {
    /// Whether a query service answers its liveness endpoint.
    async fn is_alive(&self) -> bool;

    /// Asks the running query service to serve `db_path` from now on.
    async fn reload(&self, db_path: &Path) -> Result<()>;
}

/// Talks to a query service over HTTP at `base_url`.
pub struct HttpControl<C> {
    client: C,
    base_url: Url,
}

impl<C: HttpClient> HttpControl<C> {
    pub fn new(client: C, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("invalid server url {base_url}"))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }
}

#[async_trait]
impl<C: HttpClient> QueryServiceControl for HttpControl<C> {
    #[tracing::instrument(skip(self), fields(server = %self.base_url))]
    async fn is_alive(&self) -> bool {
        let url = match self.endpoint("/health") {
            Ok(url) => url,
            Err(e) => {
                debug!(error = %e, "Cannot build health url");
                return false;
            }
        };
        match self.client.execute(Request::new(Method::GET, url)).await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                debug!(status = %resp.status(), "Health check answered with failure");
                false
            }
            Err(e) => {
                debug!(error = %e, "Query service not reachable");
                false
            }
        }
    }

    #[tracing::instrument(skip(self), fields(server = %self.base_url, db_path = %db_path.display()))]
    async fn reload(&self, db_path: &Path) -> Result<()> {
        let body = serde_json::to_vec(&json!({ "db_path": db_path.to_string_lossy() }))?;

        let mut req = Request::new(Method::POST, self.endpoint("/reload")?);
        req.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *req.body_mut() = Some(body.into());

        let resp = self.client.execute(req).await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_owned))
                .unwrap_or_default();
            bail!("reload rejected with {status}: {detail}");
        }

        info!("Query service reloaded");
        Ok(())
    }
}
