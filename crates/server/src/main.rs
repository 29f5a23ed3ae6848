//! offcache server entry point.
//!
//! Loads configuration, deploys the worker version (install, then activate)
//! and serves the cache tools over the MCP stdio transport. Logging goes to
//! stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use offcache_client::{FetchClient, FetchConfig, Worker};
use offcache_core::{AppConfig, CacheStore};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    let store = CacheStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening cache store at {}", config.db_path.display()))?;
    let network = Arc::new(FetchClient::new(FetchConfig::from(&config))?);
    let worker = Worker::from_config(&config, store, network)?;

    tracing::info!(
        generation = %worker.generation(),
        origin = %config.origin,
        assets = config.precache_assets.len(),
        "Starting offcache server on stdio transport"
    );

    // A failed install is retried on the next start or via the cache_install tool;
    // until then requests pass straight through to the network.
    if let Err(e) = worker.deploy().await {
        tracing::error!(generation = %worker.generation(), error = %e, "deploy failed, serving uncontrolled");
    }

    let handler = handler::OffcacheServer::new(worker);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}
