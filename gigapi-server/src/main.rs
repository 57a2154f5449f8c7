//! gigapi HTTP server: accepts NDJSON/line-protocol writes, routes them into
//! the registry, and exposes the admin/health surface (§6). The core ingest
//! pipeline (`gigapi-lake`/`gigapi-store`/`gigapi-index`) has no notion of
//! HTTP; this binary is the thin wire-format/registry glue around it,
//! following `telemetry-ingestion-srv`'s `main.rs` shape.

mod error;
mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gigapi_config::{Cli, Config};
use gigapi_lake::{Registry, RegistryConfig};
use routes::AppState;
use tokio::sync::oneshot;

fn registry_config(config: &Config) -> RegistryConfig {
    RegistryConfig {
        root: config.root.clone(),
        merge_timeout_s: config.merge_timeout_s,
        save_timeout_s: config.save_timeout_s,
        no_merges: config.no_merges,
        allow_save_to_hd: config.allow_save_to_hd,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Cli::parse();
    let config = Config::load(args.config.as_deref()).context("loading configuration")?;
    let listen_endpoint = args.listen_endpoint.clone().unwrap_or_else(|| config.listen_endpoint());

    let registry = Registry::new(registry_config(&config));
    let (stop_tx, stop_rx) = oneshot::channel();
    let merge_registry = Arc::clone(&registry);
    tokio::spawn(async move { merge_registry.run(stop_rx).await });

    let app = routes::router(AppState { registry: Arc::clone(&registry) });
    let listener = tokio::net::TcpListener::bind(&listen_endpoint)
        .await
        .with_context(|| format!("binding {listen_endpoint}"))?;
    log::info!("gigapi-server listening on {listen_endpoint}");
    axum::serve(listener, app).await.context("serving http")?;

    let _ = stop_tx.send(());
    Ok(())
}
