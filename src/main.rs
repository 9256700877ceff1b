// src/main.rs

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use std::{env, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod interval;
mod overtime;
mod overtime_tests;
mod retrieval;
mod rowstore;
mod server;

use overtime::ValuationRates;
use retrieval::OvertimeQueryService;
use rowstore::{RowStoreClient, RowStoreConfig};
use server::{build_router, AppError, AppState};

#[derive(Parser, Debug)]
#[command(
    name = "frigops-core",
    about = "Overtime aggregation and valuation backend for the plant operations dashboard"
)]
struct Cli {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Env file to load before reading configuration (defaults to ./.env)
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenv::from_path(path).with_context(|| format!("Loading env file {:?}", path))?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Setting tracing subscriber failed")?;
    info!("Tracing subscriber initialized.");

    let store_config =
        RowStoreConfig::from_env().context("Loading row store configuration (STORE_*)")?;
    let rates = ValuationRates::from_env().context("Loading valuation rates (VALUATION_*)")?;
    info!("Configuration loaded.");

    let client = Arc::new(RowStoreClient::new(store_config.clone())?);
    let query_service = Arc::new(OvertimeQueryService::new(
        client,
        store_config.page_size,
        store_config.max_rows,
    ));
    let state = AppState::new(
        query_service,
        rates,
        Duration::from_secs(store_config.directory_ttl_secs),
    );
    let app = build_router(state);
    info!("Application state initialized.");

    match load_tls_config().await? {
        Some(tls_config) => {
            info!("Starting server on https://{}", cli.bind);
            axum_server::bind_rustls(cli.bind, tls_config)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server failed")?;
        }
        None => {
            info!("Starting server on http://{}", cli.bind);
            axum_server::bind(cli.bind)
                .serve(app.into_make_service())
                .await
                .context("HTTP server failed")?;
        }
    }

    Ok(())
}

/// TLS is opt-in: set both TLS_CERT_PATH and TLS_KEY_PATH to serve HTTPS,
/// leave them unset for plain TCP behind a terminating proxy.
async fn load_tls_config() -> Result<Option<RustlsConfig>, AppError> {
    let cert_path = env::var("TLS_CERT_PATH").ok();
    let key_path = env::var("TLS_KEY_PATH").ok();
    match (cert_path, key_path) {
        (Some(cert), Some(key)) => {
            let config = RustlsConfig::from_pem_file(&cert, &key)
                .await
                .map_err(|e| AppError::TlsConfig(format!("Failed to load TLS cert/key: {}", e)))?;
            Ok(Some(config))
        }
        (None, None) => Ok(None),
        _ => Err(AppError::TlsConfig(
            "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
        )),
    }
}
