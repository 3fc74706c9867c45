mod api;
mod config;
mod coordinator;
mod error;
mod provider;
mod scan;
mod scorer;
mod state;
mod types;

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::ProviderLatency;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::error::Result;
use crate::provider::{PolymarketProvider, SnapshotProvider};
use crate::scan::Scanner;
use crate::state::ReportStore;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    info!(
        clob = %cfg.clob_api_url,
        max_markets = cfg.max_markets,
        book_workers = cfg.book_workers,
        history_workers = cfg.history_workers,
        "Starting LP reward scanner (book_workers={}, history_workers={}, run_timeout={:?}, interval={:?})",
        cfg.book_workers,
        cfg.history_workers,
        cfg.run_timeout,
        cfg.scan_interval,
    );

    let latency = Arc::new(ProviderLatency::new());
    let provider: Arc<dyn SnapshotProvider> =
        Arc::new(PolymarketProvider::new(&cfg, Arc::clone(&latency))?);
    let store = ReportStore::new();
    let health = Arc::new(HealthState::new());

    let scanner = Scanner::from_config(&cfg, provider, Arc::clone(&store), Arc::clone(&health));

    if cfg.scan_interval.is_zero() {
        // Single run: a failed listing is fatal, the result is served until shutdown.
        scanner.run_once(1).await?;
    } else {
        let every = cfg.scan_interval;
        tokio::spawn(async move { scanner.run(every).await });
    }

    // HTTP API server
    let api_state = ApiState { store, health, latency };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
