//! Markovflow -- Markov-chain equilibrium anomaly detection for marketplace
//! event streams.
//!
//! This crate provides the core library for event ingestion, state
//! derivation, sparse transition matrices, stationary equilibrium solving,
//! perturbation analysis, and alerting.

pub mod alert;
pub mod api;
pub mod chain;
pub mod config;
pub mod ingest;
pub mod perturb;
pub mod pipeline;
pub mod scheduler;
pub mod simulate;
pub mod state;
pub mod storage;

use anyhow::Result;
use config::Config;

/// Start the markovflow daemon: API server and analysis scheduler.
pub async fn serve(config: Config, bind_override: Option<&str>) -> Result<()> {
    let db_path = config.storage.db_path.clone();
    tracing::info!(%db_path, "Initializing database");
    let pool = storage::open_pool(&db_path)?;

    let scheduler = scheduler::Scheduler::new(pool.clone());

    // Scheduler engine (background task)
    let scheduler_engine = scheduler.clone();
    let scheduler_config = config.clone();
    tokio::spawn(async move {
        scheduler::run_scheduler_loop(scheduler_engine, scheduler_config).await;
    });

    let bind = bind_override.unwrap_or(&config.api.bind).to_string();
    let addr: std::net::SocketAddr = bind.parse()?;
    let app = api::router(api::state::AppState {
        pool,
        config,
        scheduler,
    });

    tracing::info!(%addr, "markovflow listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
