//! StatusTrail - Synthetic Monitoring Service
//!
//! Probes HTTP, DNS and version endpoints, evaluates their conditions and
//! keeps day-by-day availability history.

mod condition;
mod config;
mod db;
mod endpoint;
mod probe;
mod report;
mod scheduler;
mod web;

use config::{MonitorConfig, ServerConfig};
use db::Store;
use probe::Prober;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("statustrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting StatusTrail on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    let monitor = MonitorConfig::load(&cfg.config_path).map_err(|e| {
        tracing::error!("Invalid configuration in {}: {}", cfg.config_path, e);
        e
    })?;
    tracing::info!(
        "Loaded {} endpoints ({} enabled), keeping {} days",
        monitor.endpoints.len(),
        monitor.enabled().count(),
        monitor.max_days
    );

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let prober = Arc::new(Prober::default());
    let mut scheduler = Scheduler::new(store.clone(), prober, monitor);
    if let Some(path) = &cfg.report_path {
        scheduler = scheduler.with_report_path(path);
    }
    let scheduler = Arc::new(scheduler);

    if let Some(every) = cfg.check_interval {
        tracing::info!("Running a sweep every {:?}", every);
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                scheduler.run_sweep().await;
            }
        });
    }

    #[cfg(unix)]
    {
        let scheduler = scheduler.clone();
        let config_path = cfg.config_path.clone();
        let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                match MonitorConfig::load(&config_path) {
                    Ok(monitor) => scheduler.apply_config(monitor).await,
                    Err(e) => tracing::error!("Keeping current endpoints, reload of {} failed: {}", config_path, e),
                }
            }
        });
    }

    // Start web server
    let server = Server::new(cfg, store, scheduler);
    server.start().await?;

    Ok(())
}
