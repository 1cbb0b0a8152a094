//! Scheduler module for running sweeps and aggregating their outcomes.

pub mod retention;
pub mod rollup;

use crate::config::MonitorConfig;
use crate::db::{DbError, EndpointSummary, Status, Store};
use crate::probe::Prober;
use crate::report::{self, EndpointReport};

use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Pause before each probe so a sweep never bursts outbound connections.
pub const PROBE_PACING: Duration = Duration::from_millis(777);

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub checked: usize,
    pub succeeded: usize,
    /// Checks whose outcome could not be stored.
    pub storage_errors: usize,
}

/// Runs sweeps over the enabled endpoints and folds outcomes into the store.
pub struct Scheduler {
    store: Arc<Store>,
    prober: Arc<Prober>,
    config: RwLock<Arc<MonitorConfig>>,
    sweep: Mutex<()>,
    pacing: Duration,
    report_path: Option<PathBuf>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, prober: Arc<Prober>, config: MonitorConfig) -> Self {
        Self {
            store,
            prober,
            config: RwLock::new(Arc::new(config)),
            sweep: Mutex::new(()),
            pacing: PROBE_PACING,
            report_path: None,
        }
    }

    /// Override the pause before each probe.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Write dashboard data to `path` after every sweep.
    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    /// The active configuration.
    pub async fn config(&self) -> Arc<MonitorConfig> {
        self.config.read().await.clone()
    }

    /// Swap the active endpoint set.
    ///
    /// Endpoints that leave the enabled set have their connection pools drained.
    pub async fn apply_config(&self, config: MonitorConfig) {
        let next: HashSet<String> = config.enabled().map(|e| e.key.clone()).collect();
        let previous = self.config().await;

        for endpoint in previous.enabled() {
            if !next.contains(&endpoint.key) && self.prober.close(&endpoint.key).await {
                tracing::info!("Scheduler: Closed connections of {}", endpoint.name);
            }
        }

        tracing::info!(
            "Scheduler: Applied configuration with {} enabled endpoints",
            next.len()
        );
        *self.config.write().await = Arc::new(config);
    }

    /// Probe every enabled endpoint once, in order, and record the outcomes.
    ///
    /// Sweeps never overlap; a sweep requested while one runs waits for it.
    pub async fn run_sweep(&self) -> SweepSummary {
        let _running = self.sweep.lock().await;
        let config = self.config().await;
        let mut summary = SweepSummary::default();

        tracing::info!(
            "Scheduler: Starting sweep of {} endpoints",
            config.enabled().count()
        );

        for endpoint in config.enabled() {
            tokio::time::sleep(self.pacing).await;

            let outcome = self.prober.check(endpoint).await;
            summary.checked += 1;
            if outcome.success {
                summary.succeeded += 1;
            }

            if config.debug {
                match serde_json::to_string(&outcome) {
                    Ok(json) => tracing::info!("Scheduler: {} {}", endpoint.key, json),
                    Err(e) => tracing::warn!("Scheduler: Could not encode outcome of {}: {}", endpoint.key, e),
                }
            } else {
                tracing::debug!(
                    "Scheduler: {} success={} status={} duration={:?}",
                    endpoint.key,
                    outcome.success,
                    outcome.facts.http_status,
                    outcome.facts.duration
                );
            }
            for error in &outcome.facts.errors {
                tracing::warn!("Scheduler: {} probe error: {}", endpoint.name, error);
            }

            if let Err(e) = self.store.record_check(endpoint, &outcome, config.max_days) {
                tracing::error!("Scheduler: Failed to record check of {}: {}", endpoint.name, e);
                summary.storage_errors += 1;
            }
        }

        if let Some(path) = &self.report_path {
            match self.reports().await {
                Ok(reports) => {
                    if let Err(e) = report::write_script(path, &reports) {
                        tracing::error!("Scheduler: Failed to write {}: {}", path.display(), e);
                    }
                }
                Err(e) => tracing::error!("Scheduler: Failed to build reports: {}", e),
            }
        }

        tracing::info!(
            "Scheduler: Sweep finished, {}/{} succeeded",
            summary.succeeded,
            summary.checked
        );
        summary
    }

    /// Dashboard data for every enabled endpoint, in configured order.
    pub async fn reports(&self) -> Result<Vec<EndpointReport>, DbError> {
        let config = self.config().await;
        let today = Utc::now().date_naive();

        config
            .enabled()
            .map(|endpoint| {
                let summary = match self.store.get_endpoint(&endpoint.key) {
                    Ok(summary) => summary,
                    Err(DbError::NotFound) => EndpointSummary {
                        key: endpoint.key.clone(),
                        name: endpoint.name.clone(),
                        url: endpoint.display_url(),
                        status: Status::NoData,
                        sla: 0,
                    },
                    Err(e) => return Err(e),
                };
                let buckets = self.store.get_day_buckets(&endpoint.key)?;
                Ok(report::build(&summary, &buckets, today, config.report_days))
            })
            .collect()
    }
}
