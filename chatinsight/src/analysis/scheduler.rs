//! Periodic trigger for analysis runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::orchestrator::{BatchAnalyzer, RunOutcome};

/// Fires [`BatchAnalyzer::run`] on a fixed interval, never more than one run at a time.
#[derive(Clone)]
pub struct AnalysisScheduler {
    analyzer: Arc<BatchAnalyzer>,
    interval: Duration,
    run_on_startup: bool,
    running: Arc<Mutex<()>>,
}

impl AnalysisScheduler {
    pub fn new(analyzer: Arc<BatchAnalyzer>, interval: Duration, run_on_startup: bool) -> Self {
        Self {
            analyzer,
            interval,
            run_on_startup,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Start a run unless one is already in progress.
    ///
    /// Returns `None` when the tick was skipped because the previous run has not finished.
    pub async fn trigger(&self) -> Option<RunOutcome> {
        let Ok(_running) = self.running.try_lock() else {
            warn!("Previous analysis run still in progress, skipping this tick");
            return None;
        };

        Some(self.analyzer.run().await)
    }

    /// Run until `shutdown` is cancelled. An in-flight run is dropped on shutdown.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(
            interval = %humantime::format_duration(self.interval),
            run_on_startup = self.run_on_startup,
            "Starting analysis scheduler"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !self.run_on_startup {
            // the first tick completes immediately
            interval.tick().await;
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Analysis scheduler shutting down");
                    return Ok(());
                }
                _ = interval.tick() => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    warn!("Shutdown requested during an analysis run, cancelling it");
                    return Ok(());
                }
                _ = self.trigger() => {}
            }
        }
    }
}
