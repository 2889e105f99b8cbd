//! Periodic capacity estimation
//!
//! Runs the estimator for each configured cluster on a fixed interval and
//! publishes the resulting headroom.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{CapacityEstimator, HeadroomPublisher};
use crate::observability::StructuredLogger;

#[derive(Debug, Clone)]
pub struct CapacityScheduleConfig {
    /// Time between runs (default: 60 seconds)
    pub interval: Duration,
    /// Clusters estimated on every run
    pub clusters: Vec<String>,
}

impl Default for CapacityScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            clusters: Vec::new(),
        }
    }
}

pub struct CapacityLoop {
    estimator: Arc<CapacityEstimator>,
    publisher: Arc<dyn HeadroomPublisher>,
    logger: StructuredLogger,
    config: CapacityScheduleConfig,
}

impl CapacityLoop {
    pub fn new(
        estimator: Arc<CapacityEstimator>,
        publisher: Arc<dyn HeadroomPublisher>,
        logger: StructuredLogger,
        config: CapacityScheduleConfig,
    ) -> Self {
        Self {
            estimator,
            publisher,
            logger,
            config,
        }
    }

    /// Run until `shutdown` fires
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if self.config.clusters.is_empty() {
            info!("No clusters configured, capacity loop not started");
            return;
        }

        info!(
            interval_secs = self.config.interval.as_secs(),
            clusters = ?self.config.clusters,
            "Starting capacity estimation loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let estimated = self.run_once().await;
                    debug!(
                        clusters = estimated,
                        errors = self.config.clusters.len() - estimated,
                        elapsed_ms = start.elapsed().as_millis(),
                        "Capacity cycle complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down capacity estimation loop");
                    break;
                }
            }
        }
    }

    /// Estimate every configured cluster once; returns how many succeeded
    pub async fn run_once(&self) -> usize {
        let mut estimated = 0;
        for cluster in &self.config.clusters {
            match self
                .estimator
                .estimate_and_publish(cluster, self.publisher.as_ref())
                .await
            {
                Ok(report) => {
                    self.logger.log_capacity(&report);
                    estimated += 1;
                }
                Err(e) => warn!(cluster = %cluster, error = %e, "Capacity estimation failed"),
            }
        }
        estimated
    }
}
