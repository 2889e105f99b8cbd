//! Observability infrastructure for the drain agent
//!
//! Provides:
//! - Prometheus metrics (drain transitions, upstream errors, estimator latency,
//!   published cluster headroom)
//! - Structured JSON logging with tracing

use async_trait::async_trait;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    GaugeVec, Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::capacity::{CapacityReport, HeadroomPublisher};
use crate::error::{UpstreamError, UpstreamResult};
use crate::models::Phase;

/// Histogram buckets for estimator runs (in seconds); each run pages the whole cluster
const ESTIMATE_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<DrainMetricsInner> = OnceLock::new();

struct DrainMetricsInner {
    transitions: IntCounterVec,
    upstream_errors: IntCounterVec,
    heartbeats: IntCounter,
    estimate_latency_seconds: Histogram,
    additional_tasks: GaugeVec,
    occupancy_ratio: GaugeVec,
    desired_tasks: GaugeVec,
}

impl DrainMetricsInner {
    fn new() -> Self {
        Self {
            transitions: register_int_counter_vec!(
                "ecs_drain_transitions_total",
                "Drain controller steps by resulting phase and reason",
                &["phase", "reason"]
            )
            .expect("Failed to register transitions"),

            upstream_errors: register_int_counter_vec!(
                "ecs_drain_upstream_errors_total",
                "Failed upstream API calls by operation and error kind",
                &["operation", "kind"]
            )
            .expect("Failed to register upstream_errors"),

            heartbeats: register_int_counter!(
                "ecs_drain_heartbeats_total",
                "Lifecycle heartbeats accepted by the autoscaling group"
            )
            .expect("Failed to register heartbeats"),

            estimate_latency_seconds: register_histogram!(
                "ecs_drain_capacity_estimate_seconds",
                "Time spent computing a cluster capacity report",
                ESTIMATE_BUCKETS.to_vec()
            )
            .expect("Failed to register estimate_latency_seconds"),

            additional_tasks: register_gauge_vec!(
                "ecs_drain_additional_tasks",
                "Additional tasks of the largest service the cluster can still place",
                &["cluster"]
            )
            .expect("Failed to register additional_tasks"),

            occupancy_ratio: register_gauge_vec!(
                "ecs_drain_occupancy_ratio",
                "Desired tasks over desired tasks plus headroom",
                &["cluster"]
            )
            .expect("Failed to register occupancy_ratio"),

            desired_tasks: register_gauge_vec!(
                "ecs_drain_desired_tasks",
                "Desired task count across all services",
                &["cluster"]
            )
            .expect("Failed to register desired_tasks"),
        }
    }
}

/// Drain agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct DrainMetrics {
    _private: (),
}

impl Default for DrainMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DrainMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DrainMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DrainMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_transition(&self, phase: Phase, reason: &str) {
        self.inner()
            .transitions
            .with_label_values(&[phase.as_str(), reason])
            .inc();
    }

    pub fn inc_upstream_error(&self, error: &UpstreamError) {
        self.inner()
            .upstream_errors
            .with_label_values(&[error.operation(), error.kind()])
            .inc();
    }

    pub fn inc_heartbeats(&self) {
        self.inner().heartbeats.inc();
    }

    pub fn observe_estimate_latency(&self, duration_secs: f64) {
        self.inner().estimate_latency_seconds.observe(duration_secs);
    }

    /// Publish the headline numbers of a capacity report
    pub fn set_capacity(&self, report: &CapacityReport) {
        let cluster = report.cluster.as_str();
        let inner = self.inner();
        inner
            .additional_tasks
            .with_label_values(&[cluster])
            .set(report.headroom);
        inner
            .occupancy_ratio
            .with_label_values(&[cluster])
            .set(report.occupancy);
        inner
            .desired_tasks
            .with_label_values(&[cluster])
            .set(report.desired_tasks as f64);
    }

    pub fn additional_tasks(&self, cluster: &str) -> f64 {
        self.inner()
            .additional_tasks
            .with_label_values(&[cluster])
            .get()
    }
}

#[async_trait]
impl HeadroomPublisher for DrainMetrics {
    async fn publish(&self, report: &CapacityReport) -> UpstreamResult<()> {
        self.set_capacity(report);
        Ok(())
    }
}

/// Structured logger for agent events
///
/// Provides consistent JSON-formatted logging for drain steps, capacity
/// reports and process lifecycle.
#[derive(Clone)]
pub struct StructuredLogger {
    region: String,
}

impl StructuredLogger {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }

    /// Log the outcome of one drain step
    pub fn log_drain_step(&self, container_instance_arn: &str, phase: Phase, reason: &str) {
        info!(
            event = "drain_step",
            region = %self.region,
            container_instance_arn = %container_instance_arn,
            phase = %phase,
            reason = %reason,
            "Drain step completed"
        );
    }

    /// Log a drain step that could not run
    pub fn log_drain_failure(&self, error: &str, retryable: bool) {
        warn!(
            event = "drain_step_failed",
            region = %self.region,
            error = %error,
            retryable = retryable,
            "Drain step failed"
        );
    }

    /// Log a capacity report summary
    pub fn log_capacity(&self, report: &CapacityReport) {
        info!(
            event = "capacity_report",
            region = %self.region,
            cluster = %report.cluster,
            headroom = report.headroom,
            desired_tasks = report.desired_tasks,
            occupancy = report.occupancy,
            largest_service = report
                .largest_service
                .as_ref()
                .map(|s| s.name.as_str())
                .unwrap_or("none"),
            "Cluster capacity estimated"
        );
    }

    pub fn log_startup(&self, version: &str, state_function: &str) {
        info!(
            event = "agent_started",
            region = %self.region,
            agent_version = %version,
            state_function = %state_function,
            "ECS drain agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            region = %self.region,
            reason = %reason,
            "ECS drain agent shutting down"
        );
    }
}
