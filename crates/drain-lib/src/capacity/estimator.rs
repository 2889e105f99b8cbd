//! Cluster headroom estimation
//!
//! Headroom is how many more tasks of the most memory-hungry service the
//! cluster could place, summed per node as a fractional count.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::resources::{resolve_resources, NodeResources, ResourceSnapshot, ResourceTotals};
use super::services::{resolve_services, AggregateRequirement, ServiceRequirement};
use super::{HeadroomPublisher, HEADROOM_SENTINEL};
use crate::error::DrainResult;
use crate::observability::DrainMetrics;
use crate::ops::ClusterOps;

/// Capacity of one cluster at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityReport {
    pub cluster: String,
    pub cpu: ResourceTotals,
    pub memory: ResourceTotals,
    pub nodes: Vec<NodeResources>,
    pub services: Vec<ServiceRequirement>,
    pub required: AggregateRequirement,
    pub largest_service: Option<ServiceRequirement>,
    pub headroom: f64,
    pub desired_tasks: u64,
    pub occupancy: f64,
}

impl CapacityReport {
    pub fn build(
        cluster: impl Into<String>,
        snapshot: ResourceSnapshot,
        services: Vec<ServiceRequirement>,
    ) -> Self {
        let largest = largest_service(&services).cloned();
        let headroom = headroom_for(&snapshot.nodes, largest.as_ref());
        let desired_tasks = services.iter().map(|s| s.desired).sum::<u64>();

        Self {
            cluster: cluster.into(),
            cpu: snapshot.cpu,
            memory: snapshot.memory,
            nodes: snapshot.nodes,
            required: AggregateRequirement::of(&services),
            services,
            largest_service: largest,
            headroom,
            desired_tasks,
            occupancy: occupancy_of(desired_tasks, headroom),
        }
    }

    /// Report for a cluster with no nodes and no services
    pub fn empty(cluster: impl Into<String>) -> Self {
        Self::build(cluster, ResourceSnapshot::default(), Vec::new())
    }

    /// Pretty-printed JSON with keys sorted
    pub fn to_pretty_json(&self) -> DrainResult<String> {
        // serde_json's Value map is ordered by key
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

/// Service with the highest per-task memory; the last of equal maxima wins
pub fn largest_service(services: &[ServiceRequirement]) -> Option<&ServiceRequirement> {
    services.iter().max_by_key(|s| s.memory_per_task)
}

/// Fractional count of `largest`-shaped tasks that still fit across `nodes`
pub fn headroom_for(nodes: &[NodeResources], largest: Option<&ServiceRequirement>) -> f64 {
    let Some(largest) = largest else {
        return HEADROOM_SENTINEL;
    };
    if largest.cpu_per_task == 0 && largest.memory_per_task == 0 {
        return HEADROOM_SENTINEL;
    }

    nodes
        .iter()
        .map(|node| {
            let cpu_fits = fits(node.free_cpu, largest.cpu_per_task);
            let memory_fits = fits(node.free_memory, largest.memory_per_task);
            match (cpu_fits, memory_fits) {
                (Some(cpu), Some(memory)) => cpu.min(memory),
                (Some(only), None) | (None, Some(only)) => only,
                (None, None) => 0.0,
            }
        })
        .sum()
}

/// `free / per_task`, or `None` when the task does not use the resource
fn fits(free: u64, per_task: u64) -> Option<f64> {
    (per_task > 0).then(|| free as f64 / per_task as f64)
}

/// desired / (desired + headroom), 0 when the denominator is not positive
pub fn occupancy_of(desired_tasks: u64, headroom: f64) -> f64 {
    let denominator = desired_tasks as f64 + headroom;
    if denominator <= 0.0 {
        return 0.0;
    }
    desired_tasks as f64 / denominator
}

/// Computes capacity reports for a cluster
pub struct CapacityEstimator {
    cluster: Arc<dyn ClusterOps>,
    metrics: DrainMetrics,
}

impl CapacityEstimator {
    pub fn new(cluster: Arc<dyn ClusterOps>) -> Self {
        Self {
            cluster,
            metrics: DrainMetrics::new(),
        }
    }

    pub async fn estimate(&self, cluster: &str) -> DrainResult<CapacityReport> {
        let start = Instant::now();

        let snapshot = resolve_resources(self.cluster.as_ref(), cluster)
            .await
            .map_err(|e| {
                self.metrics.inc_upstream_error(&e);
                e
            })?;
        let services = resolve_services(self.cluster.as_ref(), cluster)
            .await
            .map_err(|e| {
                self.metrics.inc_upstream_error(&e);
                e
            })?;

        let report = CapacityReport::build(cluster, snapshot, services);
        self.metrics
            .observe_estimate_latency(start.elapsed().as_secs_f64());

        if report.largest_service.is_none() {
            info!(cluster = %cluster, "No services on cluster");
        }
        info!(
            cluster = %cluster,
            headroom = report.headroom,
            desired_tasks = report.desired_tasks,
            "Estimated schedulable tasks for the largest service"
        );
        Ok(report)
    }

    /// Estimate `cluster` and hand the report to `publisher`.
    ///
    /// A publish failure is logged; the report is still returned.
    pub async fn estimate_and_publish(
        &self,
        cluster: &str,
        publisher: &dyn HeadroomPublisher,
    ) -> DrainResult<CapacityReport> {
        let report = self.estimate(cluster).await?;
        if let Ok(json) = report.to_pretty_json() {
            debug!(cluster = %cluster, report = %json, "Capacity report");
        }

        if let Err(e) = publisher.publish(&report).await {
            self.metrics.inc_upstream_error(&e);
            warn!(cluster = %cluster, error = %e, "Failed to publish headroom");
        }
        Ok(report)
    }
}
