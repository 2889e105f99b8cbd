//! Cluster capacity estimation
//!
//! Snapshots free node resources and service requirements, then reports how
//! many more tasks of the largest service the cluster can place.

mod estimator;
mod resources;
mod schedule;
mod services;

#[cfg(test)]
mod tests;

pub use estimator::{
    headroom_for, largest_service, occupancy_of, CapacityEstimator, CapacityReport,
};
pub use resources::{resolve_resources, NodeResources, ResourceSnapshot, ResourceTotals};
pub use schedule::{CapacityLoop, CapacityScheduleConfig};
pub use services::{
    resolve_services, AggregateRequirement, ContainerRequirement, ServiceRequirement,
};

use async_trait::async_trait;

use crate::error::UpstreamResult;

/// Headroom reported when there is no service to size against
pub const HEADROOM_SENTINEL: f64 = 999_999.0;

/// Sink for capacity reports
#[async_trait]
pub trait HeadroomPublisher: Send + Sync {
    async fn publish(&self, report: &CapacityReport) -> UpstreamResult<()>;
}
