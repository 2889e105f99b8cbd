//! Node resource snapshot
//!
//! Free and registered CPU/memory per container instance, summed into
//! cluster-wide totals. Recomputed on every estimator run.

use serde::Serialize;
use tracing::info;

use crate::error::UpstreamResult;
use crate::models::{resource_names, ContainerInstance};
use crate::ops::{describe_all_container_instances, ClusterOps};

/// Total and free units of one resource across the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceTotals {
    pub total: u64,
    pub free: u64,
}

/// Free resources on one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeResources {
    pub free_cpu: u64,
    pub free_memory: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub cpu: ResourceTotals,
    pub memory: ResourceTotals,
    pub nodes: Vec<NodeResources>,
}

impl ResourceSnapshot {
    pub fn from_instances(instances: &[ContainerInstance]) -> Self {
        let mut snapshot = Self::default();

        for instance in instances {
            let free_cpu = instance.remaining(resource_names::CPU);
            let free_memory = instance.remaining(resource_names::MEMORY);

            snapshot.cpu.total += instance.registered(resource_names::CPU);
            snapshot.cpu.free += free_cpu;
            snapshot.memory.total += instance.registered(resource_names::MEMORY);
            snapshot.memory.free += free_memory;

            snapshot.nodes.push(NodeResources {
                free_cpu,
                free_memory,
            });
        }

        snapshot
    }
}

/// Page through every node in `cluster` and snapshot its resources
pub async fn resolve_resources(
    ops: &dyn ClusterOps,
    cluster: &str,
) -> UpstreamResult<ResourceSnapshot> {
    let instances = describe_all_container_instances(ops, cluster).await?;
    let snapshot = ResourceSnapshot::from_instances(&instances);

    info!(
        cluster = %cluster,
        nodes = snapshot.nodes.len(),
        cpu_total = snapshot.cpu.total,
        cpu_free = snapshot.cpu.free,
        memory_total = snapshot.memory.total,
        memory_free = snapshot.memory.free,
        "Collected node resources"
    );

    Ok(snapshot)
}
