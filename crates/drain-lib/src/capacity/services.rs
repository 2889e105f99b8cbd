//! Service resource requirements
//!
//! Per-task CPU and memory are the sums over the task definition's containers.
//! A container's memory is the larger of its hard limit and soft reservation.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::UpstreamResult;
use crate::models::{Service, TaskDefinition};
use crate::ops::{describe_all_services, ClusterOps};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerRequirement {
    pub name: String,
    pub cpu: u64,
    pub memory: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRequirement {
    pub name: String,
    pub desired: u64,
    /// Running plus pending tasks
    pub running: u64,
    pub containers: Vec<ContainerRequirement>,
    pub cpu_per_task: u64,
    pub memory_per_task: u64,
    pub cpu_requirement: u64,
    pub memory_requirement: u64,
}

impl ServiceRequirement {
    pub fn from_definition(service: &Service, definition: &TaskDefinition) -> Self {
        let containers: Vec<ContainerRequirement> = definition
            .container_definitions
            .iter()
            .map(|c| ContainerRequirement {
                name: c.name.clone(),
                cpu: c.cpu,
                memory: c.effective_memory(),
            })
            .collect();

        let cpu_per_task = containers.iter().map(|c| c.cpu).sum::<u64>();
        let memory_per_task = containers.iter().map(|c| c.memory).sum::<u64>();
        let desired = service.desired_count;

        Self {
            name: service.service_name.clone(),
            desired,
            running: service.running_count + service.pending_count,
            containers,
            cpu_per_task,
            memory_per_task,
            cpu_requirement: cpu_per_task.saturating_mul(desired),
            memory_requirement: memory_per_task.saturating_mul(desired),
        }
    }
}

/// Resources needed to run every service at its desired count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateRequirement {
    pub cpu: u64,
    pub memory: u64,
}

impl AggregateRequirement {
    pub fn of(services: &[ServiceRequirement]) -> Self {
        services.iter().fold(Self::default(), |acc, s| Self {
            cpu: acc.cpu.saturating_add(s.cpu_requirement),
            memory: acc.memory.saturating_add(s.memory_requirement),
        })
    }
}

/// Describe every service in `cluster` and compute its requirements.
///
/// Task definitions shared by several services are described once per run.
pub async fn resolve_services(
    ops: &dyn ClusterOps,
    cluster: &str,
) -> UpstreamResult<Vec<ServiceRequirement>> {
    let services = describe_all_services(ops, cluster).await?;
    let mut definitions: HashMap<String, TaskDefinition> = HashMap::new();
    let mut requirements = Vec::with_capacity(services.len());

    for service in &services {
        if !definitions.contains_key(&service.task_definition) {
            let definition = ops.describe_task_definition(&service.task_definition).await?;
            definitions.insert(service.task_definition.clone(), definition);
        }
        if let Some(definition) = definitions.get(&service.task_definition) {
            let requirement = ServiceRequirement::from_definition(service, definition);
            debug!(
                service = %requirement.name,
                desired = requirement.desired,
                cpu_per_task = requirement.cpu_per_task,
                memory_per_task = requirement.memory_per_task,
                "Resolved service requirement"
            );
            requirements.push(requirement);
        }
    }

    info!(
        cluster = %cluster,
        services = requirements.len(),
        task_definitions = definitions.len(),
        "Collected service requirements"
    );

    Ok(requirements)
}
