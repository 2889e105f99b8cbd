//! In-memory collaborators for tests
//!
//! `MockCluster` models an ECS cluster with nodes, services and running tasks;
//! `MockAutoscaling` records lifecycle-hook calls. Both can be told to fail a
//! named operation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{UpstreamError, UpstreamResult};
use crate::models::{
    resource_names, ContainerDefinition, ContainerInstance, LifecycleEnvelope, Page, Resource,
    Service, TaskDefinition,
};
use crate::ops::{
    AutoscalingOps, ClusterOps, DesiredStatus, InstanceStatus, LifecycleAction,
    LifecycleActionResult,
};

pub fn container_instance_arn(ec2_instance_id: &str) -> String {
    format!(
        "arn:aws:ecs:us-east-1:123456789012:container-instance/prod/{}",
        ec2_instance_id
    )
}

/// Fresh SNS delivery for `ec2_instance_id` in cluster `prod`
pub fn notification_envelope(ec2_instance_id: &str, ecs_timeout: &str) -> LifecycleEnvelope {
    let metadata = serde_json::json!({
        "ecs_cluster": "prod",
        "ecs_timeout": ecs_timeout,
    });
    let message = serde_json::json!({
        "EC2InstanceId": ec2_instance_id,
        "AutoScalingGroupName": "ecs-asg",
        "LifecycleActionToken": "token-1",
        "LifecycleHookName": "drain-hook",
        "LifecycleTransition": "autoscaling:EC2_INSTANCE_TERMINATING",
        "NotificationMetadata": metadata.to_string(),
    });
    let raw = serde_json::json!({
        "Records": [{
            "EventSource": "aws:sns",
            "Sns": { "Message": message.to_string() }
        }]
    });
    serde_json::from_value(raw).expect("valid envelope")
}

fn resources(cpu: u64, memory: u64) -> Vec<Resource> {
    vec![
        Resource {
            name: resource_names::CPU.to_string(),
            kind: Some("INTEGER".to_string()),
            integer_value: cpu,
        },
        Resource {
            name: resource_names::MEMORY.to_string(),
            kind: Some("INTEGER".to_string()),
            integer_value: memory,
        },
    ]
}

#[derive(Default)]
struct ClusterState {
    instances: Vec<ContainerInstance>,
    services: Vec<Service>,
    task_definitions: HashMap<String, TaskDefinition>,
    running_tasks: HashMap<String, usize>,
    failures: HashMap<&'static str, UpstreamError>,
    calls: Vec<&'static str>,
    drained: Vec<String>,
    instance_batches: Vec<usize>,
    service_batches: Vec<usize>,
}

/// In-memory ECS cluster
pub struct MockCluster {
    state: Mutex<ClusterState>,
    page_size: usize,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClusterState::default()),
            page_size: 100,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Register a node whose registered resources equal its free resources
    pub fn add_node(&self, ec2_instance_id: &str, free_cpu: u64, free_memory: u64) -> String {
        self.add_node_with_totals(ec2_instance_id, free_cpu, free_memory, free_cpu, free_memory)
    }

    pub fn add_node_with_totals(
        &self,
        ec2_instance_id: &str,
        free_cpu: u64,
        free_memory: u64,
        total_cpu: u64,
        total_memory: u64,
    ) -> String {
        let arn = container_instance_arn(ec2_instance_id);
        self.state.lock().unwrap().instances.push(ContainerInstance {
            container_instance_arn: arn.clone(),
            ec2_instance_id: ec2_instance_id.to_string(),
            status: Some("ACTIVE".to_string()),
            registered_resources: resources(total_cpu, total_memory),
            remaining_resources: resources(free_cpu, free_memory),
        });
        arn
    }

    /// Add a service whose task definition has one container per `(cpu, memory)`
    pub fn add_service(&self, name: &str, desired: u64, containers: &[(u64, u64)]) {
        self.add_service_with_task_definition(name, desired, &format!("td-{}", name), containers);
    }

    /// Register a service running `task_definition`; services may share one
    pub fn add_service_with_task_definition(
        &self,
        name: &str,
        desired: u64,
        task_definition: &str,
        containers: &[(u64, u64)],
    ) {
        let task_definition = task_definition.to_string();
        let definitions = containers
            .iter()
            .enumerate()
            .map(|(i, (cpu, memory))| ContainerDefinition {
                name: format!("{}-{}", name, i),
                cpu: *cpu,
                memory: Some(*memory),
                memory_reservation: None,
            })
            .collect();

        let mut state = self.state.lock().unwrap();
        state.services.push(Service {
            service_name: name.to_string(),
            service_arn: Some(format!("arn:aws:ecs:us-east-1:123456789012:service/{}", name)),
            task_definition: task_definition.clone(),
            desired_count: desired,
            running_count: desired,
            pending_count: 0,
        });
        state.task_definitions.insert(
            task_definition.clone(),
            TaskDefinition {
                task_definition_arn: Some(task_definition),
                container_definitions: definitions,
            },
        );
    }

    pub fn set_running_tasks(&self, ec2_instance_id: &str, count: usize) {
        self.state
            .lock()
            .unwrap()
            .running_tasks
            .insert(container_instance_arn(ec2_instance_id), count);
    }

    /// Fail every call to `operation` with `error`
    pub fn fail(&self, operation: &'static str, error: UpstreamError) {
        self.state.lock().unwrap().failures.insert(operation, error);
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c == operation)
            .count()
    }

    /// Container instance ARNs marked DRAINING, in call order
    pub fn drained(&self) -> Vec<String> {
        self.state.lock().unwrap().drained.clone()
    }

    pub fn instance_describe_batches(&self) -> Vec<usize> {
        self.state.lock().unwrap().instance_batches.clone()
    }

    pub fn service_describe_batches(&self) -> Vec<usize> {
        self.state.lock().unwrap().service_batches.clone()
    }

    fn record(&self, operation: &'static str) -> UpstreamResult<MutexGuard<'_, ClusterState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(operation);
        if let Some(err) = state.failures.get(operation).cloned() {
            return Err(err);
        }
        Ok(state)
    }

    fn page(&self, all: Vec<String>, next_token: Option<String>) -> Page<String> {
        let start = next_token
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(0);
        let end = (start + self.page_size).min(all.len());
        Page {
            items: all[start.min(end)..end].to_vec(),
            next_token: (end < all.len()).then(|| end.to_string()),
        }
    }
}

#[async_trait]
impl ClusterOps for MockCluster {
    async fn list_container_instances(
        &self,
        _cluster: &str,
        next_token: Option<String>,
    ) -> UpstreamResult<Page<String>> {
        let all = self
            .record("ListContainerInstances")?
            .instances
            .iter()
            .map(|i| i.container_instance_arn.clone())
            .collect();
        Ok(self.page(all, next_token))
    }

    async fn describe_container_instances(
        &self,
        _cluster: &str,
        arns: &[String],
    ) -> UpstreamResult<Vec<ContainerInstance>> {
        let mut state = self.record("DescribeContainerInstances")?;
        state.instance_batches.push(arns.len());
        Ok(state
            .instances
            .iter()
            .filter(|i| arns.contains(&i.container_instance_arn))
            .cloned()
            .collect())
    }

    async fn update_container_instances_state(
        &self,
        _cluster: &str,
        arns: &[String],
        status: InstanceStatus,
    ) -> UpstreamResult<()> {
        let mut state = self.record("UpdateContainerInstancesState")?;
        if status == InstanceStatus::Draining {
            state.drained.extend(arns.iter().cloned());
        }
        Ok(())
    }

    async fn list_tasks(
        &self,
        _cluster: &str,
        container_instance: &str,
        _desired_status: DesiredStatus,
    ) -> UpstreamResult<Vec<String>> {
        let state = self.record("ListTasks")?;
        let count = state
            .running_tasks
            .get(container_instance)
            .copied()
            .unwrap_or(0);
        Ok((0..count)
            .map(|i| format!("arn:aws:ecs:us-east-1:123456789012:task/prod/{}", i))
            .collect())
    }

    async fn list_services(
        &self,
        _cluster: &str,
        next_token: Option<String>,
    ) -> UpstreamResult<Page<String>> {
        let all = self
            .record("ListServices")?
            .services
            .iter()
            .map(|s| s.service_name.clone())
            .collect();
        Ok(self.page(all, next_token))
    }

    async fn describe_services(
        &self,
        _cluster: &str,
        arns: &[String],
    ) -> UpstreamResult<Vec<Service>> {
        let mut state = self.record("DescribeServices")?;
        state.service_batches.push(arns.len());
        // Answer in request order like ECS does
        Ok(arns
            .iter()
            .filter_map(|arn| state.services.iter().find(|s| &s.service_name == arn))
            .cloned()
            .collect())
    }

    async fn describe_task_definition(
        &self,
        task_definition: &str,
    ) -> UpstreamResult<TaskDefinition> {
        let state = self.record("DescribeTaskDefinition")?;
        state
            .task_definitions
            .get(task_definition)
            .cloned()
            .ok_or_else(|| UpstreamError::rejected("DescribeTaskDefinition", "unknown task definition"))
    }
}

#[derive(Default)]
struct AutoscalingState {
    heartbeats: Vec<LifecycleAction>,
    completions: Vec<(LifecycleAction, LifecycleActionResult)>,
    failures: HashMap<&'static str, UpstreamError>,
}

/// Records lifecycle-hook calls
#[derive(Default)]
pub struct MockAutoscaling {
    state: Mutex<AutoscalingState>,
}

impl MockAutoscaling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, operation: &'static str, error: UpstreamError) {
        self.state.lock().unwrap().failures.insert(operation, error);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    /// Heartbeat attempts, failed ones included
    pub fn heartbeats(&self) -> usize {
        self.state.lock().unwrap().heartbeats.len()
    }

    /// Completion attempts, failed ones included
    pub fn completions(&self) -> Vec<(LifecycleAction, LifecycleActionResult)> {
        self.state.lock().unwrap().completions.clone()
    }
}

#[async_trait]
impl AutoscalingOps for MockAutoscaling {
    async fn record_lifecycle_action_heartbeat(
        &self,
        action: &LifecycleAction,
    ) -> UpstreamResult<()> {
        let mut state = self.state.lock().unwrap();
        state.heartbeats.push(action.clone());
        match state.failures.get("RecordLifecycleActionHeartbeat") {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn complete_lifecycle_action(
        &self,
        action: &LifecycleAction,
        result: LifecycleActionResult,
    ) -> UpstreamResult<()> {
        let mut state = self.state.lock().unwrap();
        state.completions.push((action.clone(), result));
        match state.failures.get("CompleteLifecycleAction") {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
