//! Upstream collaborator interfaces
//!
//! The drain controller and the capacity estimator only talk to the cluster
//! orchestrator and the autoscaling group through these traits, so the AWS
//! clients in [`crate::aws`] can be swapped for test doubles.

use async_trait::async_trait;
use tracing::debug;

use crate::error::UpstreamResult;
use crate::models::{ContainerInstance, Page, Service, TaskDefinition};

/// Upper bound on container instances per DescribeContainerInstances call
pub const DESCRIBE_INSTANCES_BATCH: usize = 50;

/// Upper bound on services per DescribeServices call
pub const DESCRIBE_SERVICES_BATCH: usize = 10;

/// Target status for UpdateContainerInstancesState
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Active,
    Draining,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Active => "ACTIVE",
            InstanceStatus::Draining => "DRAINING",
        }
    }
}

/// Desired-status filter for ListTasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredStatus {
    Running,
    Pending,
    Stopped,
}

impl DesiredStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DesiredStatus::Running => "RUNNING",
            DesiredStatus::Pending => "PENDING",
            DesiredStatus::Stopped => "STOPPED",
        }
    }
}

/// Identifies one pending lifecycle action on the autoscaling group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleAction {
    pub hook_name: String,
    pub group_name: String,
    pub token: String,
    pub instance_id: String,
}

/// Outcome reported to CompleteLifecycleAction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleActionResult {
    Continue,
    Abandon,
}

impl LifecycleActionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleActionResult::Continue => "CONTINUE",
            LifecycleActionResult::Abandon => "ABANDON",
        }
    }
}

/// Cluster orchestrator operations (ECS)
#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn list_container_instances(
        &self,
        cluster: &str,
        next_token: Option<String>,
    ) -> UpstreamResult<Page<String>>;

    async fn describe_container_instances(
        &self,
        cluster: &str,
        arns: &[String],
    ) -> UpstreamResult<Vec<ContainerInstance>>;

    async fn update_container_instances_state(
        &self,
        cluster: &str,
        arns: &[String],
        status: InstanceStatus,
    ) -> UpstreamResult<()>;

    /// Every task ARN on `container_instance` with the given desired status, all pages followed
    async fn list_tasks(
        &self,
        cluster: &str,
        container_instance: &str,
        desired_status: DesiredStatus,
    ) -> UpstreamResult<Vec<String>>;

    async fn list_services(
        &self,
        cluster: &str,
        next_token: Option<String>,
    ) -> UpstreamResult<Page<String>>;

    async fn describe_services(&self, cluster: &str, arns: &[String])
        -> UpstreamResult<Vec<Service>>;

    async fn describe_task_definition(&self, task_definition: &str)
        -> UpstreamResult<TaskDefinition>;
}

/// Autoscaling group lifecycle-hook operations
#[async_trait]
pub trait AutoscalingOps: Send + Sync {
    async fn record_lifecycle_action_heartbeat(&self, action: &LifecycleAction)
        -> UpstreamResult<()>;

    async fn complete_lifecycle_action(
        &self,
        action: &LifecycleAction,
        result: LifecycleActionResult,
    ) -> UpstreamResult<()>;
}

/// All container instance ARNs registered to `cluster`
pub async fn list_all_container_instances(
    ops: &dyn ClusterOps,
    cluster: &str,
) -> UpstreamResult<Vec<String>> {
    let mut arns = Vec::new();
    let mut next_token = None;
    loop {
        let page = ops.list_container_instances(cluster, next_token).await?;
        arns.extend(page.items);
        match page.next_token {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }
    debug!(cluster = %cluster, count = arns.len(), "Listed container instances");
    Ok(arns)
}

/// Describe every container instance in `cluster`, batched to the API limit
pub async fn describe_all_container_instances(
    ops: &dyn ClusterOps,
    cluster: &str,
) -> UpstreamResult<Vec<ContainerInstance>> {
    let arns = list_all_container_instances(ops, cluster).await?;
    let mut instances = Vec::with_capacity(arns.len());
    for batch in arns.chunks(DESCRIBE_INSTANCES_BATCH) {
        instances.extend(ops.describe_container_instances(cluster, batch).await?);
    }
    Ok(instances)
}

/// All service ARNs in `cluster`
pub async fn list_all_services(ops: &dyn ClusterOps, cluster: &str) -> UpstreamResult<Vec<String>> {
    let mut arns = Vec::new();
    let mut next_token = None;
    loop {
        let page = ops.list_services(cluster, next_token).await?;
        arns.extend(page.items);
        match page.next_token {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }
    debug!(cluster = %cluster, count = arns.len(), "Listed services");
    Ok(arns)
}

/// Describe every service in `cluster`, batched to the API limit
pub async fn describe_all_services(
    ops: &dyn ClusterOps,
    cluster: &str,
) -> UpstreamResult<Vec<Service>> {
    let arns = list_all_services(ops, cluster).await?;
    let mut services = Vec::with_capacity(arns.len());
    for batch in arns.chunks(DESCRIBE_SERVICES_BATCH) {
        services.extend(ops.describe_services(cluster, batch).await?);
    }
    Ok(services)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCluster;

    #[tokio::test]
    async fn test_describe_all_container_instances_batches_by_fifty() {
        let cluster = MockCluster::new().with_page_size(40);
        for i in 0..120 {
            cluster.add_node(&format!("i-{}", i), 1024, 2048);
        }

        let instances = describe_all_container_instances(&cluster, "prod")
            .await
            .unwrap();

        assert_eq!(instances.len(), 120);
        assert_eq!(cluster.instance_describe_batches(), vec![50, 50, 20]);
        assert_eq!(cluster.calls("ListContainerInstances"), 3);
    }

    #[tokio::test]
    async fn test_describe_all_services_batches_by_ten() {
        let cluster = MockCluster::new().with_page_size(7);
        for i in 0..23 {
            cluster.add_service(&format!("svc-{}", i), 1, &[(128, 256)]);
        }

        let services = describe_all_services(&cluster, "prod").await.unwrap();

        assert_eq!(services.len(), 23);
        assert_eq!(cluster.service_describe_batches(), vec![10, 10, 3]);
        assert_eq!(cluster.calls("ListServices"), 4);
    }

    #[test]
    fn test_wire_strings() {
        assert_eq!(InstanceStatus::Active.as_str(), "ACTIVE");
        assert_eq!(InstanceStatus::Draining.as_str(), "DRAINING");
        assert_eq!(DesiredStatus::Running.as_str(), "RUNNING");
        assert_eq!(DesiredStatus::Pending.as_str(), "PENDING");
        assert_eq!(DesiredStatus::Stopped.as_str(), "STOPPED");
        assert_eq!(LifecycleActionResult::Continue.as_str(), "CONTINUE");
        assert_eq!(LifecycleActionResult::Abandon.as_str(), "ABANDON");
    }
}
