//! ECS client (AWS JSON 1.1)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::{WireClient, JSON_1_1};
use crate::error::{UpstreamError, UpstreamResult};
use crate::models::{ContainerInstance, Page, Service, TaskDefinition};
use crate::ops::{ClusterOps, DesiredStatus, InstanceStatus};

const TARGET_PREFIX: &str = "AmazonEC2ContainerServiceV20141113";

pub struct EcsClient {
    wire: WireClient,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListContainerInstancesResponse {
    #[serde(default)]
    container_instance_arns: Vec<String>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeContainerInstancesResponse {
    #[serde(default)]
    container_instances: Vec<ContainerInstance>,
    #[serde(default)]
    failures: Vec<Failure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateContainerInstancesStateResponse {
    #[serde(default)]
    failures: Vec<Failure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTasksResponse {
    #[serde(default)]
    task_arns: Vec<String>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListServicesResponse {
    #[serde(default)]
    service_arns: Vec<String>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeServicesResponse {
    #[serde(default)]
    services: Vec<Service>,
    #[serde(default)]
    failures: Vec<Failure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeTaskDefinitionResponse {
    task_definition: TaskDefinition,
}

/// Per-resource failure entry in an otherwise successful response
#[derive(Debug, Deserialize)]
struct Failure {
    #[serde(default)]
    arn: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

fn describe_failures(failures: &[Failure]) -> String {
    failures
        .iter()
        .map(|f| {
            format!(
                "{} ({})",
                f.arn.as_deref().unwrap_or("?"),
                f.reason.as_deref().unwrap_or("unknown")
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// A state change naming resources ECS could not act on is rejected as a whole
fn check_failures(operation: &'static str, failures: &[Failure]) -> UpstreamResult<()> {
    if failures.is_empty() {
        return Ok(());
    }
    Err(UpstreamError::rejected(operation, describe_failures(failures)))
}

/// Describe calls keep what came back; resources gone since listing are skipped
fn log_failures(operation: &'static str, failures: &[Failure]) {
    if !failures.is_empty() {
        warn!(
            operation,
            skipped = failures.len(),
            failures = %describe_failures(failures),
            "ECS could not describe some resources"
        );
    }
}

impl EcsClient {
    pub(crate) fn new(wire: WireClient) -> Self {
        Self { wire }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        body: serde_json::Value,
    ) -> UpstreamResult<T> {
        let target = format!("{}.{}", TARGET_PREFIX, operation);
        self.wire.call_json(operation, &target, JSON_1_1, &body).await
    }
}

#[async_trait]
impl ClusterOps for EcsClient {
    async fn list_container_instances(
        &self,
        cluster: &str,
        next_token: Option<String>,
    ) -> UpstreamResult<Page<String>> {
        let mut body = json!({ "cluster": cluster });
        if let Some(token) = next_token {
            body["nextToken"] = json!(token);
        }
        let response: ListContainerInstancesResponse =
            self.call("ListContainerInstances", body).await?;
        Ok(Page {
            items: response.container_instance_arns,
            next_token: response.next_token,
        })
    }

    async fn describe_container_instances(
        &self,
        cluster: &str,
        arns: &[String],
    ) -> UpstreamResult<Vec<ContainerInstance>> {
        let response: DescribeContainerInstancesResponse = self
            .call(
                "DescribeContainerInstances",
                json!({ "cluster": cluster, "containerInstances": arns }),
            )
            .await?;
        log_failures("DescribeContainerInstances", &response.failures);
        Ok(response.container_instances)
    }

    async fn update_container_instances_state(
        &self,
        cluster: &str,
        arns: &[String],
        status: InstanceStatus,
    ) -> UpstreamResult<()> {
        let response: UpdateContainerInstancesStateResponse = self
            .call(
                "UpdateContainerInstancesState",
                json!({
                    "cluster": cluster,
                    "containerInstances": arns,
                    "status": status.as_str(),
                }),
            )
            .await?;
        check_failures("UpdateContainerInstancesState", &response.failures)
    }

    async fn list_tasks(
        &self,
        cluster: &str,
        container_instance: &str,
        desired_status: DesiredStatus,
    ) -> UpstreamResult<Vec<String>> {
        let mut tasks = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut body = json!({
                "cluster": cluster,
                "containerInstance": container_instance,
                "desiredStatus": desired_status.as_str(),
            });
            if let Some(token) = next_token.take() {
                body["nextToken"] = json!(token);
            }
            let response: ListTasksResponse = self.call("ListTasks", body).await?;
            tasks.extend(response.task_arns);
            match response.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(tasks)
    }

    async fn list_services(
        &self,
        cluster: &str,
        next_token: Option<String>,
    ) -> UpstreamResult<Page<String>> {
        let mut body = json!({ "cluster": cluster });
        if let Some(token) = next_token {
            body["nextToken"] = json!(token);
        }
        let response: ListServicesResponse = self.call("ListServices", body).await?;
        Ok(Page {
            items: response.service_arns,
            next_token: response.next_token,
        })
    }

    async fn describe_services(
        &self,
        cluster: &str,
        arns: &[String],
    ) -> UpstreamResult<Vec<Service>> {
        let response: DescribeServicesResponse = self
            .call(
                "DescribeServices",
                json!({ "cluster": cluster, "services": arns }),
            )
            .await?;
        log_failures("DescribeServices", &response.failures);
        Ok(response.services)
    }

    async fn describe_task_definition(
        &self,
        task_definition: &str,
    ) -> UpstreamResult<TaskDefinition> {
        let response: DescribeTaskDefinitionResponse = self
            .call(
                "DescribeTaskDefinition",
                json!({ "taskDefinition": task_definition }),
            )
            .await?;
        Ok(response.task_definition)
    }
}
