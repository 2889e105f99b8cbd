//! Core data models for the drain agent
//!
//! Wire shapes for the scale-in notification envelope that the re-invocation
//! orchestrator round-trips, and for the ECS resources read by the drain
//! controller and the capacity estimator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DrainError, DrainResult};

/// Prefix mirrored into `EventSource` so older state machine definitions keep
/// routing on it
pub const STATE_MACHINE_SOURCE_PREFIX: &str = "state_machine:";

/// Drain lifecycle phase carried in the `state` field of the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Deadline stamped, node not yet marked draining
    Init,
    /// Node draining, waiting for running tasks to finish
    Retry,
    /// Lifecycle action completed; terminal
    End,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Retry => "retry",
            Phase::End => "end",
        }
    }

    /// Parse the `state_machine:<phase>` form written into `EventSource`
    pub fn from_event_source(source: &str) -> Option<Self> {
        match source.strip_prefix(STATE_MACHINE_SOURCE_PREFIX)? {
            "init" => Some(Phase::Init),
            "retry" => Some(Phase::Retry),
            "end" => Some(Phase::End),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Notification envelope: an SNS record list plus the fields the drain
/// controller stamps between invocations. Unknown fields are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEnvelope {
    #[serde(rename = "Records")]
    pub records: Vec<EnvelopeRecord>,

    #[serde(
        rename = "containerInstanceArn",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub container_instance_arn: Option<String>,

    /// Absolute drain deadline (ISO-8601)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endtime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Phase>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LifecycleEnvelope {
    /// Decode an envelope from an untyped JSON payload
    pub fn from_value(value: Value) -> DrainResult<Self> {
        serde_json::from_value(value).map_err(|e| DrainError::InvalidEnvelope(e.to_string()))
    }

    pub fn to_value(&self) -> DrainResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Current phase, falling back to the `EventSource` mirror
    pub fn phase(&self) -> Option<Phase> {
        self.state.or_else(|| {
            self.records
                .first()
                .and_then(|r| Phase::from_event_source(&r.event_source))
        })
    }

    /// Record a phase in both `state` and the first record's `EventSource`
    pub fn set_phase(&mut self, phase: Phase) {
        self.state = Some(phase);
        if let Some(record) = self.records.first_mut() {
            record.event_source = format!("{}{}", STATE_MACHINE_SOURCE_PREFIX, phase);
        }
    }

    /// Decode the scale-in notification carried by the first SNS record
    pub fn notification(&self) -> DrainResult<ScaleInNotification> {
        let record = self
            .records
            .first()
            .ok_or_else(|| DrainError::InvalidEnvelope("envelope has no records".to_string()))?;
        let sns = record.sns.as_ref().ok_or_else(|| {
            DrainError::InvalidEnvelope("first record carries no Sns payload".to_string())
        })?;
        serde_json::from_str(&sns.message)
            .map_err(|e| DrainError::InvalidEnvelope(format!("undecodable Sns message: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeRecord {
    #[serde(rename = "EventSource", default)]
    pub event_source: String,

    #[serde(rename = "Sns", default, skip_serializing_if = "Option::is_none")]
    pub sns: Option<SnsPayload>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnsPayload {
    /// JSON-encoded [`ScaleInNotification`]
    #[serde(rename = "Message")]
    pub message: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Auto Scaling lifecycle notification body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScaleInNotification {
    #[serde(rename = "EC2InstanceId")]
    pub ec2_instance_id: String,
    pub auto_scaling_group_name: String,
    pub lifecycle_action_token: String,
    pub lifecycle_hook_name: String,
    /// JSON-encoded [`NotificationMetadata`]
    pub notification_metadata: String,
}

impl ScaleInNotification {
    pub fn metadata(&self) -> DrainResult<NotificationMetadata> {
        serde_json::from_str(&self.notification_metadata).map_err(|e| {
            DrainError::InvalidEnvelope(format!("undecodable NotificationMetadata: {}", e))
        })
    }
}

/// Hook metadata configured on the autoscaling group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMetadata {
    pub ecs_cluster: String,
    /// Drain timeout with unit suffix, e.g. `300s`, `5m`, `1h`
    pub ecs_timeout: String,
}

/// One page of a paginated listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

/// ECS container instance (a cluster node)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInstance {
    pub container_instance_arn: String,
    pub ec2_instance_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub registered_resources: Vec<Resource>,
    #[serde(default)]
    pub remaining_resources: Vec<Resource>,
}

impl ContainerInstance {
    pub fn registered(&self, name: &str) -> u64 {
        resource_value(&self.registered_resources, name)
    }

    pub fn remaining(&self, name: &str) -> u64 {
        resource_value(&self.remaining_resources, name)
    }
}

/// Resource names used by ECS for schedulable dimensions
pub mod resource_names {
    pub const CPU: &str = "CPU";
    pub const MEMORY: &str = "MEMORY";
}

/// First integer value for `name`; a node that has not reported it counts as 0
fn resource_value(resources: &[Resource], name: &str) -> u64 {
    resources
        .iter()
        .find(|r| r.name == name)
        .map(|r| r.integer_value)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub integer_value: u64,
}

/// ECS service description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub service_name: String,
    #[serde(default)]
    pub service_arn: Option<String>,
    pub task_definition: String,
    #[serde(default)]
    pub desired_count: u64,
    #[serde(default)]
    pub running_count: u64,
    #[serde(default)]
    pub pending_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    #[serde(default)]
    pub task_definition_arn: Option<String>,
    #[serde(default)]
    pub container_definitions: Vec<ContainerDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub name: String,
    #[serde(default)]
    pub cpu: u64,
    /// Hard memory limit
    #[serde(default)]
    pub memory: Option<u64>,
    /// Soft memory reservation
    #[serde(default)]
    pub memory_reservation: Option<u64>,
}

impl ContainerDefinition {
    /// Memory the scheduler reserves: the larger of hard limit and soft reservation
    pub fn effective_memory(&self) -> u64 {
        self.memory
            .unwrap_or(0)
            .max(self.memory_reservation.unwrap_or(0))
    }
}
