//! Lifecycle event context
//!
//! Wraps one delivery of the notification envelope: the decoded scale-in
//! notification, the resolved container instance and the drain deadline.
//! Every mutation is written back into the envelope, which is the only state
//! carried between invocations.

use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use tracing::{error, info, warn};

use crate::error::{DrainError, DrainResult};
use crate::models::{LifecycleEnvelope, Phase, ScaleInNotification};
use crate::observability::DrainMetrics;
use crate::ops::{describe_all_container_instances, AutoscalingOps, ClusterOps, LifecycleAction};

/// Extra time after the drain timeout so evicted tasks can start elsewhere
pub const DRAIN_GRACE_SECS: i64 = 60;

/// Convert a timeout such as `300s`, `5m` or `1h` into seconds
pub fn parse_drain_timeout(raw: &str) -> DrainResult<u64> {
    let raw = raw.trim();
    let invalid = || DrainError::InvalidTimeout(raw.to_string());

    let unit = raw.chars().last().ok_or_else(invalid)?;
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        _ => return Err(invalid()),
    };
    let amount: u64 = raw[..raw.len() - 1].parse().map_err(|_| invalid())?;
    let secs = amount.checked_mul(multiplier).ok_or_else(invalid)?;
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(invalid)?;
    Ok(secs)
}

/// Parse a stamped deadline; RFC 3339 or a naive ISO-8601 timestamp taken as UTC
pub fn parse_deadline(raw: &str) -> DrainResult<DateTime<Utc>> {
    if let Ok(deadline) = DateTime::parse_from_rfc3339(raw) {
        return Ok(deadline.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| DrainError::InvalidDeadline(raw.to_string()))
}

pub fn format_deadline(deadline: &DateTime<Utc>) -> String {
    deadline.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// One invocation's view of a node being retired
#[derive(Debug, Clone)]
pub struct LifecycleEventContext {
    envelope: LifecycleEnvelope,
    notification: ScaleInNotification,
    action: LifecycleAction,
    cluster: String,
    drain_timeout_secs: u64,
    container_instance_arn: String,
    deadline: Option<DateTime<Utc>>,
}

impl LifecycleEventContext {
    /// Decode the envelope, heartbeat on first delivery, and resolve the
    /// container instance backing the notification's EC2 instance
    pub async fn resolve(
        envelope: LifecycleEnvelope,
        cluster_ops: &dyn ClusterOps,
        autoscaling: &dyn AutoscalingOps,
        metrics: &DrainMetrics,
    ) -> DrainResult<Self> {
        let notification = envelope.notification()?;
        let metadata = notification.metadata()?;
        let drain_timeout_secs = parse_drain_timeout(&metadata.ecs_timeout)?;
        let deadline = envelope.endtime.as_deref().map(parse_deadline).transpose()?;

        let action = LifecycleAction {
            hook_name: notification.lifecycle_hook_name.clone(),
            group_name: notification.auto_scaling_group_name.clone(),
            token: notification.lifecycle_action_token.clone(),
            instance_id: notification.ec2_instance_id.clone(),
        };

        // Keep the group from terminating the host while the lookup runs
        if envelope.phase().is_none() {
            send_heartbeat(autoscaling, &action, metrics).await;
        }

        let container_instance_arn = match envelope.container_instance_arn.clone() {
            Some(arn) => arn,
            None => {
                find_container_instance(cluster_ops, &metadata.ecs_cluster, &notification).await?
            }
        };

        let mut envelope = envelope;
        envelope.container_instance_arn = Some(container_instance_arn.clone());

        Ok(Self {
            envelope,
            notification,
            action,
            cluster: metadata.ecs_cluster,
            drain_timeout_secs,
            container_instance_arn,
            deadline,
        })
    }

    pub fn phase(&self) -> Option<Phase> {
        self.envelope.phase()
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.envelope.set_phase(phase);
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn ec2_instance_id(&self) -> &str {
        &self.notification.ec2_instance_id
    }

    pub fn container_instance_arn(&self) -> &str {
        &self.container_instance_arn
    }

    pub fn action(&self) -> &LifecycleAction {
        &self.action
    }

    pub fn drain_timeout_secs(&self) -> u64 {
        self.drain_timeout_secs
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Deadline carried by the envelope, or `now + timeout + grace` stamped
    /// into it when none has been recorded yet. A timeout that pushes the
    /// deadline out of the representable range is an invalid timeout.
    pub fn stamp_deadline(&mut self, now: DateTime<Utc>) -> DrainResult<DateTime<Utc>> {
        if let Some(deadline) = self.deadline {
            return Ok(deadline);
        }
        let deadline = i64::try_from(self.drain_timeout_secs)
            .ok()
            .and_then(|secs| secs.checked_add(DRAIN_GRACE_SECS))
            .and_then(Duration::try_seconds)
            .and_then(|window| now.checked_add_signed(window))
            .ok_or_else(|| DrainError::InvalidTimeout(format!("{}s", self.drain_timeout_secs)))?;
        self.envelope.endtime = Some(format_deadline(&deadline));
        self.deadline = Some(deadline);
        Ok(deadline)
    }

    pub async fn heartbeat(&self, autoscaling: &dyn AutoscalingOps, metrics: &DrainMetrics) {
        send_heartbeat(autoscaling, &self.action, metrics).await;
    }

    pub fn envelope(&self) -> &LifecycleEnvelope {
        &self.envelope
    }

    pub fn into_envelope(self) -> LifecycleEnvelope {
        self.envelope
    }
}

/// Extend the hook timeout; failures are logged and left for the next invocation
pub async fn send_heartbeat(
    autoscaling: &dyn AutoscalingOps,
    action: &LifecycleAction,
    metrics: &DrainMetrics,
) {
    match autoscaling.record_lifecycle_action_heartbeat(action).await {
        Ok(()) => {
            metrics.inc_heartbeats();
            info!(
                instance_id = %action.instance_id,
                group = %action.group_name,
                "Sent lifecycle heartbeat"
            );
        }
        Err(e) => {
            metrics.inc_upstream_error(&e);
            warn!(
                instance_id = %action.instance_id,
                group = %action.group_name,
                error = %e,
                "Lifecycle heartbeat failed"
            );
        }
    }
}

/// Scan the cluster for the container instance running on the notification's host
async fn find_container_instance(
    cluster_ops: &dyn ClusterOps,
    cluster: &str,
    notification: &ScaleInNotification,
) -> DrainResult<String> {
    let instances = describe_all_container_instances(cluster_ops, cluster).await?;
    match instances
        .into_iter()
        .find(|i| i.ec2_instance_id == notification.ec2_instance_id)
    {
        Some(instance) => {
            info!(
                cluster = %cluster,
                ec2_instance_id = %notification.ec2_instance_id,
                container_instance_arn = %instance.container_instance_arn,
                "Resolved container instance"
            );
            Ok(instance.container_instance_arn)
        }
        None => {
            error!(
                cluster = %cluster,
                ec2_instance_id = %notification.ec2_instance_id,
                "No container instance found for EC2 instance"
            );
            Err(DrainError::NodeNotFound {
                cluster: cluster.to_string(),
                ec2_instance_id: notification.ec2_instance_id.clone(),
            })
        }
    }
}
