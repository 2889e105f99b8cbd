//! Lifecycle entry step
//!
//! Receives the raw scale-in notification, stamps the drain deadline and the
//! `init` phase, then starts one execution of the re-invocation workflow with
//! the stamped envelope as its input.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use super::LifecycleEventContext;
use crate::error::{DrainResult, UpstreamResult};
use crate::models::{LifecycleEnvelope, Phase};
use crate::observability::DrainMetrics;
use crate::ops::{AutoscalingOps, ClusterOps};

/// Workflow target used when `STATE_FUNCTION` is not set; only useful locally
pub const DEFAULT_STATE_FUNCTION: &str =
    "arn:aws:states:us-east-1:000000000000:stateMachine:fake_state_machine";

/// Starts executions of the external re-invocation workflow
#[async_trait]
pub trait WorkflowStarter: Send + Sync {
    /// Start `target` with `input`, returning the execution identifier
    async fn start_execution(&self, target: &str, input: &str) -> UpstreamResult<String>;
}

pub struct LifecycleInit {
    cluster: Arc<dyn ClusterOps>,
    autoscaling: Arc<dyn AutoscalingOps>,
    workflow: Arc<dyn WorkflowStarter>,
    target: String,
    metrics: DrainMetrics,
}

impl LifecycleInit {
    pub fn new(
        cluster: Arc<dyn ClusterOps>,
        autoscaling: Arc<dyn AutoscalingOps>,
        workflow: Arc<dyn WorkflowStarter>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            cluster,
            autoscaling,
            workflow,
            target: target.into(),
            metrics: DrainMetrics::new(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn start(&self, envelope: LifecycleEnvelope) -> DrainResult<LifecycleEnvelope> {
        self.start_at(envelope, Utc::now()).await
    }

    /// Stamp the envelope as of `now` and hand it to the workflow
    pub async fn start_at(
        &self,
        envelope: LifecycleEnvelope,
        now: DateTime<Utc>,
    ) -> DrainResult<LifecycleEnvelope> {
        let mut ctx = LifecycleEventContext::resolve(
            envelope,
            self.cluster.as_ref(),
            self.autoscaling.as_ref(),
            &self.metrics,
        )
        .await?;

        let deadline = ctx.stamp_deadline(now)?;
        ctx.set_phase(Phase::Init);
        let ec2_instance_id = ctx.ec2_instance_id().to_string();
        let envelope = ctx.into_envelope();
        let input = serde_json::to_string(&envelope)?;

        info!(
            ec2_instance_id = %ec2_instance_id,
            deadline = %deadline,
            target = %self.target,
            input = %input,
            "Starting drain workflow"
        );

        match self.workflow.start_execution(&self.target, &input).await {
            Ok(execution) => {
                info!(
                    ec2_instance_id = %ec2_instance_id,
                    execution = %execution,
                    "Drain workflow started"
                );
                Ok(envelope)
            }
            Err(e) => {
                self.metrics.inc_upstream_error(&e);
                error!(
                    ec2_instance_id = %ec2_instance_id,
                    target = %self.target,
                    error = %e,
                    "Failed to start drain workflow"
                );
                Err(e.into())
            }
        }
    }
}
