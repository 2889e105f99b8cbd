//! Drain state machine
//!
//! One call to [`DrainController::step_at`] performs exactly one transition
//! and returns the updated envelope for the workflow to deliver again:
//!
//! - `init` (or no phase): mark the node DRAINING, heartbeat, go to `retry`
//! - `retry`: heartbeat; once no RUNNING tasks remain or the deadline has
//!   passed, complete the lifecycle action and go to `end`
//! - `end`: terminal; a repeated delivery only re-checks and tolerates a
//!   duplicate completion

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::DrainResult;
use crate::lifecycle::LifecycleEventContext;
use crate::models::{LifecycleEnvelope, Phase};
use crate::observability::DrainMetrics;
use crate::ops::{AutoscalingOps, ClusterOps, DesiredStatus, InstanceStatus, LifecycleActionResult};

/// Why a step ended in the phase it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepReason {
    /// Node marked DRAINING
    DrainStarted,
    /// Marking the node failed transiently; `init` is retried
    DrainDeferred,
    /// Tasks still running before the deadline; `None` when the listing failed
    Waiting { remaining_tasks: Option<usize> },
    /// No RUNNING tasks left; lifecycle completed
    Drained,
    /// Deadline passed with tasks still running; lifecycle completed anyway
    DeadlineExceeded,
    /// Completion failed transiently; `retry` is repeated
    CompletionDeferred,
    /// Delivery after `end`; nothing new to do
    AlreadyEnded,
}

impl StepReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepReason::DrainStarted => "drain_started",
            StepReason::DrainDeferred => "drain_deferred",
            StepReason::Waiting { .. } => "waiting",
            StepReason::Drained => "drained",
            StepReason::DeadlineExceeded => "deadline_exceeded",
            StepReason::CompletionDeferred => "completion_deferred",
            StepReason::AlreadyEnded => "already_ended",
        }
    }
}

/// Result of one transition
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub phase: Phase,
    pub reason: StepReason,
    pub envelope: LifecycleEnvelope,
}

/// Drives a node from DRAINING to lifecycle completion
pub struct DrainController {
    cluster: Arc<dyn ClusterOps>,
    autoscaling: Arc<dyn AutoscalingOps>,
    metrics: DrainMetrics,
}

impl DrainController {
    pub fn new(cluster: Arc<dyn ClusterOps>, autoscaling: Arc<dyn AutoscalingOps>) -> Self {
        Self {
            cluster,
            autoscaling,
            metrics: DrainMetrics::new(),
        }
    }

    pub async fn step(&self, envelope: LifecycleEnvelope) -> DrainResult<StepOutcome> {
        self.step_at(envelope, Utc::now()).await
    }

    /// Perform one transition as of `now`
    pub async fn step_at(
        &self,
        envelope: LifecycleEnvelope,
        now: DateTime<Utc>,
    ) -> DrainResult<StepOutcome> {
        let mut ctx = LifecycleEventContext::resolve(
            envelope,
            self.cluster.as_ref(),
            self.autoscaling.as_ref(),
            &self.metrics,
        )
        .await?;

        let phase = ctx.phase();
        let deadline = ctx.stamp_deadline(now)?;
        info!(
            ec2_instance_id = %ctx.ec2_instance_id(),
            phase = phase.map(|p| p.as_str()).unwrap_or("none"),
            deadline = %deadline,
            "Handling drain step"
        );

        let (phase, reason) = match phase {
            None | Some(Phase::Init) => self.begin_drain(&mut ctx).await,
            Some(Phase::Retry) => self.poll(&mut ctx, now, deadline).await,
            Some(Phase::End) => self.revisit(&ctx, now, deadline).await,
        };

        self.metrics.inc_transition(phase, reason.as_str());
        Ok(StepOutcome {
            phase,
            reason,
            envelope: ctx.into_envelope(),
        })
    }

    async fn begin_drain(&self, ctx: &mut LifecycleEventContext) -> (Phase, StepReason) {
        let arns = [ctx.container_instance_arn().to_string()];
        match self
            .cluster
            .update_container_instances_state(ctx.cluster(), &arns, InstanceStatus::Draining)
            .await
        {
            Ok(()) => info!(
                ec2_instance_id = %ctx.ec2_instance_id(),
                container_instance_arn = %ctx.container_instance_arn(),
                "Set container instance to DRAINING"
            ),
            Err(e) if e.is_rejected() => {
                self.metrics.inc_upstream_error(&e);
                warn!(
                    ec2_instance_id = %ctx.ec2_instance_id(),
                    error = %e,
                    "DRAINING request rejected, assuming already draining"
                );
            }
            Err(e) => {
                self.metrics.inc_upstream_error(&e);
                error!(
                    ec2_instance_id = %ctx.ec2_instance_id(),
                    error = %e,
                    "Failed to set container instance to DRAINING"
                );
                ctx.set_phase(Phase::Init);
                return (Phase::Init, StepReason::DrainDeferred);
            }
        }

        ctx.heartbeat(self.autoscaling.as_ref(), &self.metrics).await;
        ctx.set_phase(Phase::Retry);
        (Phase::Retry, StepReason::DrainStarted)
    }

    async fn poll(
        &self,
        ctx: &mut LifecycleEventContext,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> (Phase, StepReason) {
        ctx.heartbeat(self.autoscaling.as_ref(), &self.metrics).await;

        let remaining = self.running_tasks(ctx).await;
        let reason = if remaining == Some(0) {
            info!(ec2_instance_id = %ctx.ec2_instance_id(), "No tasks running");
            StepReason::Drained
        } else if now > deadline {
            info!(
                ec2_instance_id = %ctx.ec2_instance_id(),
                deadline = %deadline,
                "Drain deadline passed, shutting node down"
            );
            StepReason::DeadlineExceeded
        } else {
            info!(
                ec2_instance_id = %ctx.ec2_instance_id(),
                remaining_tasks = ?remaining,
                "Tasks still running, checking back later"
            );
            return (Phase::Retry, StepReason::Waiting { remaining_tasks: remaining });
        };

        match self
            .autoscaling
            .complete_lifecycle_action(ctx.action(), LifecycleActionResult::Continue)
            .await
        {
            Ok(()) => info!(
                ec2_instance_id = %ctx.ec2_instance_id(),
                group = %ctx.action().group_name,
                "Completed lifecycle action"
            ),
            Err(e) if e.is_rejected() => {
                self.metrics.inc_upstream_error(&e);
                warn!(
                    ec2_instance_id = %ctx.ec2_instance_id(),
                    error = %e,
                    "Lifecycle completion rejected, assuming already completed"
                );
            }
            Err(e) => {
                self.metrics.inc_upstream_error(&e);
                error!(
                    ec2_instance_id = %ctx.ec2_instance_id(),
                    error = %e,
                    "Failed to complete lifecycle action"
                );
                return (Phase::Retry, StepReason::CompletionDeferred);
            }
        }

        ctx.set_phase(Phase::End);
        (Phase::End, reason)
    }

    async fn revisit(
        &self,
        ctx: &LifecycleEventContext,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> (Phase, StepReason) {
        warn!(
            ec2_instance_id = %ctx.ec2_instance_id(),
            "Drain step delivered after end"
        );
        ctx.heartbeat(self.autoscaling.as_ref(), &self.metrics).await;

        let remaining = self.running_tasks(ctx).await;
        if remaining == Some(0) || now > deadline {
            if let Err(e) = self
                .autoscaling
                .complete_lifecycle_action(ctx.action(), LifecycleActionResult::Continue)
                .await
            {
                self.metrics.inc_upstream_error(&e);
                warn!(
                    ec2_instance_id = %ctx.ec2_instance_id(),
                    error = %e,
                    "Duplicate lifecycle completion failed"
                );
            }
        }
        (Phase::End, StepReason::AlreadyEnded)
    }

    /// Count of RUNNING tasks on the node, or `None` when the listing failed
    async fn running_tasks(&self, ctx: &LifecycleEventContext) -> Option<usize> {
        match self
            .cluster
            .list_tasks(
                ctx.cluster(),
                ctx.container_instance_arn(),
                DesiredStatus::Running,
            )
            .await
        {
            Ok(tasks) => Some(tasks.len()),
            Err(e) => {
                self.metrics.inc_upstream_error(&e);
                error!(
                    ec2_instance_id = %ctx.ec2_instance_id(),
                    error = %e,
                    "Failed to list running tasks"
                );
                None
            }
        }
    }
}
