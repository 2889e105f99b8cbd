//! Core library for the ECS drain agent
//!
//! This crate provides:
//! - Lifecycle-hook handling for ECS container instances being scaled in
//! - The drain state machine driven by an external re-invocation workflow
//! - Cluster capacity (headroom) estimation
//! - AWS wire clients and observability

pub mod aws;
pub mod capacity;
pub mod drain;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod ops;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use capacity::{CapacityEstimator, CapacityReport, HeadroomPublisher, HEADROOM_SENTINEL};
pub use drain::{DrainController, StepOutcome, StepReason};
pub use error::{DrainError, DrainResult, UpstreamError, UpstreamResult};
pub use lifecycle::{LifecycleInit, WorkflowStarter};
pub use models::*;
pub use observability::{DrainMetrics, StructuredLogger};
pub use ops::{AutoscalingOps, ClusterOps};
