//! Scale-in lifecycle handling
//!
//! This module provides:
//! - Decoding of the lifecycle notification envelope and node resolution
//! - Lifecycle hook heartbeats
//! - The entry step that stamps the drain deadline and starts the
//!   re-invocation workflow

mod context;
mod init;

pub use context::{
    format_deadline, parse_deadline, parse_drain_timeout, send_heartbeat, LifecycleEventContext,
    DRAIN_GRACE_SECS,
};
pub use init::{LifecycleInit, WorkflowStarter, DEFAULT_STATE_FUNCTION};
