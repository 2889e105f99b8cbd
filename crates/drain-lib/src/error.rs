//! Error types for the drain agent

use thiserror::Error;

/// Failure of a single call to an upstream AWS API
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// Throttling, server-side failure or transport error; retrying later may succeed
    #[error("{operation} failed transiently: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },

    /// The request was refused, usually because the effect already happened
    #[error("{operation} rejected: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    /// The response could not be decoded
    #[error("{operation} returned an undecodable response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },
}

impl UpstreamError {
    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            operation,
            message: message.into(),
        }
    }

    pub fn rejected(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            message: message.into(),
        }
    }

    pub fn decode(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            operation,
            message: message.into(),
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::Transient { operation, .. }
            | Self::Rejected { operation, .. }
            | Self::Decode { operation, .. } => operation,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Rejected { .. } => "rejected",
            Self::Decode { .. } => "decode",
        }
    }

    /// True when the upstream refused the call and a retry would be refused too
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Errors surfaced by the lifecycle handlers and the capacity estimator
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("invalid lifecycle payload: {0}")]
    InvalidEnvelope(String),

    #[error("invalid drain timeout {0:?}: expected an integer with an s, m or h suffix")]
    InvalidTimeout(String),

    #[error("invalid drain deadline {0:?}")]
    InvalidDeadline(String),

    #[error("no container instance in cluster {cluster} for EC2 instance {ec2_instance_id}")]
    NodeNotFound {
        cluster: String,
        ec2_instance_id: String,
    },

    #[error("invalid client configuration: {0}")]
    Configuration(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DrainError {
    /// Errors a later re-invocation of the same payload could get past
    pub fn is_retryable(&self) -> bool {
        matches!(self, DrainError::Upstream(e) if !e.is_rejected())
    }
}

pub type DrainResult<T> = Result<T, DrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_labels() {
        let err = UpstreamError::transient("ListTasks", "503 Service Unavailable");
        assert_eq!(err.operation(), "ListTasks");
        assert_eq!(err.kind(), "transient");
        assert!(!err.is_rejected());
        assert_eq!(
            err.to_string(),
            "ListTasks failed transiently: 503 Service Unavailable"
        );
    }

    #[test]
    fn test_retryable_classification() {
        let transient: DrainError = UpstreamError::transient("ListTasks", "timeout").into();
        assert!(transient.is_retryable());

        let rejected: DrainError =
            UpstreamError::rejected("CompleteLifecycleAction", "no active action").into();
        assert!(!rejected.is_retryable());

        let missing = DrainError::NodeNotFound {
            cluster: "prod".to_string(),
            ec2_instance_id: "i-1".to_string(),
        };
        assert!(!missing.is_retryable());
    }
}
