//! Agent configuration
//!
//! Read from `DRAIN_*` environment variables. The workflow target also honours
//! the bare `STATE_FUNCTION` variable used by the lifecycle hook deployment.

use std::time::Duration;

use anyhow::{Context, Result};
use drain_lib::aws::AwsClientConfig;
use drain_lib::capacity::CapacityScheduleConfig;
use drain_lib::lifecycle::DEFAULT_STATE_FUNCTION;
use serde::Deserialize;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// API server port for lifecycle handlers, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_region")]
    pub region: String,

    /// Override for the ECS endpoint (signing proxy or emulator)
    #[serde(default)]
    pub ecs_endpoint: Option<String>,

    #[serde(default)]
    pub autoscaling_endpoint: Option<String>,

    #[serde(default)]
    pub stepfunctions_endpoint: Option<String>,

    /// Upstream request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Comma-separated clusters estimated on a timer
    #[serde(default)]
    pub capacity_clusters: String,

    #[serde(default = "default_estimate_interval")]
    pub estimate_interval_secs: u64,

    /// Workflow started for every scale-in notification
    #[serde(default = "default_state_function")]
    pub state_function: String,
}

fn default_api_port() -> u16 {
    8080
}

fn default_region() -> String {
    std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string())
}

fn default_request_timeout() -> u64 {
    10
}

fn default_estimate_interval() -> u64 {
    60
}

fn default_state_function() -> String {
    std::env::var("STATE_FUNCTION").unwrap_or_else(|_| DEFAULT_STATE_FUNCTION.to_string())
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("DRAIN"))
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid DRAIN_* configuration")
    }

    pub fn clusters(&self) -> Vec<String> {
        self.capacity_clusters
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn aws(&self) -> AwsClientConfig {
        let mut aws = AwsClientConfig::for_region(&self.region);
        if let Some(endpoint) = &self.ecs_endpoint {
            aws.ecs_endpoint = endpoint.clone();
        }
        if let Some(endpoint) = &self.autoscaling_endpoint {
            aws.autoscaling_endpoint = endpoint.clone();
        }
        if let Some(endpoint) = &self.stepfunctions_endpoint {
            aws.stepfunctions_endpoint = endpoint.clone();
        }
        aws.request_timeout = Duration::from_secs(self.request_timeout_secs);
        aws
    }

    pub fn capacity_schedule(&self) -> CapacityScheduleConfig {
        CapacityScheduleConfig {
            interval: Duration::from_secs(self.estimate_interval_secs.max(1)),
            clusters: self.clusters(),
        }
    }
}
