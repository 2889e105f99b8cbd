//! HTTP clients for the upstream AWS APIs
//!
//! ECS speaks JSON 1.1, Step Functions JSON 1.0 and Auto Scaling the Query
//! protocol. Requests are sent unsigned: the configured endpoints are
//! expected to be a signing proxy or a local emulator.
//!
//! Every failure is classified as an [`UpstreamError`]:
//! - transport errors, timeouts, 429, 5xx and throttling faults are `Transient`
//! - any other non-success status is `Rejected`
//! - an undecodable success body is `Decode`

mod autoscaling;
mod ecs;
mod stepfunctions;

pub use autoscaling::AutoscalingClient;
pub use ecs::EcsClient;
pub use stepfunctions::StepFunctionsClient;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{DrainError, DrainResult, UpstreamError, UpstreamResult};

const JSON_1_0: &str = "application/x-amz-json-1.0";
const JSON_1_1: &str = "application/x-amz-json-1.1";

/// Endpoints and timeouts for the upstream clients
#[derive(Debug, Clone)]
pub struct AwsClientConfig {
    pub region: String,
    pub ecs_endpoint: String,
    pub autoscaling_endpoint: String,
    pub stepfunctions_endpoint: String,
    pub request_timeout: Duration,
}

impl AwsClientConfig {
    /// Public regional endpoints for `region`
    pub fn for_region(region: &str) -> Self {
        Self {
            region: region.to_string(),
            ecs_endpoint: format!("https://ecs.{}.amazonaws.com", region),
            autoscaling_endpoint: format!("https://autoscaling.{}.amazonaws.com", region),
            stepfunctions_endpoint: format!("https://states.{}.amazonaws.com", region),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// The three upstream clients, sharing one connection pool
#[derive(Clone)]
pub struct AwsClients {
    pub ecs: Arc<EcsClient>,
    pub autoscaling: Arc<AutoscalingClient>,
    pub stepfunctions: Arc<StepFunctionsClient>,
}

impl AwsClients {
    pub fn new(config: &AwsClientConfig) -> DrainResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DrainError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            ecs: Arc::new(EcsClient::new(WireClient::new(
                http.clone(),
                &config.ecs_endpoint,
            )?)),
            autoscaling: Arc::new(AutoscalingClient::new(WireClient::new(
                http.clone(),
                &config.autoscaling_endpoint,
            )?)),
            stepfunctions: Arc::new(StepFunctionsClient::new(WireClient::new(
                http,
                &config.stepfunctions_endpoint,
            )?)),
        })
    }
}

/// One endpoint plus the shared HTTP client
#[derive(Clone)]
pub(crate) struct WireClient {
    http: Client,
    endpoint: Url,
}

impl WireClient {
    pub(crate) fn new(http: Client, endpoint: &str) -> DrainResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| DrainError::Configuration(format!("endpoint {:?}: {}", endpoint, e)))?;
        Ok(Self { http, endpoint })
    }

    /// POST an AWS JSON request with `X-Amz-Target: {target}`
    pub(crate) async fn call_json<B, T>(
        &self,
        operation: &'static str,
        target: &str,
        content_type: &'static str,
        body: &B,
    ) -> UpstreamResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)
            .map_err(|e| UpstreamError::decode(operation, format!("request body: {}", e)))?;

        debug!(operation = operation, endpoint = %self.endpoint, "Calling upstream");
        let response = self
            .http
            .post(self.endpoint.clone())
            .header("X-Amz-Target", target)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(payload)
            .send()
            .await
            .map_err(|e| UpstreamError::transient(operation, e.to_string()))?;

        let text = Self::check(operation, response).await?;
        serde_json::from_str(&text).map_err(|e| UpstreamError::decode(operation, e.to_string()))
    }

    /// POST a Query-protocol request; returns the raw response body
    pub(crate) async fn call_query(
        &self,
        operation: &'static str,
        params: &[(&str, &str)],
    ) -> UpstreamResult<String> {
        debug!(operation = operation, endpoint = %self.endpoint, "Calling upstream");
        let response = self
            .http
            .post(self.endpoint.clone())
            .form(params)
            .send()
            .await
            .map_err(|e| UpstreamError::transient(operation, e.to_string()))?;

        Self::check(operation, response).await
    }

    async fn check(operation: &'static str, response: reqwest::Response) -> UpstreamResult<String> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::transient(operation, e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(classify(operation, status, &body))
        }
    }
}

/// Map a non-success response to transient or rejected
pub(crate) fn classify(operation: &'static str, status: StatusCode, body: &str) -> UpstreamError {
    let message = format!("{}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || body.contains("Throttl")
    {
        UpstreamError::transient(operation, message)
    } else {
        UpstreamError::rejected(operation, message)
    }
}
