//! Step Functions client (AWS JSON 1.0)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{WireClient, JSON_1_0};
use crate::error::UpstreamResult;
use crate::lifecycle::WorkflowStarter;

pub struct StepFunctionsClient {
    wire: WireClient,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartExecutionResponse {
    execution_arn: String,
}

impl StepFunctionsClient {
    pub(crate) fn new(wire: WireClient) -> Self {
        Self { wire }
    }
}

#[async_trait]
impl WorkflowStarter for StepFunctionsClient {
    async fn start_execution(&self, target: &str, input: &str) -> UpstreamResult<String> {
        let response: StartExecutionResponse = self
            .wire
            .call_json(
                "StartExecution",
                "AWSStepFunctions.StartExecution",
                JSON_1_0,
                &json!({ "stateMachineArn": target, "input": input }),
            )
            .await?;
        Ok(response.execution_arn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_start_execution_request_shape() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("x-amz-target", "AWSStepFunctions.StartExecution")
            .match_header("content-type", JSON_1_0)
            .match_body(Matcher::Json(json!({
                "stateMachineArn": "arn:aws:states:us-east-1:1:stateMachine:drain",
                "input": "{\"state\":\"init\"}",
            })))
            .with_status(200)
            .with_body(r#"{"executionArn":"arn:aws:states:us-east-1:1:execution:drain:abc","startDate":1.7e9}"#)
            .create_async()
            .await;
        let client =
            StepFunctionsClient::new(WireClient::new(reqwest::Client::new(), &server.url()).unwrap());

        let execution = client
            .start_execution(
                "arn:aws:states:us-east-1:1:stateMachine:drain",
                r#"{"state":"init"}"#,
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(execution, "arn:aws:states:us-east-1:1:execution:drain:abc");
    }

    #[tokio::test]
    async fn test_missing_state_machine_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(400)
            .with_body(r#"{"__type":"StateMachineDoesNotExist","message":"State Machine Does Not Exist"}"#)
            .create_async()
            .await;
        let client =
            StepFunctionsClient::new(WireClient::new(reqwest::Client::new(), &server.url()).unwrap());

        let err = client.start_execution("arn:missing", "{}").await.unwrap_err();

        assert!(err.is_rejected());
        assert_eq!(err.operation(), "StartExecution");
    }
}
