//! Auto Scaling client (Query protocol)

use async_trait::async_trait;

use super::WireClient;
use crate::error::UpstreamResult;
use crate::ops::{AutoscalingOps, LifecycleAction, LifecycleActionResult};

const API_VERSION: &str = "2011-01-01";

pub struct AutoscalingClient {
    wire: WireClient,
}

impl AutoscalingClient {
    pub(crate) fn new(wire: WireClient) -> Self {
        Self { wire }
    }

    fn action_params<'a>(
        action: &'static str,
        lifecycle: &'a LifecycleAction,
    ) -> Vec<(&'static str, &'a str)> {
        vec![
            ("Action", action),
            ("Version", API_VERSION),
            ("AutoScalingGroupName", lifecycle.group_name.as_str()),
            ("LifecycleHookName", lifecycle.hook_name.as_str()),
            ("LifecycleActionToken", lifecycle.token.as_str()),
            ("InstanceId", lifecycle.instance_id.as_str()),
        ]
    }
}

#[async_trait]
impl AutoscalingOps for AutoscalingClient {
    async fn record_lifecycle_action_heartbeat(
        &self,
        action: &LifecycleAction,
    ) -> UpstreamResult<()> {
        let operation = "RecordLifecycleActionHeartbeat";
        let params = Self::action_params(operation, action);
        self.wire.call_query(operation, &params).await.map(|_| ())
    }

    async fn complete_lifecycle_action(
        &self,
        action: &LifecycleAction,
        result: LifecycleActionResult,
    ) -> UpstreamResult<()> {
        let operation = "CompleteLifecycleAction";
        let mut params = Self::action_params(operation, action);
        params.push(("LifecycleActionResult", result.as_str()));
        self.wire.call_query(operation, &params).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn action() -> LifecycleAction {
        LifecycleAction {
            hook_name: "drain-hook".to_string(),
            group_name: "ecs-asg".to_string(),
            token: "token-1".to_string(),
            instance_id: "i-0abc".to_string(),
        }
    }

    fn client(server: &mockito::Server) -> AutoscalingClient {
        AutoscalingClient::new(WireClient::new(reqwest::Client::new(), &server.url()).unwrap())
    }

    #[tokio::test]
    async fn test_heartbeat_form_encoding() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("Action".into(), "RecordLifecycleActionHeartbeat".into()),
                Matcher::UrlEncoded("Version".into(), "2011-01-01".into()),
                Matcher::UrlEncoded("AutoScalingGroupName".into(), "ecs-asg".into()),
                Matcher::UrlEncoded("LifecycleHookName".into(), "drain-hook".into()),
                Matcher::UrlEncoded("LifecycleActionToken".into(), "token-1".into()),
                Matcher::UrlEncoded("InstanceId".into(), "i-0abc".into()),
            ]))
            .with_status(200)
            .with_body("<RecordLifecycleActionHeartbeatResponse/>")
            .create_async()
            .await;

        client(&server)
            .record_lifecycle_action_heartbeat(&action())
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_sends_continue() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("Action".into(), "CompleteLifecycleAction".into()),
                Matcher::UrlEncoded("LifecycleActionResult".into(), "CONTINUE".into()),
            ]))
            .with_status(200)
            .with_body("<CompleteLifecycleActionResponse/>")
            .create_async()
            .await;

        client(&server)
            .complete_lifecycle_action(&action(), LifecycleActionResult::Continue)
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_lifecycle_action_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(400)
            .with_body(
                "<ErrorResponse><Error><Code>ValidationError</Code>\
                 <Message>No active Lifecycle Action found with instance ID i-0abc</Message>\
                 </Error></ErrorResponse>",
            )
            .create_async()
            .await;

        let err = client(&server)
            .complete_lifecycle_action(&action(), LifecycleActionResult::Continue)
            .await
            .unwrap_err();

        assert!(err.is_rejected());
        assert_eq!(err.operation(), "CompleteLifecycleAction");
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(503)
            .create_async()
            .await;

        let err = client(&server)
            .record_lifecycle_action_heartbeat(&action())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "transient");
    }
}
