//! Integration tests for the agent API endpoints

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use drain_lib::{
    testing::{notification_envelope, MockAutoscaling, MockCluster},
    CapacityEstimator, DrainController, DrainMetrics, HeadroomPublisher, LifecycleInit,
    StructuredLogger, UpstreamError, UpstreamResult, WorkflowStarter,
};
use ecs_drain_agent::api::{create_router, serve, wait_for_shutdown, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

#[derive(Default)]
struct RecordingWorkflow {
    inputs: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl WorkflowStarter for RecordingWorkflow {
    async fn start_execution(&self, target: &str, input: &str) -> UpstreamResult<String> {
        if self.fail {
            return Err(UpstreamError::transient("StartExecution", "503"));
        }
        self.inputs.lock().unwrap().push(input.to_string());
        Ok(format!("{}:execution", target))
    }
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    cluster: Arc<MockCluster>,
    workflow: Arc<RecordingWorkflow>,
}

fn setup_test_app(workflow_fails: bool) -> TestApp {
    let cluster = Arc::new(MockCluster::new());
    cluster.add_node("i-0abc", 512, 1024);
    let autoscaling = Arc::new(MockAutoscaling::new());
    let workflow = Arc::new(RecordingWorkflow {
        fail: workflow_fails,
        ..Default::default()
    });
    let publisher: Arc<dyn HeadroomPublisher> = Arc::new(DrainMetrics::new());

    let state = Arc::new(AppState {
        init: Arc::new(LifecycleInit::new(
            cluster.clone(),
            autoscaling.clone(),
            workflow.clone(),
            "arn:aws:states:us-east-1:1:stateMachine:drain",
        )),
        controller: Arc::new(DrainController::new(cluster.clone(), autoscaling)),
        estimator: Arc::new(CapacityEstimator::new(cluster.clone())),
        publisher,
        logger: StructuredLogger::new("us-east-1"),
    });

    TestApp {
        router: create_router(state.clone()),
        state,
        cluster,
        workflow,
    }
}

async fn post_json(router: Router, uri: &str, payload: &Value) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

async fn get(router: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn notification(ec2_instance_id: &str, timeout: &str) -> Value {
    serde_json::to_value(notification_envelope(ec2_instance_id, timeout)).unwrap()
}

#[tokio::test]
async fn test_healthz_returns_ok() {
    let app = setup_test_app(false);

    let (status, body) = get(app.router, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_notify_starts_workflow_with_stamped_payload() {
    let app = setup_test_app(false);

    let (status, body) = post_json(
        app.router,
        "/lifecycle/notify",
        &notification("i-0abc", "5m"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "init");
    assert!(body["endtime"].is_string());
    assert!(body["containerInstanceArn"]
        .as_str()
        .unwrap()
        .ends_with("i-0abc"));

    let inputs = app.workflow.inputs.lock().unwrap();
    assert_eq!(inputs.len(), 1);
    let input: Value = serde_json::from_str(&inputs[0]).unwrap();
    assert_eq!(input, body);
}

#[tokio::test]
async fn test_notify_workflow_failure_is_500() {
    let app = setup_test_app(true);

    let (status, body) = post_json(
        app.router,
        "/lifecycle/notify",
        &notification("i-0abc", "5m"),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn test_notify_rejects_payload_without_records() {
    let app = setup_test_app(false);

    let (status, body) = post_json(
        app.router,
        "/lifecycle/notify",
        &json!({ "state": "retry" }),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_step_marks_node_draining() {
    let app = setup_test_app(false);

    let (status, body) = post_json(
        app.router,
        "/lifecycle/step",
        &notification("i-0abc", "5m"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "retry");
    assert_eq!(body["Records"][0]["EventSource"], "state_machine:retry");
    assert_eq!(app.cluster.drained().len(), 1);
}

#[tokio::test]
async fn test_step_unknown_node_is_404() {
    let app = setup_test_app(false);

    let (status, _) = post_json(
        app.router,
        "/lifecycle/step",
        &notification("i-missing", "5m"),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_step_invalid_timeout_is_422() {
    let app = setup_test_app(false);

    let (status, _) = post_json(
        app.router,
        "/lifecycle/step",
        &notification("i-0abc", "soon"),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_step_upstream_failure_is_500() {
    let app = setup_test_app(false);
    app.cluster.fail(
        "ListContainerInstances",
        UpstreamError::transient("ListContainerInstances", "503"),
    );

    let (status, _) = post_json(
        app.router,
        "/lifecycle/step",
        &notification("i-0abc", "5m"),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_capacity_report_for_cluster() {
    let app = setup_test_app(false);
    app.cluster.add_service("web", 2, &[(256, 512)]);

    let (status, body) = get(app.router, "/capacity/api-test").await;

    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(report["cluster"], "api-test");
    assert_eq!(report["headroom"], 2.0);
    assert_eq!(report["desired_tasks"], 2);
    assert_eq!(report["largest_service"]["name"], "web");
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_headroom() {
    let app = setup_test_app(false);
    let (status, _) = get(app.router.clone(), "/capacity/metrics-test").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(app.router, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("ecs_drain_additional_tasks{cluster=\"metrics-test\"}"));
}

#[tokio::test]
async fn test_bind_failure_ends_shutdown_wait() {
    let app = setup_test_app(false);
    let held = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
    let port = held.local_addr().unwrap().port();

    let server = tokio::spawn(serve(port, app.state, std::future::pending()));
    let waited = tokio::time::timeout(
        Duration::from_secs(5),
        wait_for_shutdown(std::future::pending(), server),
    )
    .await
    .expect("server failure should end the wait");

    assert!(waited.is_err());
}

#[tokio::test]
async fn test_signal_returns_running_server() {
    let server = tokio::spawn(std::future::pending::<anyhow::Result<()>>());

    let handle = wait_for_shutdown(async { Ok(()) }, server).await.unwrap();

    assert!(!handle.is_finished());
    handle.abort();
}
