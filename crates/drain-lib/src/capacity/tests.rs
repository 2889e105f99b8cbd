//! Capacity estimation tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::*;
use crate::error::{DrainError, UpstreamError, UpstreamResult};
use crate::models::{ContainerDefinition, Service, TaskDefinition};
use crate::observability::StructuredLogger;
use crate::testing::MockCluster;

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(String, f64)>>,
    fail: bool,
}

#[async_trait]
impl HeadroomPublisher for RecordingPublisher {
    async fn publish(&self, report: &CapacityReport) -> UpstreamResult<()> {
        if self.fail {
            return Err(UpstreamError::transient("PutMetricData", "503"));
        }
        self.published
            .lock()
            .unwrap()
            .push((report.cluster.clone(), report.headroom));
        Ok(())
    }
}

fn requirement(name: &str, cpu: u64, memory: u64, desired: u64) -> ServiceRequirement {
    ServiceRequirement {
        name: name.to_string(),
        desired,
        running: desired,
        containers: vec![ContainerRequirement {
            name: format!("{}-0", name),
            cpu,
            memory,
        }],
        cpu_per_task: cpu,
        memory_per_task: memory,
        cpu_requirement: cpu * desired,
        memory_requirement: memory * desired,
    }
}

fn node(free_cpu: u64, free_memory: u64) -> NodeResources {
    NodeResources {
        free_cpu,
        free_memory,
    }
}

#[tokio::test]
async fn test_no_services_reports_sentinel() {
    let cluster = Arc::new(MockCluster::new());
    cluster.add_node("i-1", 1024, 2048);
    let estimator = CapacityEstimator::new(cluster);

    let report = estimator.estimate("prod").await.unwrap();

    assert_eq!(report.headroom, HEADROOM_SENTINEL);
    assert_eq!(report.occupancy, 0.0);
    assert_eq!(report.desired_tasks, 0);
    assert!(report.largest_service.is_none());
    assert_eq!(report.cpu.total, 1024);
}

#[tokio::test]
async fn test_single_node_fits_two_tasks() {
    let cluster = Arc::new(MockCluster::new());
    cluster.add_node("i-1", 512, 1024);
    cluster.add_service("web", 3, &[(256, 512)]);
    let estimator = CapacityEstimator::new(cluster);

    let report = estimator.estimate("prod").await.unwrap();

    assert_eq!(report.headroom, 2.0);
    assert_eq!(report.desired_tasks, 3);
    assert!((report.occupancy - 0.6).abs() < 1e-9);
    assert_eq!(report.required.cpu, 768);
    assert_eq!(report.required.memory, 1536);
}

#[tokio::test]
async fn test_headroom_sums_fractional_fits_across_nodes() {
    let cluster = Arc::new(MockCluster::new());
    cluster.add_node("i-1", 512, 1024);
    // CPU allows 1.5 tasks, memory allows 4
    cluster.add_node("i-2", 384, 2048);
    cluster.add_service("web", 1, &[(256, 512)]);
    let estimator = CapacityEstimator::new(cluster);

    let report = estimator.estimate("prod").await.unwrap();

    assert_eq!(report.nodes.len(), 2);
    assert_eq!(report.headroom, 3.5);
    assert_eq!(report.cpu.free, 896);
    assert_eq!(report.memory.free, 3072);
}

#[test]
fn test_largest_service_tie_goes_to_last() {
    let services = vec![
        requirement("api", 512, 1024, 1),
        requirement("worker", 128, 2048, 1),
        requirement("batch", 256, 2048, 1),
        requirement("cron", 64, 256, 1),
    ];

    let largest = largest_service(&services).unwrap();

    assert_eq!(largest.name, "batch");
}

#[test]
fn test_occupancy_matches_report_fields() {
    let snapshot = ResourceSnapshot {
        nodes: vec![node(1024, 1024), node(256, 4096)],
        ..Default::default()
    };
    let services = vec![
        requirement("api", 256, 512, 4),
        requirement("worker", 128, 256, 2),
    ];

    let report = CapacityReport::build("prod", snapshot, services);

    assert_eq!(report.headroom, 3.0);
    assert_eq!(
        report.occupancy,
        occupancy_of(report.desired_tasks, report.headroom)
    );
    assert!((report.occupancy - 6.0 / 9.0).abs() < 1e-9);
}

#[test]
fn test_zero_dimension_does_not_constrain() {
    let nodes = vec![node(0, 1024)];

    let memory_only = requirement("sidecar", 0, 512, 1);
    assert_eq!(headroom_for(&nodes, Some(&memory_only)), 2.0);

    let weightless = requirement("noop", 0, 0, 1);
    assert_eq!(headroom_for(&nodes, Some(&weightless)), HEADROOM_SENTINEL);
}

#[test]
fn test_occupancy_without_capacity_or_demand() {
    assert_eq!(occupancy_of(0, 0.0), 0.0);
    assert_eq!(occupancy_of(5, 0.0), 1.0);
}

#[test]
fn test_requirement_uses_larger_memory_setting() {
    let service = Service {
        service_name: "web".to_string(),
        service_arn: None,
        task_definition: "web:3".to_string(),
        desired_count: 2,
        running_count: 1,
        pending_count: 1,
    };
    let definition = TaskDefinition {
        task_definition_arn: None,
        container_definitions: vec![
            ContainerDefinition {
                name: "app".to_string(),
                cpu: 256,
                memory: Some(256),
                memory_reservation: Some(512),
            },
            ContainerDefinition {
                name: "proxy".to_string(),
                cpu: 0,
                memory: None,
                memory_reservation: None,
            },
        ],
    };

    let requirement = ServiceRequirement::from_definition(&service, &definition);

    assert_eq!(requirement.running, 2);
    assert_eq!(requirement.cpu_per_task, 256);
    assert_eq!(requirement.memory_per_task, 512);
    assert_eq!(requirement.memory_requirement, 1024);
    assert_eq!(requirement.containers[1].memory, 0);
}

#[tokio::test]
async fn test_services_are_described_in_batches_of_ten() {
    let cluster = Arc::new(MockCluster::new().with_page_size(7));
    cluster.add_node("i-1", 4096, 8192);
    for i in 0..23 {
        cluster.add_service(&format!("svc-{}", i), 1, &[(64, 128)]);
    }
    let estimator = CapacityEstimator::new(cluster.clone());

    let report = estimator.estimate("prod").await.unwrap();

    assert_eq!(report.services.len(), 23);
    assert_eq!(cluster.service_describe_batches(), vec![10, 10, 3]);
    assert_eq!(cluster.calls("DescribeTaskDefinition"), 23);
}

#[tokio::test]
async fn test_shared_task_definition_is_described_once() {
    let cluster = Arc::new(MockCluster::new());
    cluster.add_node("i-1", 4096, 8192);
    cluster.add_service_with_task_definition("web-blue", 2, "td-web:7", &[(256, 512)]);
    cluster.add_service_with_task_definition("web-green", 3, "td-web:7", &[(256, 512)]);
    let estimator = CapacityEstimator::new(cluster.clone());

    let report = estimator.estimate("prod").await.unwrap();

    assert_eq!(cluster.calls("DescribeTaskDefinition"), 1);
    assert_eq!(report.services.len(), 2);
    for service in &report.services {
        assert_eq!(service.cpu_per_task, 256);
        assert_eq!(service.memory_per_task, 512);
    }
    assert_eq!(report.desired_tasks, 5);
}

#[tokio::test]
async fn test_upstream_failure_aborts_estimate() {
    let cluster = Arc::new(MockCluster::new());
    cluster.add_node("i-1", 512, 1024);
    cluster.fail(
        "DescribeServices",
        UpstreamError::transient("DescribeServices", "throttled"),
    );
    let estimator = CapacityEstimator::new(cluster);

    let err = estimator.estimate("prod").await.unwrap_err();

    assert!(matches!(err, DrainError::Upstream(_)));
    assert!(err.is_retryable());
}

#[test]
fn test_report_json_has_sorted_keys() {
    let json = CapacityReport::empty("prod").to_pretty_json().unwrap();

    let position = |key: &str| json.find(&format!("\"{}\"", key)).unwrap();
    assert!(position("cluster") < position("cpu"));
    assert!(position("cpu") < position("desired_tasks"));
    assert!(position("headroom") < position("largest_service"));
    assert!(position("occupancy") < position("services"));
    assert!(json.contains('\n'));
}

#[tokio::test]
async fn test_publish_failure_still_returns_report() {
    let cluster = Arc::new(MockCluster::new());
    cluster.add_node("i-1", 512, 1024);
    let estimator = CapacityEstimator::new(cluster);
    let publisher = RecordingPublisher {
        fail: true,
        ..Default::default()
    };

    let report = estimator
        .estimate_and_publish("prod", &publisher)
        .await
        .unwrap();

    assert_eq!(report.headroom, HEADROOM_SENTINEL);
}

#[tokio::test]
async fn test_loop_publishes_each_cluster() {
    let cluster = Arc::new(MockCluster::new());
    cluster.add_node("i-1", 512, 1024);
    cluster.add_service("web", 1, &[(256, 512)]);
    let publisher = Arc::new(RecordingPublisher::default());
    let capacity_loop = CapacityLoop::new(
        Arc::new(CapacityEstimator::new(cluster)),
        publisher.clone(),
        StructuredLogger::new("us-east-1"),
        CapacityScheduleConfig {
            clusters: vec!["prod".to_string(), "staging".to_string()],
            ..Default::default()
        },
    );

    let estimated = capacity_loop.run_once().await;

    assert_eq!(estimated, 2);
    let published = publisher.published.lock().unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0], ("prod".to_string(), 2.0));
    assert_eq!(published[1].0, "staging");
}

#[tokio::test]
async fn test_loop_stops_on_shutdown() {
    let publisher = Arc::new(RecordingPublisher::default());
    let capacity_loop = CapacityLoop::new(
        Arc::new(CapacityEstimator::new(Arc::new(MockCluster::new()))),
        publisher,
        StructuredLogger::new("us-east-1"),
        CapacityScheduleConfig {
            interval: std::time::Duration::from_millis(10),
            clusters: vec!["prod".to_string()],
        },
    );
    let (tx, rx) = tokio::sync::broadcast::channel(1);

    let handle = tokio::spawn(capacity_loop.run(rx));
    tx.send(()).unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}
