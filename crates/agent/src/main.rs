//! ECS drain agent
//!
//! Hosts the lifecycle-hook handlers behind an HTTP API and estimates
//! cluster headroom on a timer.

use std::sync::Arc;

use anyhow::{Context, Result};
use drain_lib::{
    aws::AwsClients,
    capacity::{CapacityEstimator, CapacityLoop, HeadroomPublisher},
    observability::{DrainMetrics, StructuredLogger},
    DrainController, LifecycleInit,
};
use ecs_drain_agent::{api, config::AgentConfig};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = AgentConfig::load()?;
    let logger = StructuredLogger::new(&config.region);
    logger.log_startup(AGENT_VERSION, &config.state_function);

    let clients = AwsClients::new(&config.aws()).context("Failed to build AWS clients")?;
    let metrics = DrainMetrics::new();
    let publisher: Arc<dyn HeadroomPublisher> = Arc::new(metrics);

    let estimator = Arc::new(CapacityEstimator::new(clients.ecs.clone()));
    let app_state = Arc::new(api::AppState {
        init: Arc::new(LifecycleInit::new(
            clients.ecs.clone(),
            clients.autoscaling.clone(),
            clients.stepfunctions.clone(),
            config.state_function.clone(),
        )),
        controller: Arc::new(DrainController::new(
            clients.ecs.clone(),
            clients.autoscaling.clone(),
        )),
        estimator: estimator.clone(),
        publisher: publisher.clone(),
        logger: logger.clone(),
    });

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let capacity_loop = CapacityLoop::new(
        estimator,
        publisher,
        logger.clone(),
        config.capacity_schedule(),
    );
    let loop_handle = tokio::spawn(capacity_loop.run(shutdown_tx.subscribe()));

    let mut api_shutdown = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = api_shutdown.recv().await;
    }));

    let waited = api::wait_for_shutdown(tokio::signal::ctrl_c(), api_handle).await;
    logger.log_shutdown(if waited.is_ok() {
        "SIGINT received"
    } else {
        "API server stopped"
    });
    let _ = shutdown_tx.send(());

    if let Err(e) = loop_handle.await {
        error!(error = %e, "Capacity loop task failed");
    }
    match waited?.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
