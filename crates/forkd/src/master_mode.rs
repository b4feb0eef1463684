//! Master mode: supervisor, front proxy, and the health/metrics surface.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use forkgrid_balancer::LoadBalancer;
use forkgrid_core::ClusterConfig;
use forkgrid_master::Supervisor;
use forkgrid_pool::ProcessSpawner;
use forkgrid_worker::{AppServer, HttpApp, demo_router};

use crate::signals;

pub async fn run_master(config: ClusterConfig) -> anyhow::Result<()> {
    if !config.enable_clustering {
        return run_in_process(&config).await;
    }
    info!(
        port = config.port,
        health_check_port = config.health_check_port,
        strategy = ?config.balance_strategy(),
        "forkgrid master starting"
    );

    let interval = config.worker.metrics_interval;
    let spawner = ProcessSpawner::current_exe([
        "worker".to_string(),
        "--metrics-interval".to_string(),
        format!("{}ms", interval.as_millis()),
    ])?;

    let mut supervisor = Supervisor::new(config.clone(), spawner);
    let reports = supervisor.subscribe_reports();
    let backends = supervisor.subscribe_backends();
    let (stop_tx, stop_rx) = watch::channel(false);

    // ── Health and metrics surface ─────────────────────────────

    let api_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.health_check_port));
    let api_listener = TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("failed to bind health check port {api_addr}"))?;
    let mut api_stop = stop_rx.clone();
    let api = tokio::spawn(forkgrid_api::serve(api_listener, reports, async move {
        let _ = api_stop.wait_for(|stop| *stop).await;
    }));

    // ── Front proxy ────────────────────────────────────────────

    let app_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let proxy_listener = TcpListener::bind(app_addr)
        .await
        .with_context(|| format!("failed to bind application port {app_addr}"))?;
    let balancer = Arc::new(LoadBalancer::new(config.balance_strategy(), backends));
    let proxy = tokio::spawn(forkgrid_balancer::serve(proxy_listener, balancer, stop_rx));

    // ── Supervise ──────────────────────────────────────────────

    let outcome = match supervisor.start().await {
        Ok(()) => supervisor.run(signals::shutdown_signal()).await,
        Err(e) => Err(e),
    };

    let _ = stop_tx.send(true);
    match proxy.await {
        Ok(Err(e)) => warn!(error = %e, "front proxy failed"),
        Err(e) => warn!(error = %e, "front proxy task panicked"),
        Ok(Ok(())) => {}
    }
    match api.await {
        Ok(Err(e)) => warn!(error = %e, "health endpoint failed"),
        Err(e) => warn!(error = %e, "health endpoint task panicked"),
        Ok(Ok(())) => {}
    }

    match outcome {
        Ok(report) => {
            info!(
                stopped = report.stopped,
                forced = report.forced.len(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "forkgrid master stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "forkgrid master failed");
            Err(e.into())
        }
    }
}

/// Clustering disabled: serve the application from this process.
async fn run_in_process(config: &ClusterConfig) -> anyhow::Result<()> {
    info!(port = config.port, "clustering disabled, serving in-process");
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let mut app = HttpApp::new(demo_router(None), addr);
    app.start().await?;
    signals::shutdown_signal().await;
    app.stop().await?;
    info!("forkgrid stopped");
    Ok(())
}
