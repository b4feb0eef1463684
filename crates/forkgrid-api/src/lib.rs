//! forkgrid-api — the master's operational HTTP surface.
//!
//! Handlers never touch the pool. They read the latest `ClusterReport`
//! the supervisor published on its `watch` channel, so a slow scrape can
//! never hold up the event loop.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/health` | Cluster health; 200 when healthy, 503 when degraded |
//! | GET | `/metrics` | Fleet aggregates and per-worker stats as JSON |
//! | GET | `/metrics/prometheus` | Prometheus text exposition |

pub mod handlers;

use std::net::SocketAddr;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use forkgrid_core::ClusterReport;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub reports: watch::Receiver<ClusterReport>,
}

/// Build the operational router.
pub fn build_router(reports: watch::Receiver<ClusterReport>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/metrics/prometheus", get(handlers::prometheus_metrics))
        .with_state(ApiState { reports })
}

/// Serve the router on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    reports: watch::Receiver<ClusterReport>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, "health and metrics endpoint listening");
    axum::serve(listener, build_router(reports))
        .with_graceful_shutdown(shutdown)
        .await
}
