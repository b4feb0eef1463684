//! Worker mode: host the application and talk to the master over stdio.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use forkgrid_pool::WORKER_ID_ENV;
use forkgrid_worker::{HttpApp, WorkerOptions, demo_router};

use crate::signals;

pub async fn run_worker(metrics_interval: Duration) -> anyhow::Result<()> {
    let id = std::env::var(WORKER_ID_ENV)
        .ok()
        .and_then(|v| v.parse().ok());
    info!(worker = ?id, pid = std::process::id(), "worker starting");
    signals::ignore_interrupts();

    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let app = HttpApp::new(demo_router(id), SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
        .report_requests(requests_tx);
    let options = WorkerOptions {
        id,
        metrics_interval,
    };
    forkgrid_worker::run_worker(app, requests_rx, options).await?;
    Ok(())
}
