//! The application server contract and the bundled axum implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

use forkgrid_core::WorkerId;

/// An application hosted by a worker.
///
/// The cluster only ever starts and stops it; what it serves is its own
/// business.
pub trait AppServer: Send {
    /// Begin accepting connections and return the bound address.
    fn start(&mut self) -> impl Future<Output = anyhow::Result<SocketAddr>> + Send;

    /// Stop accepting, let in-flight requests finish, release resources.
    fn stop(&mut self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Timing of one served request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestOutcome {
    pub response_time: Duration,
    /// The response was a server error.
    pub error: bool,
}

pub type RequestSender = mpsc::UnboundedSender<RequestOutcome>;

/// An axum router served on its own task.
pub struct HttpApp {
    router: Router,
    bind: SocketAddr,
    reporter: Option<RequestSender>,
    running: Option<Running>,
}

struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl HttpApp {
    pub fn new(router: Router, bind: SocketAddr) -> Self {
        Self {
            router,
            bind,
            reporter: None,
            running: None,
        }
    }

    /// Emit a `RequestOutcome` for every request served.
    pub fn report_requests(mut self, tx: RequestSender) -> Self {
        self.reporter = Some(tx);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl AppServer for HttpApp {
    async fn start(&mut self) -> anyhow::Result<SocketAddr> {
        if self.running.is_some() {
            anyhow::bail!("application server already running");
        }
        let listener = TcpListener::bind(self.bind)
            .await
            .with_context(|| format!("failed to bind {}", self.bind))?;
        let addr = listener.local_addr()?;

        let mut router = self.router.clone();
        if let Some(tx) = &self.reporter {
            router = router.layer(middleware::from_fn_with_state(tx.clone(), track_request));
        }

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await
        });
        self.running = Some(Running { stop, task });
        info!(%addr, "application server listening");
        Ok(addr)
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        let _ = running.stop.send(());
        running
            .task
            .await
            .context("application server task panicked")??;
        info!("application server stopped");
        Ok(())
    }
}

async fn track_request(State(tx): State<RequestSender>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    let response = next.run(req).await;
    let _ = tx.send(RequestOutcome {
        response_time: started.elapsed(),
        error: response.status().is_server_error(),
    });
    response
}

// ── Demo application ───────────────────────────────────────────

#[derive(Clone)]
struct DemoState {
    worker: Option<WorkerId>,
}

/// A small application for trying the cluster out.
///
/// `GET /` greets with the serving worker's id, `GET /sleep/{ms}` holds
/// the request open, `GET /fail` answers 500.
pub fn demo_router(worker: Option<WorkerId>) -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/sleep/{ms}", get(sleep))
        .route("/fail", get(fail))
        .with_state(DemoState { worker })
}

async fn hello(State(state): State<DemoState>) -> String {
    match state.worker {
        Some(id) => format!("hello from worker {id}\n"),
        None => "hello from forkgrid\n".to_string(),
    }
}

async fn sleep(Path(ms): Path<u64>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(ms.min(60_000))).await;
    "ok\n"
}

async fn fail() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "simulated failure\n")
}
