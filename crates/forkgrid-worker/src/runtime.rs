//! The worker side of the IPC protocol.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use forkgrid_core::{IpcError, MasterMessage, MessageReader, MessageWriter, WorkerId, WorkerMessage};

use crate::app::{AppServer, RequestOutcome};
use crate::error::WorkerError;
use crate::sampler::ResourceSampler;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Id assigned by the master, for logs only.
    pub id: Option<WorkerId>,
    /// How often `worker_metrics` is sent.
    pub metrics_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            id: None,
            metrics_interval: Duration::from_secs(5),
        }
    }
}

/// Run a worker over this process's stdin and stdout.
pub async fn run_worker<A: AppServer>(
    app: A,
    requests: mpsc::UnboundedReceiver<RequestOutcome>,
    options: WorkerOptions,
) -> Result<(), WorkerError> {
    run_worker_with_io(app, requests, options, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Run a worker over an arbitrary pair of streams.
///
/// Starts `app`, announces its port, then answers the master until it
/// sends `shutdown` or closes the channel. The app is stopped on every
/// exit path before this returns.
pub async fn run_worker_with_io<A, R, W>(
    mut app: A,
    mut requests: mpsc::UnboundedReceiver<RequestOutcome>,
    options: WorkerOptions,
    input: R,
    output: W,
) -> Result<(), WorkerError>
where
    A: AppServer,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = MessageReader::new(input);
    let mut writer = MessageWriter::new(output);
    let mut sampler = ResourceSampler::new();

    let addr = app.start().await?;
    if let Err(e) = writer.send(&WorkerMessage::Ready { port: addr.port() }).await {
        app.stop().await?;
        return Err(e.into());
    }
    info!(worker = ?options.id, %addr, "worker ready");

    let period = options.metrics_interval;
    let mut metrics = interval_at(Instant::now() + period, period);
    metrics.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let outcome: Result<(), IpcError> = loop {
        tokio::select! {
            message = reader.next::<MasterMessage>() => match message {
                Ok(Some(MasterMessage::HealthCheck { timestamp })) => {
                    let reply = WorkerMessage::HealthCheckResponse { timestamp };
                    if let Err(e) = writer.send(&reply).await {
                        break Err(e);
                    }
                }
                Ok(Some(MasterMessage::Shutdown)) => {
                    info!(worker = ?options.id, "shutdown requested");
                    break Ok(());
                }
                Ok(None) => {
                    warn!(worker = ?options.id, "master closed the ipc channel, shutting down");
                    break Ok(());
                }
                Err(e @ IpcError::Decode { .. }) => {
                    warn!(error = %e, "ignoring malformed master message");
                }
                Err(e) => break Err(e),
            },
            Some(done) = requests.recv() => {
                let report = WorkerMessage::RequestComplete {
                    response_time: done.response_time.as_secs_f64() * 1000.0,
                    error: done.error,
                };
                if let Err(e) = writer.send(&report).await {
                    break Err(e);
                }
            }
            _ = metrics.tick() => {
                let sample = sampler.sample();
                debug!(cpu = sample.cpu_usage, memory = sample.memory_usage, "resource sample");
                if let Err(e) = writer.send(&sample.into_message()).await {
                    break Err(e);
                }
            }
        }
    };

    app.stop().await?;
    outcome?;
    info!(worker = ?options.id, "worker exiting");
    Ok(())
}
