//! TCP front proxy.
//!
//! Accepts client connections on the public application port and splices
//! each one to a worker chosen by the `LoadBalancer`. If the chosen worker
//! refuses the connection, the next candidate is tried, up to the number
//! of backends.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::balancer::LoadBalancer;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no online workers to route {client} to")]
    NoBackends { client: SocketAddr },

    #[error("every worker refused the connection from {client}")]
    AllBackendsFailed { client: SocketAddr },

    #[error("proxy i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the accept loop until `shutdown` flips to `true`.
///
/// In-flight connections keep running after the loop exits; they end when
/// either side closes.
pub async fn serve(
    listener: TcpListener,
    balancer: Arc<LoadBalancer>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ProxyError> {
    let local = listener.local_addr()?;
    info!(%local, strategy = ?balancer.strategy(), "front proxy listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, client) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let balancer = Arc::clone(&balancer);
                tokio::spawn(async move {
                    if let Err(e) = forward(stream, client, &balancer).await {
                        warn!(%client, error = %e, "connection not proxied");
                    }
                });
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("front proxy stopped accepting");
                    return Ok(());
                }
            }
        }
    }
}

/// Splice one client connection to the first worker that accepts it.
pub async fn forward(
    mut client_stream: TcpStream,
    client: SocketAddr,
    balancer: &LoadBalancer,
) -> Result<(u64, u64), ProxyError> {
    let candidates = balancer.candidates(client.ip());
    if candidates.is_empty() {
        return Err(ProxyError::NoBackends { client });
    }

    for backend in candidates {
        match TcpStream::connect(backend.addr).await {
            Ok(mut upstream) => {
                debug!(%client, worker = backend.worker_id, addr = %backend.addr, "proxying connection");
                let copied = tokio::io::copy_bidirectional(&mut client_stream, &mut upstream).await?;
                return Ok(copied);
            }
            Err(e) => {
                warn!(worker = backend.worker_id, addr = %backend.addr, error = %e, "worker refused connection, trying next");
            }
        }
    }
    Err(ProxyError::AllBackendsFailed { client })
}
