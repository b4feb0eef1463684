//! `LoadBalancer` — strategy dispatch over the live backend list.
//!
//! The master publishes the Online workers' addresses on a `watch`
//! channel after every pool change. The balancer borrows the latest value
//! on each pick, so a worker that died or was drained is never handed out
//! once the master has observed it.

use std::net::IpAddr;

use tokio::sync::watch;
use tracing::trace;

use forkgrid_core::{BalanceStrategy, Backend};

use crate::strategy::{RoundRobin, rendezvous_order};

pub struct LoadBalancer {
    strategy: BalanceStrategy,
    backends: watch::Receiver<Vec<Backend>>,
    cursor: RoundRobin,
}

impl LoadBalancer {
    pub fn new(strategy: BalanceStrategy, backends: watch::Receiver<Vec<Backend>>) -> Self {
        Self {
            strategy,
            backends,
            cursor: RoundRobin::new(),
        }
    }

    pub fn strategy(&self) -> BalanceStrategy {
        self.strategy
    }

    /// The backend for a new connection from `client`.
    pub fn pick(&self, client: IpAddr) -> Option<Backend> {
        self.candidates(client).into_iter().next()
    }

    /// Every current backend, in the order a connection should try them.
    ///
    /// Round-robin rotates the list to start at the cursor (advancing it by
    /// one); sticky orders by rendezvous score for the client.
    pub fn candidates(&self, client: IpAddr) -> Vec<Backend> {
        let backends = self.backends.borrow();
        let ordered = match self.strategy {
            BalanceStrategy::RoundRobin => match self.cursor.next(backends.len()) {
                Some(start) => {
                    let mut list = backends.clone();
                    list.rotate_left(start);
                    list
                }
                None => Vec::new(),
            },
            BalanceStrategy::Sticky => rendezvous_order(client, &backends),
        };
        trace!(%client, strategy = ?self.strategy, candidates = ordered.len(), "picked backends");
        ordered
    }

    /// Number of routable workers right now.
    pub fn live_count(&self) -> usize {
        self.backends.borrow().len()
    }
}
