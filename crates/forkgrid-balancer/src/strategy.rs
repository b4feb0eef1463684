//! Backend selection strategies.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use sha2::{Digest, Sha256};

use forkgrid_core::Backend;

/// A round-robin cursor over a list whose length may change between picks.
///
/// Uses `AtomicUsize` so the proxy's connection tasks can share it without
/// locking. The counter wraps around the current list length.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the next index, wrapping around `count`.
    ///
    /// Returns `None` if count is zero.
    pub fn next(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(idx % count)
    }

    /// Current counter value (for diagnostics).
    pub fn current(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}

/// Order backends by rendezvous (highest random weight) score for `client`.
///
/// The first entry is the client's home worker. Removing a worker only
/// moves the clients that were pinned to it; everyone else keeps their
/// home. Ties are impossible in practice, but fall back to worker id.
pub fn rendezvous_order(client: IpAddr, backends: &[Backend]) -> Vec<Backend> {
    let mut scored: Vec<(u64, Backend)> = backends
        .iter()
        .map(|b| (rendezvous_weight(client, b.worker_id), *b))
        .collect();
    scored.sort_by(|(wa, a), (wb, b)| wb.cmp(wa).then_with(|| a.worker_id.cmp(&b.worker_id)));
    scored.into_iter().map(|(_, b)| b).collect()
}

fn rendezvous_weight(client: IpAddr, worker_id: u32) -> u64 {
    let mut hasher = Sha256::new();
    match client {
        IpAddr::V4(v4) => hasher.update(v4.octets()),
        IpAddr::V6(v6) => hasher.update(v6.octets()),
    }
    hasher.update(worker_id.to_le_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};

    fn backends(ids: &[u32]) -> Vec<Backend> {
        ids.iter()
            .map(|&id| Backend {
                worker_id: id,
                addr: SocketAddr::from(([127, 0, 0, 1], 4000 + id as u16)),
            })
            .collect()
    }

    fn client(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    #[test]
    fn round_robin_cycles_through_indices() {
        let rr = RoundRobin::new();
        assert_eq!(rr.next(3), Some(0));
        assert_eq!(rr.next(3), Some(1));
        assert_eq!(rr.next(3), Some(2));
        assert_eq!(rr.next(3), Some(0));
        assert_eq!(rr.current(), 4);
    }

    #[test]
    fn round_robin_zero_count_returns_none() {
        assert_eq!(RoundRobin::new().next(0), None);
    }

    #[test]
    fn round_robin_adapts_to_changing_pool_size() {
        let rr = RoundRobin::new();
        assert_eq!(rr.next(2), Some(0));
        assert_eq!(rr.next(2), Some(1));
        assert_eq!(rr.next(4), Some(2));
        assert_eq!(rr.next(4), Some(3));
        assert_eq!(rr.next(4), Some(0));
        assert_eq!(rr.next(2), Some(1));
    }

    #[test]
    fn rendezvous_is_deterministic() {
        let list = backends(&[1, 2, 3, 4]);
        for n in 0..50 {
            let first = rendezvous_order(client(n), &list);
            let second = rendezvous_order(client(n), &list);
            assert_eq!(first, second);
            assert_eq!(first.len(), 4);
        }
    }

    #[test]
    fn rendezvous_ignores_list_order() {
        let forward = backends(&[1, 2, 3, 4]);
        let mut reversed = forward.clone();
        reversed.reverse();
        for n in 0..50 {
            assert_eq!(
                rendezvous_order(client(n), &forward)[0],
                rendezvous_order(client(n), &reversed)[0]
            );
        }
    }

    #[test]
    fn removing_a_worker_only_moves_its_clients() {
        let before = backends(&[1, 2, 3, 4]);
        let after = backends(&[1, 2, 4]);
        for n in 0..100 {
            let home = rendezvous_order(client(n), &before)[0];
            let new_home = rendezvous_order(client(n), &after)[0];
            if home.worker_id != 3 {
                assert_eq!(home, new_home, "client {n} moved needlessly");
            } else {
                assert_ne!(new_home.worker_id, 3);
            }
        }
    }

    #[test]
    fn clients_spread_over_workers() {
        let list = backends(&[1, 2, 3, 4]);
        let homes: std::collections::HashSet<u32> = (0..100)
            .map(|n| rendezvous_order(client(n), &list)[0].worker_id)
            .collect();
        assert!(homes.len() > 1);
    }
}
