//! forkgrid-balancer — routes inbound connections to Online workers.
//!
//! # Components
//!
//! - **`strategy`** — round-robin cursor and rendezvous-hash sticky selection
//! - **`balancer`** — `LoadBalancer`, which re-reads the master's published
//!   backend list on every pick
//! - **`proxy`** — TCP front proxy splicing client connections to workers

pub mod balancer;
pub mod proxy;
pub mod strategy;

pub use balancer::LoadBalancer;
pub use proxy::{ProxyError, serve};
pub use strategy::{RoundRobin, rendezvous_order};
