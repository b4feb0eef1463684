//! forkgrid-core — shared vocabulary for the forkgrid cluster manager.
//!
//! Holds the worker record and stats types, the cluster configuration,
//! the error taxonomy, and the master ↔ worker IPC protocol. Every other
//! forkgrid crate builds on these definitions.
//!
//! # IPC
//!
//! ```text
//! master ──MasterMessage──▶ worker stdin   (newline-delimited JSON)
//! master ◀──WorkerMessage── worker stdout
//! ```
//!
//! Both message enums are closed and tagged by `cmd`, so a new kind of
//! message is a compile error at every match site rather than a silently
//! ignored string.

pub mod config;
pub mod error;
pub mod ipc;
pub mod protocol;
pub mod types;

pub use config::{ClusterConfig, ConfigError};
pub use error::{ClusterError, IpcError};
pub use ipc::{MessageReader, MessageWriter};
pub use protocol::{MasterMessage, WorkerMessage};
pub use types::*;
