//! Master ↔ worker message protocol.
//!
//! Messages are JSON objects tagged by `cmd` and sent one per line.

use serde::{Deserialize, Serialize};

use crate::error::IpcError;

/// Sent by the master to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum MasterMessage {
    /// Stop accepting connections, drain, and exit with code 0.
    Shutdown,
    /// Liveness probe; the worker echoes the timestamp back.
    HealthCheck { timestamp: u64 },
}

/// Sent by a worker to the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// The application server is listening on `127.0.0.1:{port}`.
    Ready { port: u16 },
    HealthCheckResponse { timestamp: u64 },
    #[serde(rename_all = "camelCase")]
    WorkerMetrics {
        /// Process CPU as a percentage of the whole machine.
        cpu_usage: f64,
        /// Resident memory as a percentage of system memory.
        memory_usage: f64,
        #[serde(default)]
        memory_bytes: u64,
        /// Seconds since the worker started.
        uptime: f64,
    },
    #[serde(rename_all = "camelCase")]
    RequestComplete {
        /// Milliseconds.
        response_time: f64,
        error: bool,
    },
}

impl MasterMessage {
    /// Serialize to a JSON line (with trailing newline).
    pub fn to_line(&self) -> Result<String, IpcError> {
        encode_line(self)
    }

    /// Parse a single JSON line.
    pub fn from_line(line: &str) -> Result<Self, IpcError> {
        decode_line(line)
    }
}

impl WorkerMessage {
    /// Serialize to a JSON line (with trailing newline).
    pub fn to_line(&self) -> Result<String, IpcError> {
        encode_line(self)
    }

    /// Parse a single JSON line.
    pub fn from_line(line: &str) -> Result<Self, IpcError> {
        decode_line(line)
    }
}

pub(crate) fn encode_line<T: Serialize>(msg: &T) -> Result<String, IpcError> {
    let mut json = serde_json::to_string(msg).map_err(IpcError::Encode)?;
    json.push('\n');
    Ok(json)
}

pub(crate) fn decode_line<T: serde::de::DeserializeOwned>(line: &str) -> Result<T, IpcError> {
    let trimmed = line.trim();
    serde_json::from_str(trimmed).map_err(|source| IpcError::Decode {
        line: trimmed.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_is_a_bare_cmd() {
        let line = MasterMessage::Shutdown.to_line().unwrap();
        assert_eq!(line, "{\"cmd\":\"shutdown\"}\n");
    }

    #[test]
    fn health_check_carries_timestamp() {
        let line = MasterMessage::HealthCheck { timestamp: 1700 }.to_line().unwrap();
        assert!(line.contains("\"cmd\":\"health_check\""));
        assert!(line.contains("\"timestamp\":1700"));
    }

    #[test]
    fn worker_metrics_use_camel_case_payload() {
        let msg = WorkerMessage::WorkerMetrics {
            cpu_usage: 12.5,
            memory_usage: 3.0,
            memory_bytes: 1024,
            uptime: 60.0,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_line().unwrap()).unwrap();
        assert_eq!(json["cmd"], "worker_metrics");
        assert_eq!(json["cpuUsage"], 12.5);
        assert_eq!(json["memoryUsage"], 3.0);
        assert_eq!(json["uptime"], 60.0);
    }

    #[test]
    fn parses_message_without_optional_fields() {
        let msg = WorkerMessage::from_line(
            r#"{"cmd":"worker_metrics","cpuUsage":1.0,"memoryUsage":2.0,"uptime":3.0}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            WorkerMessage::WorkerMetrics {
                cpu_usage: 1.0,
                memory_usage: 2.0,
                memory_bytes: 0,
                uptime: 3.0,
            }
        );
    }

    #[test]
    fn parses_request_complete() {
        let msg =
            WorkerMessage::from_line(r#"{"cmd":"request_complete","responseTime":42.0,"error":true}"#)
                .unwrap();
        assert_eq!(
            msg,
            WorkerMessage::RequestComplete {
                response_time: 42.0,
                error: true
            }
        );
    }

    #[test]
    fn unknown_cmd_is_rejected() {
        let err = WorkerMessage::from_line(r#"{"cmd":"reboot"}"#).unwrap_err();
        assert!(matches!(err, IpcError::Decode { .. }));
    }
}
