//! Spawner seam and the production process spawner.
//!
//! A `Spawner` turns a worker id into a running worker and a
//! `WorkerHandle` the pool uses to talk to it. Whatever the spawner starts
//! must post the worker's messages and its eventual exit into the pool's
//! event channel.

use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use forkgrid_core::{
    ClusterError, IpcError, MasterMessage, MessageReader, MessageWriter, WorkerExit, WorkerId,
    WorkerMessage,
};

use crate::error::PoolError;
use crate::event::{PoolEvent, PoolEventSender};

/// Environment variable carrying the worker id into the child process.
pub const WORKER_ID_ENV: &str = "FORKGRID_WORKER_ID";

/// Grace for reading the last lines a worker wrote before it exited.
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Instruction from the pool to one worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerControl {
    /// Deliver an IPC message.
    Send(MasterMessage),
    /// Terminate the process immediately.
    Kill,
}

/// The pool's side of one worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub pid: Option<u32>,
    control: mpsc::UnboundedSender<WorkerControl>,
}

impl WorkerHandle {
    pub fn new(pid: Option<u32>, control: mpsc::UnboundedSender<WorkerControl>) -> Self {
        Self { pid, control }
    }

    /// Queue a message. Returns `false` if the worker is already gone.
    pub fn send(&self, message: MasterMessage) -> bool {
        self.control.send(WorkerControl::Send(message)).is_ok()
    }

    /// Queue a forced termination.
    pub fn kill(&self) -> bool {
        self.control.send(WorkerControl::Kill).is_ok()
    }
}

/// Creates worker processes.
pub trait Spawner: Send {
    fn spawn(
        &mut self,
        id: WorkerId,
        events: PoolEventSender,
    ) -> impl Future<Output = Result<WorkerHandle, PoolError>> + Send;
}

/// Re-executes a program (normally the current binary) in worker mode.
///
/// The child's stdin and stdout carry newline-delimited JSON; stderr is
/// inherited so worker logs land next to the master's.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// The running executable, invoked with `args`.
    pub fn current_exe<I, A>(args: I) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        let program = std::env::current_exe().map_err(ClusterError::Spawn)?;
        Ok(Self::new(program).args(args))
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl Spawner for ProcessSpawner {
    async fn spawn(
        &mut self,
        id: WorkerId,
        events: PoolEventSender,
    ) -> Result<WorkerHandle, PoolError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .env(WORKER_ID_ENV, id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(ClusterError::Spawn)?;

        let pid = child.id();
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Err(ClusterError::Spawn(std::io::Error::other(
                "worker stdio was not captured",
            ))
            .into());
        };

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive_child(id, child, stdin, stdout, control_rx, events));

        info!(worker = id, ?pid, program = %self.program.display(), "worker process spawned");
        Ok(WorkerHandle::new(pid, control_tx))
    }
}

/// Pump one child: stdout → events, control → stdin or kill, exit → event.
async fn drive_child(
    id: WorkerId,
    mut child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    mut control: mpsc::UnboundedReceiver<WorkerControl>,
    events: PoolEventSender,
) {
    let mut reader = MessageReader::new(stdout);
    let mut writer = MessageWriter::new(stdin);
    let mut stdout_open = true;
    let mut control_open = true;

    let status = loop {
        tokio::select! {
            biased;
            line = reader.next::<WorkerMessage>(), if stdout_open => {
                stdout_open = forward_line(id, line, &events);
            }
            cmd = control.recv(), if control_open => match cmd {
                Some(WorkerControl::Send(message)) => {
                    if let Err(e) = writer.send(&message).await {
                        debug!(worker = id, error = %e, "could not write to worker stdin");
                    }
                }
                Some(WorkerControl::Kill) => {
                    if let Err(e) = child.start_kill() {
                        debug!(worker = id, error = %e, "kill failed, worker already exited?");
                    }
                }
                None => {
                    // The pool dropped the handle; nobody is left to supervise.
                    control_open = false;
                    let _ = child.start_kill();
                }
            },
            status = child.wait() => break status,
        }
    };

    // Lines written right before exit may still be buffered in the pipe.
    if stdout_open {
        let _ = tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, async {
            while forward_line(id, reader.next::<WorkerMessage>().await, &events) {}
        })
        .await;
    }

    let exit = match status {
        Ok(status) => WorkerExit::from_status(status),
        Err(e) => {
            warn!(worker = id, error = %e, "failed to wait on worker process");
            WorkerExit::Unknown
        }
    };
    let _ = events.send(PoolEvent::Exited { id, exit });
}

/// Forward one read result. Returns whether stdout is still open.
fn forward_line(
    id: WorkerId,
    line: Result<Option<WorkerMessage>, IpcError>,
    events: &PoolEventSender,
) -> bool {
    match line {
        Ok(Some(message)) => {
            let _ = events.send(PoolEvent::Message { id, message });
            true
        }
        Ok(None) => false,
        Err(e @ IpcError::Decode { .. }) => {
            warn!(worker = id, error = %e, "dropping malformed worker message");
            true
        }
        Err(e) => {
            warn!(worker = id, error = %e, "worker stdout failed");
            false
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> ProcessSpawner {
        ProcessSpawner::new("/bin/sh").args(["-c", script])
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<PoolEvent>) -> PoolEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for worker event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn forwards_messages_then_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut spawner = shell(r#"echo '{"cmd":"ready","port":4321}'; exit 3"#);
        let handle = spawner.spawn(7, tx).await.unwrap();
        assert!(handle.pid.is_some());

        assert_eq!(
            next_event(&mut rx).await,
            PoolEvent::Message {
                id: 7,
                message: WorkerMessage::Ready { port: 4321 }
            }
        );
        assert_eq!(
            next_event(&mut rx).await,
            PoolEvent::Exited {
                id: 7,
                exit: WorkerExit::Code(3)
            }
        );
    }

    #[tokio::test]
    async fn worker_id_is_exported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut spawner = shell(&format!(
            r#"echo "{{\"cmd\":\"ready\",\"port\":${WORKER_ID_ENV}}}""#
        ));
        spawner.spawn(42, tx).await.unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            PoolEvent::Message {
                id: 42,
                message: WorkerMessage::Ready { port: 42 }
            }
        );
    }

    #[tokio::test]
    async fn messages_reach_worker_stdin() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Echo back the first line read from stdin, rewritten as a response.
        let mut spawner = shell(
            r#"read line; ts=$(echo "$line" | sed 's/.*"timestamp":\([0-9]*\).*/\1/'); echo "{\"cmd\":\"health_check_response\",\"timestamp\":$ts}""#,
        );
        let handle = spawner.spawn(1, tx).await.unwrap();
        assert!(handle.send(MasterMessage::HealthCheck { timestamp: 99 }));

        assert_eq!(
            next_event(&mut rx).await,
            PoolEvent::Message {
                id: 1,
                message: WorkerMessage::HealthCheckResponse { timestamp: 99 }
            }
        );
        assert!(matches!(next_event(&mut rx).await, PoolEvent::Exited { id: 1, .. }));
    }

    #[tokio::test]
    async fn kill_reports_signal_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut spawner = shell("sleep 30");
        let handle = spawner.spawn(5, tx).await.unwrap();
        assert!(handle.kill());

        match next_event(&mut rx).await {
            PoolEvent::Exited { id: 5, exit } => assert!(!exit.is_clean()),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut spawner = ProcessSpawner::new("/definitely/not/a/binary");
        let err = spawner.spawn(1, tx).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
