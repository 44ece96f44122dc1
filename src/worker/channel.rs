//! One worker process per request.
//!
//! [`WorkerChannel::open`] spawns a task that launches the worker, writes the
//! request to stdin, closes it, and turns stdout into [`ChannelEvent`]s. The
//! task reports exactly one [`Termination`], always as the last event of the
//! channel.

use std::fmt;
use std::process::ExitStatus;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::buffer::LineBuffer;
use super::command::WorkerCommand;
use crate::error::{BridgeError, Result};
use crate::protocol::{Request, ResponseMessage};

const WORKER_TARGET: &str = "wand_bridge::worker";

/// Size of a single stdout read
const READ_CHUNK: usize = 4096;

/// Unique identifier for a worker channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How stdout is interpreted. Chosen by the operation, never by the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Split on newlines and deliver each line as it completes
    Streaming,
    /// Accumulate everything and hand it over at exit
    SingleResult,
}

/// Lifecycle of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Running,
    Terminated,
}

/// How a channel ended
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// The process exited on its own. `output` holds stdout in single-result
    /// mode and is empty when streaming.
    Exited {
        code: i32,
        output: String,
        stderr: String,
    },
    /// The process ended without an exit code: killed on request or by a signal
    Killed,
    /// The process never started
    StartFailed { program: String, message: String },
}

impl Termination {
    pub fn is_success(&self) -> bool {
        matches!(self, Termination::Exited { code: 0, .. })
    }

    /// Turn the end of a single-result channel into the raw terminal document
    pub fn into_output(self) -> Result<String> {
        match self {
            Termination::Exited { code: 0, output, .. } => Ok(output),
            Termination::Exited { code, stderr, .. } => Err(BridgeError::NonZeroExit { code, stderr }),
            Termination::Killed => Err(BridgeError::Terminated),
            Termination::StartFailed { program, message } => {
                Err(BridgeError::Launch { program, message })
            }
        }
    }

    /// Error to surface to a chat, if this ending is a failure
    pub fn failure(&self) -> Option<BridgeError> {
        match self {
            Termination::Exited { code: 0, .. } | Termination::Killed => None,
            Termination::Exited { code, stderr, .. } => Some(BridgeError::NonZeroExit {
                code: *code,
                stderr: stderr.clone(),
            }),
            Termination::StartFailed { program, message } => Some(BridgeError::Launch {
                program: program.clone(),
                message: message.clone(),
            }),
        }
    }
}

/// Something a channel reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Chunk(String),
    Error(String),
    Terminated(Termination),
}

/// Where a channel sends its events, tagged with the channel id
pub type EventSender = mpsc::UnboundedSender<(ChannelId, ChannelEvent)>;

/// Handle to a running worker channel
pub struct WorkerChannel {
    id: ChannelId,
    state: watch::Receiver<ChannelState>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl WorkerChannel {
    /// Launch a worker for `request` and return immediately.
    ///
    /// Must be called from within a Tokio runtime. Dropping the handle does
    /// not stop the worker; use [`WorkerChannel::kill`] or
    /// [`WorkerChannel::terminate`].
    pub fn open(
        id: ChannelId,
        command: &WorkerCommand,
        request: &Request,
        mode: ReadMode,
        events: EventSender,
    ) -> Result<Self> {
        let payload = request.to_payload().map_err(BridgeError::Serialize)?;
        let (state_tx, state) = watch::channel(ChannelState::Idle);
        let (kill_tx, kill_rx) = oneshot::channel();

        debug!(
            target: WORKER_TARGET,
            channel = %id,
            request = request.kind(),
            command = %command,
            ?mode,
            "opening worker channel"
        );

        let driver = Driver {
            id,
            mode,
            events,
            state: state_tx,
        };
        tokio::spawn(driver.run(command.clone(), payload, kill_rx));

        Ok(Self {
            id,
            state,
            kill_tx: Some(kill_tx),
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Ask the driver to kill the process. Returns false if a kill was
    /// already requested or the channel has already ended.
    pub fn kill(&mut self) -> bool {
        match self.kill_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Kill the process and wait until the channel reaches `Terminated`
    pub async fn terminate(&mut self) {
        self.kill();
        // The driver drops its sender on exit, which also ends the wait.
        let _ = self
            .state
            .wait_for(|state| *state == ChannelState::Terminated)
            .await;
    }
}

impl fmt::Debug for WorkerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerChannel")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Outcome of the read loop
enum Stop {
    KillRequested,
    Exited(std::io::Result<ExitStatus>),
}

/// Task-side half of a channel: owns the process for its whole life
struct Driver {
    id: ChannelId,
    mode: ReadMode,
    events: EventSender,
    state: watch::Sender<ChannelState>,
}

impl Driver {
    async fn run(self, command: WorkerCommand, payload: Vec<u8>, mut kill_rx: oneshot::Receiver<()>) {
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    target: WORKER_TARGET,
                    channel = %self.id,
                    command = %command,
                    error = %e,
                    "failed to start worker"
                );
                self.finish(Termination::StartFailed {
                    program: command.program().to_string_lossy().into_owned(),
                    message: e.to_string(),
                });
                return;
            }
        };
        self.set_state(ChannelState::Running);

        let (Some(stdin), Some(mut stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            self.finish(Termination::StartFailed {
                program: command.program().to_string_lossy().into_owned(),
                message: "worker stdio was not captured".to_string(),
            });
            return;
        };

        let stderr_task = spawn_stderr_collector(self.id, stderr);
        // Written from its own task so a kill is never stuck behind a full pipe
        let stdin_task = tokio::spawn(write_request(self.id, stdin, payload));

        let mut lines = LineBuffer::new();
        let mut output = Vec::new();
        let mut buf = [0u8; READ_CHUNK];
        let mut kill_armed = true;
        let mut stdout_open = true;

        let stop = loop {
            tokio::select! {
                biased;

                signal = &mut kill_rx, if kill_armed => match signal {
                    Ok(()) => break Stop::KillRequested,
                    // Handle dropped without killing: let the worker finish
                    Err(_) => kill_armed = false,
                },

                read = stdout.read(&mut buf), if stdout_open => match read {
                    Ok(0) => {
                        stdout_open = false;
                        if let Some(line) = lines.finish() {
                            self.deliver_line(&line);
                        }
                    }
                    Ok(n) => match self.mode {
                        ReadMode::Streaming => {
                            for line in lines.push(&buf[..n]) {
                                self.deliver_line(&line);
                            }
                        }
                        ReadMode::SingleResult => output.extend_from_slice(&buf[..n]),
                    },
                    Err(e) => {
                        warn!(target: WORKER_TARGET, channel = %self.id, error = %e, "stdout read failed");
                        stdout_open = false;
                    }
                },

                status = child.wait(), if !stdout_open => break Stop::Exited(status),
            }
        };

        let termination = match stop {
            Stop::KillRequested => {
                if let Err(e) = child.kill().await {
                    warn!(target: WORKER_TARGET, channel = %self.id, error = %e, "failed to kill worker");
                }
                stdin_task.abort();
                stderr_task.abort();
                let dropped = lines.discard() + output.len();
                debug!(target: WORKER_TARGET, channel = %self.id, dropped, "worker killed");
                Termination::Killed
            }
            Stop::Exited(Ok(status)) => {
                stdin_task.abort();
                let stderr = stderr_task.await.unwrap_or_default();
                debug!(target: WORKER_TARGET, channel = %self.id, code = ?status.code(), "worker exited");
                match status.code() {
                    Some(code) => Termination::Exited {
                        code,
                        output: String::from_utf8_lossy(&output).into_owned(),
                        stderr,
                    },
                    None => Termination::Killed,
                }
            }
            Stop::Exited(Err(e)) => {
                stdin_task.abort();
                stderr_task.abort();
                warn!(target: WORKER_TARGET, channel = %self.id, error = %e, "failed to wait for worker");
                Termination::Exited {
                    code: -1,
                    output: String::new(),
                    stderr: e.to_string(),
                }
            }
        };

        self.finish(termination);
    }

    fn deliver_line(&self, line: &str) {
        if self.mode != ReadMode::Streaming {
            return;
        }

        match ResponseMessage::parse(line) {
            Ok(ResponseMessage::Error { error }) if !error.is_empty() => {
                self.emit(ChannelEvent::Error(error))
            }
            Ok(ResponseMessage::Chunk { chunk }) if !chunk.is_empty() => {
                self.emit(ChannelEvent::Chunk(chunk))
            }
            Ok(other) => trace!(
                target: WORKER_TARGET,
                channel = %self.id,
                kind = other.kind(),
                "ignoring message without streaming content"
            ),
            Err(e) => warn!(
                target: WORKER_TARGET,
                channel = %self.id,
                error = %e,
                line,
                "dropping malformed worker output line"
            ),
        }
    }

    fn emit(&self, event: ChannelEvent) {
        // The owner may have stopped listening; nothing left to do then.
        let _ = self.events.send((self.id, event));
    }

    fn set_state(&self, next: ChannelState) {
        self.state.send_if_modified(|state| {
            if *state == ChannelState::Terminated || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    fn finish(&self, termination: Termination) {
        debug!(target: WORKER_TARGET, channel = %self.id, ?termination, "worker channel terminated");
        self.set_state(ChannelState::Terminated);
        self.emit(ChannelEvent::Terminated(termination));
    }
}

/// Write the request and close stdin so the worker knows input is complete
async fn write_request(id: ChannelId, mut stdin: ChildStdin, payload: Vec<u8>) {
    let written = async {
        stdin.write_all(&payload).await?;
        stdin.flush().await
    }
    .await;

    match written {
        Ok(()) => trace!(target: WORKER_TARGET, channel = %id, bytes = payload.len(), "request written"),
        // The exit status decides what this means
        Err(e) => debug!(target: WORKER_TARGET, channel = %id, error = %e, "worker closed stdin early"),
    }
}

/// Drain stderr so the worker never blocks on a full pipe, logging each line.
/// Lines are decoded lossily; stderr is free text and is read until EOF.
fn spawn_stderr_collector(id: ChannelId, stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut collected = String::new();
        let mut reader = BufReader::new(stderr);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let text = text.trim_end_matches(['\n', '\r']);
                    debug!(target: WORKER_TARGET, channel = %id, "worker stderr: {}", text);
                    collected.push_str(text);
                    collected.push('\n');
                }
                Err(e) => {
                    warn!(target: WORKER_TARGET, channel = %id, error = %e, "stderr read failed");
                    break;
                }
            }
        }
        collected
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_displays_with_hash() {
        assert_eq!(ChannelId::new(7).to_string(), "#7");
    }

    #[test]
    fn clean_exit_yields_output() {
        let termination = Termination::Exited {
            code: 0,
            output: "{\"models\":[]}".to_string(),
            stderr: String::new(),
        };
        assert!(termination.is_success());
        assert_eq!(termination.into_output().unwrap(), "{\"models\":[]}");
    }

    #[test]
    fn non_zero_exit_is_a_failure_with_code() {
        let termination = Termination::Exited {
            code: 2,
            output: String::new(),
            stderr: "usage: cli.py\n".to_string(),
        };
        let err = termination.failure().unwrap();
        assert_eq!(err.to_string(), "worker exited with code 2: usage: cli.py");
        assert!(matches!(
            termination.into_output(),
            Err(BridgeError::NonZeroExit { code: 2, .. })
        ));
    }

    #[test]
    fn killed_is_not_a_chat_failure() {
        assert!(Termination::Killed.failure().is_none());
        assert!(matches!(
            Termination::Killed.into_output(),
            Err(BridgeError::Terminated)
        ));
    }

    #[test]
    fn start_failure_maps_to_launch_error() {
        let termination = Termination::StartFailed {
            program: "python".to_string(),
            message: "No such file or directory".to_string(),
        };
        assert!(matches!(
            termination.failure(),
            Some(BridgeError::Launch { .. })
        ));
    }
}
