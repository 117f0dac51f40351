//! Agent subprocess lifecycle: spawn, stream, wait, cancel.

use crate::stream::{self, StreamEvent};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bounded event buffer. A full channel back-pressures the stdout reader;
/// agent events are never dropped.
const EVENT_BUFFER: usize = 64;

/// Errors from one agent run, distinguishing subprocess, parse-side i/o, and
/// cancellation so the controller can map them onto session status.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to launch agent: {0}")]
    Spawn(String),
    #[error("agent exited with code {code}: {stderr}")]
    Exit { code: i32, stderr: String },
    #[error("agent run cancelled")]
    Cancelled,
    #[error("agent i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle for one in-flight agent session.
///
/// `events` closes after the last parsed event once the subprocess exits.
pub struct AgentSession {
    pub events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    waiter: JoinHandle<Result<(), AgentError>>,
}

impl AgentSession {
    /// Request termination of the subprocess. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the subprocess exits. Non-zero exit carries the
    /// accumulated stderr; a fired token yields `AgentError::Cancelled`.
    pub async fn wait(self) -> Result<(), AgentError> {
        match self.waiter.await {
            Ok(result) => result,
            Err(join) => Err(AgentError::Io(std::io::Error::other(join))),
        }
    }
}

/// Capability interface over the code-generation agent. Implemented by
/// `ClaudeAgent` (real CLI) and `ScriptedAgent` (tests).
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, prompt: &str, cancel: CancellationToken)
        -> Result<AgentSession, AgentError>;
}

/// Launches the real agent CLI with stream-json output.
pub struct ClaudeAgent {
    pub bin: PathBuf,
    pub model: String,
    pub max_turns: u32,
}

impl ClaudeAgent {
    pub fn new(model: &str, max_turns: u32) -> Self {
        Self {
            bin: PathBuf::from("claude"),
            model: model.to_string(),
            max_turns,
        }
    }

    pub fn with_bin(mut self, bin: PathBuf) -> Self {
        self.bin = bin;
        self
    }

    /// Check that the agent binary is reachable.
    pub fn verify_available(&self) -> Result<(), AgentError> {
        let status = std::process::Command::new(&self.bin)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => Ok(()),
            _ => Err(AgentError::Spawn(format!(
                "agent CLI not found (looked for {:?})",
                self.bin
            ))),
        }
    }
}

#[async_trait::async_trait]
impl Agent for ClaudeAgent {
    async fn run(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<AgentSession, AgentError> {
        let mut cmd = tokio::process::Command::new(&self.bin);
        cmd.arg("-p")
            .arg(prompt)
            .arg("--verbose")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--model")
            .arg(&self.model)
            .arg("--max-turns")
            .arg(self.max_turns.to_string())
            .arg("--session-id")
            .arg(uuid::Uuid::new_v4().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AgentError::Spawn(format!("agent binary {:?} not found", self.bin))
            } else {
                AgentError::Spawn(e.to_string())
            }
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("failed to capture stdout".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::Spawn("failed to capture stderr".into()))?;

        tracing::debug!(model = %self.model, max_turns = self.max_turns, "agent launched");
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        // Drain stderr concurrently so a chatty agent cannot deadlock on a
        // full pipe while stdout is still streaming.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let token = cancel.clone();
        let waiter = tokio::spawn(async move {
            let pump = async {
                let mut reader = BufReader::new(stdout);
                let mut line = String::new();
                loop {
                    line.clear();
                    let n = reader.read_line(&mut line).await?;
                    if n == 0 {
                        break; // EOF
                    }
                    if let Some(event) = stream::parse_line(&line) {
                        if tx.send(event).await.is_err() {
                            break; // consumer gone
                        }
                    }
                }
                Ok::<(), std::io::Error>(())
            };

            tokio::select! {
                result = pump => {
                    result?;
                    let status = child.wait().await?;
                    let stderr_buf = stderr_task.await.unwrap_or_default();
                    if status.success() {
                        Ok(())
                    } else {
                        Err(AgentError::Exit {
                            code: status.code().unwrap_or(-1),
                            stderr: stderr_buf.trim().to_string(),
                        })
                    }
                }
                _ = token.cancelled() => {
                    let _ = child.kill().await;
                    stderr_task.abort();
                    Err(AgentError::Cancelled)
                }
            }
        });

        Ok(AgentSession {
            events: rx,
            cancel,
            waiter,
        })
    }
}

// ── Scripted fake ──

/// How a scripted run ends after its lines are delivered.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Success,
    Exit { code: i32, stderr: String },
    /// Keep the session open until the token fires, then report cancellation.
    Hang,
}

#[derive(Debug, Clone)]
struct ScriptedRun {
    lines: Vec<String>,
    outcome: ScriptedOutcome,
}

/// Test agent replaying canned stdout lines through the real parser.
/// Pops one run per call; exhausted scripts yield an empty successful run.
#[derive(Default)]
pub struct ScriptedAgent {
    runs: Mutex<VecDeque<ScriptedRun>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_run(&self, lines: &[&str], outcome: ScriptedOutcome) {
        self.runs.lock().unwrap().push_back(ScriptedRun {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            outcome,
        });
    }

    /// Exact prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Agent for ScriptedAgent {
    async fn run(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<AgentSession, AgentError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let run = self
            .runs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedRun {
                lines: Vec::new(),
                outcome: ScriptedOutcome::Success,
            });

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let token = cancel.clone();
        let waiter = tokio::spawn(async move {
            for line in &run.lines {
                if token.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }
                if let Some(event) = stream::parse_line(line) {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
            match run.outcome {
                ScriptedOutcome::Success => {
                    drop(tx);
                    Ok(())
                }
                ScriptedOutcome::Exit { code, stderr } => {
                    drop(tx);
                    Err(AgentError::Exit { code, stderr })
                }
                ScriptedOutcome::Hang => {
                    // tx stays open: the events channel mimics a live stream.
                    token.cancelled().await;
                    drop(tx);
                    Err(AgentError::Cancelled)
                }
            }
        });

        Ok(AgentSession {
            events: rx,
            cancel,
            waiter,
        })
    }
}
