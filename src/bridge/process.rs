//! External analysis as a child process.
//!
//! The child gets the entity symbols as trailing arguments and must print a
//! single JSON object on stdout. Stderr is only logged. The run races process
//! exit against the deadline and a cancellation token; whichever loses, the
//! child is killed and reaped before returning.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::BridgeError;

/// Most stderr kept for the log line.
const STDERR_TAIL: usize = 2_048;

/// Something that can produce a raw analysis payload for a set of entities
/// before `deadline`.
#[async_trait]
pub trait ExternalAnalyzer: Send + Sync {
    async fn run(
        &self,
        entities: &[String],
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Result<String, BridgeError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct ProcessAnalyzer {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ProcessAnalyzer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Fixed arguments placed before the entity symbols.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

enum Race {
    Exited(std::io::Result<std::process::ExitStatus>),
    Deadline,
    Cancelled,
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut p) = pipe {
            p.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

/// Wait for a reader task, but never past `deadline`.
async fn collect(task: JoinHandle<std::io::Result<Vec<u8>>>, deadline: Instant) -> Option<Vec<u8>> {
    let abort = task.abort_handle();
    match tokio::time::timeout_at(deadline, task).await {
        Ok(Ok(Ok(buf))) => Some(buf),
        Ok(_) => None,
        Err(_) => {
            abort.abort();
            None
        }
    }
}

fn tail(bytes: &[u8]) -> String {
    let from = bytes.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&bytes[from..]).trim().to_string()
}

#[async_trait]
impl ExternalAnalyzer for ProcessAnalyzer {
    async fn run(
        &self,
        entities: &[String],
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Result<String, BridgeError> {
        let budget = deadline.saturating_duration_since(Instant::now());

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(entities)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(BridgeError::Io)?;
        let pid = child.id();
        let out_task = drain(child.stdout.take());
        let err_task = drain(child.stderr.take());

        let race = tokio::select! {
            status = child.wait() => Race::Exited(status),
            _ = tokio::time::sleep_until(deadline) => Race::Deadline,
            _ = cancel.cancelled() => Race::Cancelled,
        };

        let status = match race {
            Race::Exited(status) => status,
            Race::Deadline | Race::Cancelled => {
                // kill() also reaps, so the child is gone once this returns
                if let Err(e) = child.kill().await {
                    warn!(target: "bridge", ?pid, error = %e, "failed to kill analysis process");
                }
                out_task.abort();
                err_task.abort();
                return Err(match race {
                    Race::Deadline => BridgeError::TimedOut(budget),
                    _ => BridgeError::Cancelled,
                });
            }
        };

        let status = match status {
            Ok(s) => s,
            Err(e) => {
                out_task.abort();
                err_task.abort();
                return Err(BridgeError::Io(e));
            }
        };

        // a grandchild can hold the pipes open after the child exits
        let stdout = collect(out_task, deadline).await;
        let stderr = collect(err_task, deadline).await.unwrap_or_default();
        if !stderr.is_empty() {
            debug!(target: "bridge", ?pid, stderr = %tail(&stderr), "analysis stderr");
        }

        if !status.success() {
            return Err(BridgeError::Exit {
                status: status.to_string(),
            });
        }
        let stdout = stdout.ok_or(BridgeError::TimedOut(budget))?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    fn name(&self) -> &str {
        "process"
    }
}

/// Convenience for callers that hold a budget rather than an instant.
pub fn deadline_in(budget: Duration) -> Instant {
    Instant::now() + budget
}
