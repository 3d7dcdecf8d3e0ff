//! Scoped ownership of a spawned protocol helper (`git upload-pack` /
//! `git receive-pack`).
//!
//! A [`GitProcess`] owns the child, its pipes and any task feeding its
//! stdin.  Dropping it before the child has been waited on aborts the feeder,
//! kills the child and reaps it in the background, so every exit path
//! (success, client disconnect, decode failure, timeout) leaves nothing
//! running.

use std::future::Future;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use prometheus_client::metrics::gauge::Gauge;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::Service;

/// At most this much helper stderr is kept for diagnostics; the rest is
/// drained and discarded.
const STDERR_CAPTURE_LIMIT: u64 = 64 * 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn git {subcommand}")]
    Spawn {
        subcommand: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("git {subcommand} exited with {status}")]
    Exit {
        subcommand: &'static str,
        status: ExitStatus,
    },
    #[error("pipe to git {subcommand} failed")]
    Pipe {
        subcommand: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("git {subcommand} exceeded the {}s time limit", limit.as_secs())]
    TimedOut {
        subcommand: &'static str,
        limit: Duration,
    },
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// How the helper is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperMode {
    /// `--stateless-rpc --advertise-refs`: print the ref advertisement and exit.
    Advertise,
    /// `--stateless-rpc`: one request on stdin, one response on stdout.
    StatelessRpc,
}

/// Everything needed to start a helper against one repository.
#[derive(Debug, Clone, Copy)]
pub struct HelperSpec<'a> {
    pub git: &'a Path,
    pub service: Service,
    pub mode: HelperMode,
    pub repo_path: &'a Path,
    /// Forwarded as `GIT_PROTOCOL` (e.g. `version=2`).
    pub git_protocol: Option<&'a str>,
}

impl HelperSpec<'_> {
    fn command(&self) -> Command {
        let mut cmd = Command::new(self.git);
        cmd.arg(self.service.subcommand()).arg("--stateless-rpc");
        if self.mode == HelperMode::Advertise {
            cmd.arg("--advertise-refs");
        }
        cmd.arg(self.repo_path);

        if let Some(protocol) = self.git_protocol {
            cmd.env("GIT_PROTOCOL", protocol);
        }

        cmd.stdin(match self.mode {
            HelperMode::Advertise => Stdio::null(),
            HelperMode::StatelessRpc => Stdio::piped(),
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

// ---------------------------------------------------------------------------
// Process guard
// ---------------------------------------------------------------------------

pub struct GitProcess {
    service: Service,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    feeder: Option<AbortHandle>,
    active: Option<Gauge>,
}

impl GitProcess {
    /// Spawn the helper described by `spec`.
    pub fn spawn(spec: HelperSpec<'_>) -> Result<Self, ProcessError> {
        let subcommand = spec.service.subcommand();
        let mut child = spec
            .command()
            .spawn()
            .map_err(|source| ProcessError::Spawn { subcommand, source })?;

        debug!(
            pid = child.id(),
            service = %spec.service,
            mode = ?spec.mode,
            repo = %spec.repo_path.display(),
            "spawned git helper"
        );

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(drain_stderr(pipe)));

        Ok(Self {
            service: spec.service,
            child: Some(child),
            stdin,
            stdout,
            stderr,
            feeder: None,
            active: None,
        })
    }

    /// Count this process in `gauge` for as long as it is alive.
    pub fn track(&mut self, gauge: Gauge) {
        gauge.inc();
        self.active = Some(gauge);
    }

    /// OS process id, while the child has not been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Tie the task writing to stdin to this process: it is aborted when the
    /// process is dropped.
    pub fn attach_feeder<T>(&mut self, task: &JoinHandle<T>) {
        self.feeder = Some(task.abort_handle());
    }

    /// Read stdout to the end, then wait for a successful exit.
    ///
    /// Only for bounded output such as a ref advertisement.
    pub async fn collect_stdout(&mut self) -> Result<Vec<u8>, ProcessError> {
        let subcommand = self.service.subcommand();
        let mut out = Vec::new();
        if let Some(mut stdout) = self.stdout.take() {
            stdout
                .read_to_end(&mut out)
                .await
                .map_err(|source| ProcessError::Pipe { subcommand, source })?;
        }
        self.wait().await?;
        Ok(out)
    }

    /// Close stdin, wait for the child and check its exit status.
    ///
    /// A non-zero status is logged together with the captured stderr and
    /// returned as [`ProcessError::Exit`].
    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let subcommand = self.service.subcommand();
        drop(self.stdin.take());

        let Some(child) = self.child.as_mut() else {
            return Err(ProcessError::Pipe {
                subcommand,
                source: std::io::Error::other("helper already reaped"),
            });
        };
        let status = child
            .wait()
            .await
            .map_err(|source| ProcessError::Pipe { subcommand, source })?;
        self.child = None;
        self.release_gauge();

        let stderr = match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if status.success() {
            debug!(service = %self.service, "git helper exited successfully");
            Ok(status)
        } else {
            warn!(
                service = %self.service,
                %status,
                stderr = %String::from_utf8_lossy(&stderr).trim(),
                "git helper exited with non-zero status"
            );
            Err(ProcessError::Exit { subcommand, status })
        }
    }

    fn release_gauge(&mut self) {
        if let Some(gauge) = self.active.take() {
            gauge.dec();
        }
    }
}

impl Drop for GitProcess {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        drop(self.stdin.take());
        drop(self.stdout.take());
        if let Some(stderr) = self.stderr.take() {
            stderr.abort();
        }
        self.release_gauge();

        let Some(mut child) = self.child.take() else {
            return;
        };
        debug!(pid = child.id(), service = %self.service, "terminating git helper");
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "git helper already gone");
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = child.wait().await;
            });
        }
    }
}

async fn drain_stderr(pipe: ChildStderr) -> Vec<u8> {
    read_capped(pipe, STDERR_CAPTURE_LIMIT).await
}

/// Read `reader` to the end, keeping only the first `limit` bytes.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, limit: u64) -> Vec<u8> {
    let mut kept = Vec::new();
    let _ = (&mut reader).take(limit).read_to_end(&mut kept).await;
    let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
    kept
}

// ---------------------------------------------------------------------------
// Deadlines
// ---------------------------------------------------------------------------

/// Point in time after which a helper is killed.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self {
            at: Instant::now() + limit,
            limit,
        }
    }

    pub fn timed_out(&self, subcommand: &'static str) -> ProcessError {
        ProcessError::TimedOut {
            subcommand,
            limit: self.limit,
        }
    }
}

/// Resolve with the timeout error once `deadline` passes; never when there is
/// none.
pub async fn deadline_elapsed(deadline: Option<Deadline>, subcommand: &'static str) -> ProcessError {
    match deadline {
        Some(d) => {
            tokio::time::sleep_until(d.at).await;
            d.timed_out(subcommand)
        }
        None => std::future::pending().await,
    }
}

/// Run `fut` to completion unless `deadline` passes first.
pub async fn run_until<F: Future>(
    deadline: Option<Deadline>,
    subcommand: &'static str,
    fut: F,
) -> Result<F::Output, ProcessError> {
    match deadline {
        Some(d) => tokio::time::timeout_at(d.at, fut)
            .await
            .map_err(|_| d.timed_out(subcommand)),
        None => Ok(fut.await),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
