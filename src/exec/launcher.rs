//! Process launching boundary.
//!
//! The executor never spawns processes itself; it hands a [`LaunchRequest`] to a
//! [`ProcessLauncher`]. [`TokioLauncher`] is the real implementation, tests
//! substitute a recording one.
//!
//! On unix a request with a timeout runs in its own process group, and expiry
//! kills the whole group. Such a child is not in the terminal's foreground
//! group, so Ctrl-C is forwarded to the group by hand.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::debug;

/// How long to keep draining captured pipes after a timeout kill.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Return code after Ctrl-C, as a shell reports SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

/// Everything needed to start one subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Applied on top of the inherited environment.
    pub env_overlay: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    /// Capture stdout/stderr instead of inheriting them.
    pub capture: bool,
}

impl LaunchRequest {
    /// Program followed by its arguments.
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOutcome {
    pub return_code: i32,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub timed_out: bool,
}

pub trait ProcessLauncher: Send + Sync {
    /// Run the request to completion (or timeout). An `Err` means the process
    /// could not be started at all.
    fn launch(&self, request: &LaunchRequest) -> io::Result<LaunchOutcome>;
}

/// Launches through `tokio::process` on a runtime owned by the call.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, request: &LaunchRequest) -> io::Result<LaunchOutcome> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(run(request))
    }
}

async fn run(request: &LaunchRequest) -> io::Result<LaunchOutcome> {
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .envs(&request.env_overlay)
        .stdin(Stdio::inherit())
        .kill_on_drop(true);
    if let Some(dir) = &request.cwd {
        cmd.current_dir(dir);
    }
    if request.capture {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    }
    #[cfg(unix)]
    if request.timeout.is_some() {
        cmd.process_group(0);
    }

    let mut child = cmd.spawn()?;
    debug!(program = %request.program, pid = ?child.id(), "spawned");

    let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_all(s)));
    let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_all(s)));

    let (return_code, timed_out) = match request.timeout {
        None => (exit_code(child.wait().await?), false),
        Some(limit) => {
            // `None` means Ctrl-C arrived first.
            let waited = tokio::select! {
                waited = tokio::time::timeout(limit, child.wait()) => Some(waited),
                Ok(()) = tokio::signal::ctrl_c() => None,
            };
            match waited {
                Some(Ok(status)) => (exit_code(status?), false),
                Some(Err(_)) => {
                    debug!(program = %request.program, "timeout expired, killing");
                    kill_group(&mut child).await;
                    (crate::error::EXIT_TIMED_OUT, true)
                }
                None => {
                    debug!(program = %request.program, "interrupted, killing");
                    kill_group(&mut child).await;
                    (EXIT_INTERRUPTED, false)
                }
            }
        }
    };

    Ok(LaunchOutcome {
        return_code,
        stdout: drain(stdout_task, timed_out).await,
        stderr: drain(stderr_task, timed_out).await,
        timed_out,
    })
}

/// Kill the child and everything else in its process group.
async fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;
        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            debug!(pid, error = %e, "process group kill failed");
        }
    }
    // Already exited between the timeout and the kill is fine.
    let _ = child.kill().await;
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

async fn drain(
    task: Option<tokio::task::JoinHandle<io::Result<Vec<u8>>>>,
    timed_out: bool,
) -> Option<String> {
    let task = task?;
    let bytes = if timed_out {
        // A grandchild may still hold the pipe open.
        match tokio::time::timeout(DRAIN_GRACE, task).await {
            Ok(Ok(Ok(bytes))) => bytes,
            _ => Vec::new(),
        }
    } else {
        match task.await {
            Ok(Ok(bytes)) => bytes,
            _ => Vec::new(),
        }
    };
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Exit code of a finished process; death by signal maps to `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
