//! External process commands.
//!
//! Processes inherit the environment of the build, extended by the command's
//! own variables, and run in the command's working directory (the project
//! root by default). Output is captured. When the build is cancelled the
//! process receives a termination signal, gets `kill_timeout` to exit, and is
//! then killed.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::execute::cancel::CancellationToken;
use crate::execute::types::TransformerError;
use crate::transformer::ProcessCommand;

/// Result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
  /// Exit code; `None` if the process was terminated by a signal.
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,

  /// Exit code within `0..=max_exit_code`.
  pub success: bool,
}

/// Run `cmd` to completion, or until `cancel` fires.
///
/// Returns `Err(Interrupted)` when cancelled. A non-zero exit is not an error
/// here; inspect [`CommandOutput::success`].
pub async fn run_process(
  cmd: &ProcessCommand,
  root: &Path,
  kill_timeout: Duration,
  cancel: &CancellationToken,
) -> Result<CommandOutput, TransformerError> {
  let command_line = cmd.command_line();
  let working_dir = cmd.resolved_working_dir(root);

  let mut command = Command::new(&cmd.program);
  command
    .args(&cmd.arguments)
    .current_dir(&working_dir)
    .envs(&cmd.environment)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  debug!(command = %command_line, working_dir = ?working_dir, "spawning process");

  let mut child = command.spawn().map_err(|source| TransformerError::Spawn {
    command: command_line.clone(),
    source,
  })?;

  let stdout_task = tokio::spawn(drain(child.stdout.take()));
  let stderr_task = tokio::spawn(drain(child.stderr.take()));

  let status = tokio::select! {
    status = child.wait() => status?,
    () = cancel.cancelled() => {
      terminate(&mut child, kill_timeout).await;
      return Err(TransformerError::Interrupted { command: command_line });
    }
  };

  let stdout = stdout_task.await.unwrap_or_default();
  let stderr = stderr_task.await.unwrap_or_default();

  let stdout = capture(cmd.stdout_path.as_deref(), root, stdout).await?;
  let stderr = capture(cmd.stderr_path.as_deref(), root, stderr).await?;

  let code = status.code();
  let success = code.is_some_and(|c| (0..=cmd.max_exit_code.max(0)).contains(&c));

  if !stdout.is_empty() {
    debug!(stdout = %stdout.trim_end(), "command stdout");
  }
  if !success && !stderr.is_empty() {
    debug!(stderr = %stderr.trim_end(), "command stderr");
  }

  Ok(CommandOutput {
    code,
    stdout,
    stderr,
    success,
  })
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
  let mut buf = Vec::new();
  if let Some(mut pipe) = pipe
    && let Err(e) = pipe.read_to_end(&mut buf).await
  {
    debug!(error = %e, "failed to read process output");
  }
  buf
}

/// Write `bytes` to `path` (relative to `root`) if set; otherwise return them
/// as text.
async fn capture(path: Option<&Path>, root: &Path, bytes: Vec<u8>) -> Result<String, TransformerError> {
  match path {
    Some(path) => {
      let path = root.join(path);
      if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
      }
      tokio::fs::write(&path, &bytes).await?;
      Ok(String::new())
    }
    None => Ok(String::from_utf8_lossy(&bytes).into_owned()),
  }
}

/// Ask the process to exit, then force it after `timeout`.
async fn terminate(child: &mut Child, timeout: Duration) {
  if request_exit(child) {
    if tokio::time::timeout(timeout, child.wait()).await.is_ok() {
      debug!(pid = ?child.id(), "process exited after termination request");
      return;
    }
    warn!(timeout = ?timeout, "process ignored termination request, killing");
  }

  if let Err(e) = child.kill().await {
    debug!(error = %e, "failed to kill process");
  }
}

#[cfg(unix)]
fn request_exit(child: &Child) -> bool {
  use nix::sys::signal::{Signal, kill};
  use nix::unistd::Pid;

  let Some(pid) = child.id() else {
    return false;
  };
  match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
    Ok(()) => true,
    Err(e) => {
      debug!(pid, error = %e, "failed to send SIGTERM");
      false
    }
  }
}

#[cfg(not(unix))]
fn request_exit(_child: &Child) -> bool {
  false
}
