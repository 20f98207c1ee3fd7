//! Command execution.
//!
//! This module dispatches a transformer's commands to the process launcher or
//! to the builtin registry.

pub mod builtin;
pub mod process;

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::execute::cancel::CancellationToken;
use crate::execute::types::{EchoMode, TransformerError};
use crate::transformer::Command;

pub use builtin::{Builtin, BuiltinError, BuiltinRegistry};
pub use process::{CommandOutput, run_process};

/// Everything a command needs besides itself.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
  pub root: &'a Path,
  pub builtins: &'a BuiltinRegistry,
  pub kill_timeout: Duration,
  pub echo_mode: EchoMode,
  pub cancel: &'a CancellationToken,
}

/// Execute a single command.
///
/// A process exiting outside its accepted range becomes
/// [`TransformerError::CommandFailed`] carrying the captured stderr.
pub async fn execute_command(command: &Command, ctx: &CommandContext<'_>) -> Result<CommandOutput, TransformerError> {
  echo(command, ctx.echo_mode);

  if ctx.cancel.is_cancelled() {
    return Err(TransformerError::Interrupted {
      command: command.command_line(),
    });
  }

  match command {
    Command::Process(cmd) => {
      let output = run_process(cmd, ctx.root, ctx.kill_timeout, ctx.cancel).await?;
      if !output.success {
        return Err(TransformerError::CommandFailed {
          command: cmd.command_line(),
          code: output.code,
          stderr: output.stderr,
        });
      }
      Ok(output)
    }

    Command::Builtin(cmd) => {
      let builtin = ctx
        .builtins
        .get(&cmd.name)
        .cloned()
        .ok_or_else(|| TransformerError::UnknownBuiltin(cmd.name.clone()))?;
      let args = cmd.args.clone();
      let root = ctx.root.to_path_buf();

      let result = tokio::task::spawn_blocking(move || builtin.run(&args, &root))
        .await
        .map_err(|e| TransformerError::Panicked(e.to_string()))?;
      result.map_err(|source| TransformerError::Builtin {
        name: cmd.name.clone(),
        source,
      })?;

      Ok(CommandOutput {
        code: Some(0),
        stdout: String::new(),
        stderr: String::new(),
        success: true,
      })
    }
  }
}

fn echo(command: &Command, mode: EchoMode) {
  let text = match (mode, command.description()) {
    (EchoMode::Description, Some(description)) => description.to_string(),
    _ => command.command_line(),
  };
  if command.is_silent() {
    debug!(command = %text, "running");
  } else {
    info!("{text}");
  }
}
