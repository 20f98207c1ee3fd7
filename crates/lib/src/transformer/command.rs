//! Commands executed by transformers.
//!
//! A transformer runs an ordered list of commands. Each command is either an
//! external process or a builtin in-process operation looked up in a
//! [`BuiltinRegistry`](crate::execute::BuiltinRegistry) at execution time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::util::hash::{HashError, Hashable, ObjectHash};

/// Signature of a transformer's command list, used to detect command changes.
pub type CommandSignature = ObjectHash;

/// A single command of a transformer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
  /// Run an external program.
  Process(ProcessCommand),
  /// Run an in-process builtin operation.
  Builtin(BuiltinCommand),
}

impl Command {
  pub fn description(&self) -> Option<&str> {
    match self {
      Command::Process(cmd) => cmd.description.as_deref(),
      Command::Builtin(cmd) => cmd.description.as_deref(),
    }
  }

  pub fn is_silent(&self) -> bool {
    match self {
      Command::Process(cmd) => cmd.silent,
      Command::Builtin(cmd) => cmd.silent,
    }
  }

  /// Human-readable command line, used in reports and echo output.
  pub fn command_line(&self) -> String {
    match self {
      Command::Process(cmd) => cmd.command_line(),
      Command::Builtin(cmd) => {
        let mut parts = vec![format!("<{}>", cmd.name)];
        parts.extend(cmd.args.iter().cloned());
        parts.join(" ")
      }
    }
  }
}

/// An external process invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessCommand {
  pub program: String,

  #[serde(default)]
  pub arguments: Vec<String>,

  /// Working directory. Relative paths resolve against the project root;
  /// defaults to the project root.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub working_dir: Option<PathBuf>,

  /// Variables added to the inherited environment.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub environment: BTreeMap<String, String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,

  /// Highest exit code still considered a success.
  #[serde(default)]
  pub max_exit_code: i32,

  /// Write captured stdout to this file instead of reporting it.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stdout_path: Option<PathBuf>,

  /// Write captured stderr to this file instead of reporting it.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stderr_path: Option<PathBuf>,

  #[serde(default)]
  pub silent: bool,
}

impl ProcessCommand {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      arguments: Vec::new(),
      working_dir: None,
      environment: BTreeMap::new(),
      description: None,
      max_exit_code: 0,
      stdout_path: None,
      stderr_path: None,
      silent: false,
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.arguments.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.arguments.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.working_dir = Some(dir.into());
    self
  }

  pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.environment.insert(key.into(), value.into());
    self
  }

  /// Working directory resolved against `root`.
  pub fn resolved_working_dir(&self, root: &Path) -> PathBuf {
    match &self.working_dir {
      Some(dir) => root.join(dir),
      None => root.to_path_buf(),
    }
  }

  pub fn command_line(&self) -> String {
    let mut parts = vec![quote_arg(&self.program)];
    parts.extend(self.arguments.iter().map(|a| quote_arg(a)));
    parts.join(" ")
  }
}

impl From<ProcessCommand> for Command {
  fn from(cmd: ProcessCommand) -> Self {
    Command::Process(cmd)
  }
}

/// An in-process operation such as `copy` or `write`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuiltinCommand {
  pub name: String,

  #[serde(default)]
  pub args: Vec<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,

  #[serde(default)]
  pub silent: bool,
}

impl BuiltinCommand {
  pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      name: name.into(),
      args: args.into_iter().map(Into::into).collect(),
      description: None,
      silent: false,
    }
  }
}

impl From<BuiltinCommand> for Command {
  fn from(cmd: BuiltinCommand) -> Self {
    Command::Builtin(cmd)
  }
}

/// What a command signature covers: the commands and the input paths they run on.
#[derive(Serialize)]
struct SignatureSource<'a> {
  commands: &'a [Command],
  inputs: &'a [PathBuf],
}

impl Hashable for SignatureSource<'_> {}

/// Compute the signature of a command list applied to the given inputs.
pub fn command_signature(commands: &[Command], inputs: &[PathBuf]) -> Result<CommandSignature, HashError> {
  SignatureSource { commands, inputs }.compute_hash()
}

fn quote_arg(arg: &str) -> String {
  if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
    return arg.to_string();
  }
  format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn compile() -> Command {
    ProcessCommand::new("cc").args(["-c", "a.cpp", "-o", "a.o"]).into()
  }

  #[test]
  fn command_line_quotes_whitespace() {
    let cmd = ProcessCommand::new("echo").args(["hello world", "plain"]);
    assert_eq!(cmd.command_line(), "echo 'hello world' plain");
  }

  #[test]
  fn builtin_command_line() {
    let cmd: Command = BuiltinCommand::new("copy", ["a", "b"]).into();
    assert_eq!(cmd.command_line(), "<copy> a b");
  }

  #[test]
  fn signature_changes_with_arguments() {
    let inputs = vec![PathBuf::from("/p/a.cpp")];
    let base = command_signature(&[compile()], &inputs).unwrap();
    let same = command_signature(&[compile()], &inputs).unwrap();
    let optimized: Command = ProcessCommand::new("cc").args(["-O2", "-c", "a.cpp", "-o", "a.o"]).into();
    let changed = command_signature(&[optimized], &inputs).unwrap();

    assert_eq!(base, same);
    assert_ne!(base, changed);
  }

  #[test]
  fn signature_changes_with_inputs() {
    let a = command_signature(&[compile()], &[PathBuf::from("/p/a.cpp")]).unwrap();
    let b = command_signature(&[compile()], &[PathBuf::from("/p/b.cpp")]).unwrap();
    assert_ne!(a, b);
  }

  #[test]
  fn deserializes_tagged_commands() {
    let json = r#"[
      { "type": "process", "program": "cc", "arguments": ["-c"] },
      { "type": "builtin", "name": "touch", "args": ["out"] }
    ]"#;
    let commands: Vec<Command> = serde_json::from_str(json).unwrap();
    assert!(matches!(&commands[0], Command::Process(p) if p.program == "cc" && p.max_exit_code == 0));
    assert!(matches!(&commands[1], Command::Builtin(b) if b.name == "touch"));
  }
}
