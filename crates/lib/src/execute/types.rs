//! Types for build execution.
//!
//! This module defines the options, progress events, per-transformer states,
//! errors and the final report of a build.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::consts::JOBS_ENV;
use crate::fingerprint::{FingerprintError, FingerprintMode};
use crate::graph::GraphError;
use crate::lock::LockError;
use crate::persist::PersistenceError;
use crate::project::LoadError;
use crate::transformer::{RuleId, TransformerId};

use super::actions::BuiltinError;

/// How commands are echoed while a build runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EchoMode {
  /// Log each command's description, falling back to its command line.
  #[default]
  Description,
  /// Log the full command line.
  CommandLine,
}

/// Configuration for a build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
  /// Maximum number of transformers running at once.
  pub jobs: usize,

  /// Continue with independent transformers after a failure.
  pub keep_going: bool,

  /// Walk the schedule without running commands or recording state.
  pub dry_run: bool,

  pub fingerprint_mode: FingerprintMode,

  /// Source files known to have changed. When non-empty, other sources are
  /// assumed unchanged.
  pub changed_files: HashSet<PathBuf>,

  /// Grace period between the termination signal and a forced kill.
  pub kill_timeout: Duration,

  pub echo_mode: EchoMode,

  /// Products to build; all if empty.
  pub products: Vec<String>,
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self {
      jobs: default_jobs(),
      keep_going: true,
      dry_run: false,
      fingerprint_mode: FingerprintMode::default(),
      changed_files: HashSet::new(),
      kill_timeout: Duration::from_secs(5),
      echo_mode: EchoMode::default(),
      products: Vec::new(),
    }
  }
}

/// `KILN_JOBS` if set to a positive number, else the host parallelism.
pub fn default_jobs() -> usize {
  std::env::var(JOBS_ENV)
    .ok()
    .and_then(|v| v.trim().parse::<usize>().ok())
    .filter(|&n| n > 0)
    .unwrap_or_else(|| std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4))
}

/// Lifecycle of a scheduled transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformerState {
  Pending,
  Ready,
  Running,
  Succeeded,
  Failed,
  Skipped,
}

impl TransformerState {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
  Succeeded,
  Failed,
  Cancelled,
}

/// Progress notification sent while a build runs.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
  Started {
    transformer: TransformerId,
    description: String,
    percentage: u8,
  },
  Finished {
    transformer: TransformerId,
    description: String,
    success: bool,
    percentage: u8,
  },
  Skipped {
    transformer: TransformerId,
    description: String,
    percentage: u8,
  },
}

/// Errors of a single transformer. They fail that transformer only.
#[derive(Debug, Error)]
pub enum TransformerError {
  #[error("command failed with exit code {code:?}: {command}")]
  CommandFailed {
    command: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("failed to start {command}: {source}")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },

  #[error("command did not produce {path}")]
  MissingOutput { path: PathBuf },

  #[error("interrupted: {command}")]
  Interrupted { command: String },

  #[error("unknown builtin command: {0}")]
  UnknownBuiltin(String),

  #[error("builtin '{name}' failed: {source}")]
  Builtin {
    name: String,
    #[source]
    source: BuiltinError,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Fingerprint(#[from] FingerprintError),

  #[error("transformer task panicked: {0}")]
  Panicked(String),
}

impl TransformerError {
  /// The command line involved, if the error came from a command.
  pub fn command(&self) -> Option<&str> {
    match self {
      Self::CommandFailed { command, .. } | Self::Spawn { command, .. } | Self::Interrupted { command } => {
        Some(command)
      }
      _ => None,
    }
  }

  /// Captured stderr of a failed command.
  pub fn stderr(&self) -> Option<&str> {
    match self {
      Self::CommandFailed { stderr, .. } if !stderr.is_empty() => Some(stderr),
      _ => None,
    }
  }
}

/// Errors that abort a build before or around execution.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Fingerprint(#[from] FingerprintError),

  #[error(transparent)]
  Load(#[from] LoadError),

  #[error(transparent)]
  Persistence(#[from] PersistenceError),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Clean(#[from] crate::clean::CleanError),

  #[error(transparent)]
  Scan(#[from] crate::scanner::ScanError),

  #[error("unknown product: {0}")]
  UnknownProduct(String),
}

/// A transformer that failed, with what it ran.
#[derive(Debug)]
pub struct TransformerFailure {
  pub transformer: TransformerId,
  pub rule: RuleId,
  pub description: String,
  pub error: TransformerError,
}

/// A transformer that never ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTransformer {
  pub transformer: TransformerId,
  pub rule: RuleId,
  pub description: String,

  /// The failed transformer it depended on; `None` when skipped because the
  /// build stopped or was cancelled.
  pub failed_ancestor: Option<TransformerId>,
}

/// Outcome of a build.
#[derive(Debug)]
pub struct BuildReport {
  pub status: BuildStatus,

  /// Final state of every scheduled transformer.
  pub states: BTreeMap<TransformerId, TransformerState>,

  /// Transformers that ran successfully, in completion order.
  pub executed: Vec<TransformerId>,

  pub failures: Vec<TransformerFailure>,

  pub skipped: Vec<SkippedTransformer>,
}

impl BuildReport {
  pub(crate) fn empty() -> Self {
    Self {
      status: BuildStatus::Succeeded,
      states: BTreeMap::new(),
      executed: Vec::new(),
      failures: Vec::new(),
      skipped: Vec::new(),
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == BuildStatus::Succeeded
  }

  /// Number of transformers the build scheduled.
  pub fn total(&self) -> usize {
    self.states.len()
  }

  pub fn state(&self, id: TransformerId) -> Option<TransformerState> {
    self.states.get(&id).copied()
  }
}
