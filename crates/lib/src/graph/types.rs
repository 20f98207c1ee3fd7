use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of a dependency edge from a parent artifact to a child artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
  /// The parent must be rebuilt when the child changes.
  Dependency,
  /// The child must be built first, but its changes do not dirty the parent.
  Ordering,
}

/// Structural errors of the build graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  /// A dependency cycle. `path` lists each artifact of the cycle exactly once,
  /// each depending on the next and the last depending on the first.
  #[error("dependency cycle detected: {}", format_cycle(.path))]
  CycleDetected { path: Vec<PathBuf> },

  #[error("duplicate artifact {path}: {reason}")]
  DuplicatePath { path: PathBuf, reason: String },

  #[error("rule '{rule}' lists {path} as both input and output")]
  OverlappingInputsOutputs { rule: String, path: PathBuf },

  #[error("rule '{rule}' declares no outputs")]
  NoOutputs { rule: String },

  #[error("{0} cannot depend on itself")]
  SelfDependency(PathBuf),

  #[error("unknown artifact id {0}")]
  UnknownArtifact(String),

  #[error("unknown transformer id {0}")]
  UnknownTransformer(String),

  #[error("failed to compute command signature: {0}")]
  Signature(String),

  #[error("inconsistent build graph: {0}")]
  Inconsistent(String),
}

fn format_cycle(path: &[PathBuf]) -> String {
  let mut parts: Vec<String> = path.iter().map(|p| p.display().to_string()).collect();
  if let Some(first) = parts.first().cloned() {
    parts.push(first);
  }
  parts.join(" -> ")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cycle_display_closes_the_loop() {
    let err = GraphError::CycleDetected {
      path: vec![PathBuf::from("a"), PathBuf::from("b")],
    };
    assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
  }
}
