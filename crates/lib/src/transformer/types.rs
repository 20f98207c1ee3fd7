use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactId;

use super::command::{Command, CommandSignature};

/// Arena index of a transformer in the build graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransformerId(pub(crate) u32);

impl TransformerId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

impl std::fmt::Display for TransformerId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "t{}", self.0)
  }
}

/// Identifier of the rule a transformer was created from, for traceability.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub String);

impl std::fmt::Display for RuleId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for RuleId {
  fn from(s: &str) -> Self {
    RuleId(s.to_string())
  }
}

/// A command list bound to specific input and output artifacts.
#[derive(Debug, Clone)]
pub struct Transformer {
  pub rule: RuleId,

  /// Name of the owning product.
  pub product: String,

  pub inputs: Vec<ArtifactId>,
  pub outputs: Vec<ArtifactId>,

  /// Artifacts that must be built first but do not make this transformer dirty.
  pub explicit_depends: Vec<ArtifactId>,

  pub commands: Vec<Command>,

  /// Signature of `commands` applied to `inputs`.
  pub signature: CommandSignature,

  /// Signature recorded by the last successful run.
  pub last_run: Option<CommandSignature>,
}

impl Transformer {
  /// True if the commands differ from the last successful run, or it never ran.
  pub fn command_changed(&self) -> bool {
    self.last_run.as_ref() != Some(&self.signature)
  }

  /// Short description for logs and reports.
  pub fn describe(&self) -> String {
    self
      .commands
      .iter()
      .find_map(|c| c.description().map(str::to_string))
      .unwrap_or_else(|| format!("applying rule '{}'", self.rule))
  }
}
