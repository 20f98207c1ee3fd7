use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::transformer::TransformerId;

/// Arena index of an artifact in the build graph.
///
/// Ids are stable for the lifetime of the artifact. Slots of removed
/// artifacts may be reused by later insertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactId(pub(crate) NodeIndex);

impl ArtifactId {
  pub fn index(self) -> usize {
    self.0.index()
  }
}

impl std::fmt::Display for ArtifactId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "a{}", self.0.index())
  }
}

/// Whether an artifact is supplied by the project or produced by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
  Source,
  Generated,
}

/// Classification labels of a file, e.g. `cpp`, `obj`, `application`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileTags(BTreeSet<String>);

impl FileTags {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, tag: impl Into<String>) -> bool {
    self.0.insert(tag.into())
  }

  pub fn contains(&self, tag: &str) -> bool {
    self.0.contains(tag)
  }

  /// True if at least one tag is shared with `other`.
  pub fn intersects(&self, other: &FileTags) -> bool {
    self.0.iter().any(|tag| other.0.contains(tag))
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(String::as_str)
  }
}

impl<S: Into<String>> FromIterator<S> for FileTags {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self(iter.into_iter().map(Into::into).collect())
  }
}

impl std::fmt::Display for FileTags {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let tags: Vec<&str> = self.iter().collect();
    write!(f, "[{}]", tags.join(", "))
  }
}

/// A file node in the build graph.
#[derive(Debug, Clone)]
pub struct Artifact {
  path: PathBuf,

  /// Source or generated.
  pub kind: ArtifactKind,

  pub tags: FileTags,

  /// Name of the owning product.
  pub product: String,

  /// Treat as dirty on every build.
  pub always_update: bool,

  /// Fingerprint recorded after the last successful build that used this artifact.
  pub recorded: Option<Fingerprint>,

  /// Transformer producing this artifact, if generated.
  pub(crate) producer: Option<TransformerId>,

  /// Transformers consuming this artifact as an input.
  pub(crate) consumers: BTreeSet<TransformerId>,

  /// Creation order, used to break ties deterministically.
  pub(crate) seq: u64,
}

impl Artifact {
  pub(crate) fn new(path: PathBuf, kind: ArtifactKind, product: &str, tags: FileTags, seq: u64) -> Self {
    Self {
      path,
      kind,
      tags,
      product: product.to_string(),
      always_update: false,
      recorded: None,
      producer: None,
      consumers: BTreeSet::new(),
      seq,
    }
  }

  /// The artifact's absolute path. Immutable after creation.
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn producer(&self) -> Option<TransformerId> {
    self.producer
  }

  pub fn consumers(&self) -> impl Iterator<Item = TransformerId> + '_ {
    self.consumers.iter().copied()
  }

  pub fn is_generated(&self) -> bool {
    self.kind == ArtifactKind::Generated
  }

  /// Path relative to `root` when possible, for display.
  pub fn display_path(&self, root: &Path) -> String {
    self.path.strip_prefix(root).unwrap_or(&self.path).display().to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tags_intersect() {
    let cpp: FileTags = ["cpp", "source"].into_iter().collect();
    let obj: FileTags = ["obj"].into_iter().collect();
    let rule_input: FileTags = ["cpp", "c"].into_iter().collect();

    assert!(cpp.intersects(&rule_input));
    assert!(!obj.intersects(&rule_input));
    assert_eq!(cpp.to_string(), "[cpp, source]");
  }

  #[test]
  fn display_path_strips_root() {
    let artifact = Artifact::new(
      PathBuf::from("/project/src/a.cpp"),
      ArtifactKind::Source,
      "app",
      FileTags::new(),
      0,
    );
    assert_eq!(artifact.display_path(Path::new("/project")), "src/a.cpp");
    assert_eq!(artifact.display_path(Path::new("/other")), "/project/src/a.cpp");
  }
}
