use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::{ArtifactKind, FileTags};
use crate::fingerprint::Fingerprint;
use crate::graph::EdgeKind;
use crate::project::ProductBuildData;
use crate::scanner::ScanCache;
use crate::transformer::{Command, CommandSignature};

/// Current build data format version. Bump on any incompatible change.
pub const FORMAT_VERSION: u32 = 1;

/// On-disk form of a project. Ids are dense indices into the tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedProject {
  /// Kept first so it can be checked before the rest is parsed.
  pub format_version: u32,
  pub name: String,
  pub root: PathBuf,
  pub products: Vec<PersistedProduct>,
  pub artifacts: Vec<PersistedArtifact>,
  pub transformers: Vec<PersistedTransformer>,
  pub edges: Vec<PersistedEdge>,
  #[serde(default, skip_serializing_if = "ScanCache::is_empty")]
  pub scan_cache: ScanCache,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedProduct {
  pub name: String,
  pub targets: Vec<usize>,
  #[serde(default)]
  pub build_data: ProductBuildData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedArtifact {
  pub id: usize,
  pub path: PathBuf,
  pub product: String,
  pub kind: ArtifactKind,
  #[serde(default, skip_serializing_if = "FileTags::is_empty")]
  pub tags: FileTags,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub always_update: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fingerprint: Option<Fingerprint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTransformer {
  pub id: usize,
  pub rule: String,
  pub product: String,
  pub inputs: Vec<usize>,
  pub outputs: Vec<usize>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub explicit_depends: Vec<usize>,
  pub commands: Vec<Command>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_run: Option<CommandSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEdge {
  pub parent: usize,
  pub child: usize,
  pub kind: EdgeKind,
}

/// Reads only the version, so incompatible files are rejected before a full
/// parse can fail on unknown fields.
#[derive(Debug, Deserialize)]
pub(super) struct VersionHeader {
  pub format_version: u32,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
  #[error("build data format version {found} is not supported (expected {expected})")]
  VersionMismatch { found: u32, expected: u32 },

  #[error("build data is corrupt: {0}")]
  Corrupt(String),

  #[error("failed to serialize build data: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to read build data {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write build data {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}
