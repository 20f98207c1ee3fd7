//! File fingerprints for change detection.
//!
//! A fingerprint records a file's modification time and size and, in content
//! mode, its SHA-256 hash. Timestamp mode compares only time and size.
//! Content mode reuses a recorded hash when time and size are unchanged, so
//! unchanged files are not rehashed on every build.

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::util::hash::{ContentHash, ContentHashError, hash_directory, hash_file};

/// How file changes are detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
  /// Compare content hashes.
  #[default]
  Content,
  /// Compare modification time and size only.
  Timestamp,
}

/// Recorded state of a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
  /// Modification time in nanoseconds since the Unix epoch.
  pub modified: u64,
  pub size: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub hash: Option<ContentHash>,
}

impl Fingerprint {
  fn same_stat(&self, other: &Fingerprint) -> bool {
    self.modified == other.modified && self.size == other.size
  }
}

#[derive(Debug, Error)]
pub enum FingerprintError {
  #[error("failed to stat {path}: {source}")]
  Stat {
    path: String,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Hash(#[from] ContentHashError),
}

/// Computes and compares fingerprints according to a [`FingerprintMode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Fingerprinter {
  mode: FingerprintMode,
}

impl Fingerprinter {
  pub fn new(mode: FingerprintMode) -> Self {
    Self { mode }
  }

  pub fn mode(&self) -> FingerprintMode {
    self.mode
  }

  /// Fingerprint the file at `path`.
  ///
  /// Returns `Ok(None)` if the file does not exist. `recorded` lets content
  /// mode skip rehashing when time and size are unchanged.
  pub fn compute(&self, path: &Path, recorded: Option<&Fingerprint>) -> Result<Option<Fingerprint>, FingerprintError> {
    let metadata = match fs::metadata(path) {
      Ok(m) => m,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => {
        return Err(FingerprintError::Stat {
          path: path.display().to_string(),
          source: e,
        });
      }
    };

    let modified = metadata
      .modified()
      .ok()
      .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
      .map(|d| d.as_nanos() as u64)
      .unwrap_or(0);

    let mut fingerprint = Fingerprint {
      modified,
      size: if metadata.is_dir() { 0 } else { metadata.len() },
      hash: None,
    };

    if self.mode == FingerprintMode::Content {
      let reusable = recorded.filter(|r| r.hash.is_some() && r.same_stat(&fingerprint));
      fingerprint.hash = match reusable {
        Some(r) => r.hash.clone(),
        None => {
          trace!(path = %path.display(), "hashing");
          Some(if metadata.is_dir() {
            hash_directory(path)?
          } else {
            hash_file(path)?
          })
        }
      };
    }

    Ok(Some(fingerprint))
  }

  /// True if `current` represents the same file state as `recorded`.
  pub fn unchanged(&self, recorded: &Fingerprint, current: &Fingerprint) -> bool {
    match (self.mode, &recorded.hash, &current.hash) {
      (FingerprintMode::Content, Some(a), Some(b)) => a == b,
      _ => recorded.same_stat(current),
    }
  }
}
