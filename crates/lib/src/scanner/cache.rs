use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fingerprint::{Fingerprint, Fingerprinter};

use super::ScannedDependency;

/// The dependencies one scanner found in a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedScan {
  /// Fingerprint of the file when it was scanned.
  pub fingerprint: Fingerprint,
  pub scanner: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub dependencies: Vec<ScannedDependency>,
}

/// Raw scan results by file path, kept with the build data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanCache(BTreeMap<PathBuf, CachedScan>);

impl ScanCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// The recorded fingerprint of `path`, to spare content mode a rehash.
  pub fn fingerprint(&self, path: &Path) -> Option<&Fingerprint> {
    self.0.get(path).map(|cached| &cached.fingerprint)
  }

  /// Cached dependencies of `path` if `scanner` scanned it while it had
  /// fingerprint `current`.
  pub fn lookup(
    &self,
    path: &Path,
    scanner: &str,
    current: &Fingerprint,
    fingerprinter: &Fingerprinter,
  ) -> Option<&[ScannedDependency]> {
    self
      .0
      .get(path)
      .filter(|cached| cached.scanner == scanner && fingerprinter.unchanged(&cached.fingerprint, current))
      .map(|cached| cached.dependencies.as_slice())
  }

  pub fn insert(&mut self, path: PathBuf, scan: CachedScan) {
    self.0.insert(path, scan);
  }

  /// Drop entries of files that no longer exist.
  pub fn retain_existing(&mut self) -> usize {
    let before = self.0.len();
    self.0.retain(|path, _| path.exists());
    before - self.0.len()
  }
}
