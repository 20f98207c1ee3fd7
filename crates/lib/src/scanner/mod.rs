//! Implicit dependency scanning.
//!
//! Before change tracking, each transformer input whose tags have a
//! registered [`DependencyScanner`] is read for the files it refers to. Found
//! files are scanned in turn with the same scanner. Every file that resolves
//! becomes a dependency child of the transformer's outputs, so a change to it
//! re-runs the transformer.
//!
//! Raw scan results are cached per file in the project's [`ScanCache`] and
//! reused while the file's fingerprint is unchanged.

mod cache;
mod include;

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::artifact::{ArtifactId, ArtifactKind, FileTags};
use crate::fingerprint::{FingerprintError, Fingerprinter};
use crate::graph::{BuildGraph, EdgeKind, GraphError};
use crate::project::Project;
use crate::transformer::TransformerId;

pub use cache::{CachedScan, ScanCache};
pub use include::IncludeScanner;

#[derive(Debug, Error)]
pub enum ScanError {
  #[error(transparent)]
  Fingerprint(#[from] FingerprintError),

  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// A file reference as written in a scanned file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedDependency {
  pub path: String,

  /// Resolve against the scanning file's directory before the search paths.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub local: bool,
}

/// Extracts file references from file contents.
pub trait DependencyScanner: Send + Sync {
  /// Identifies the scanner's results in the [`ScanCache`].
  fn name(&self) -> &str;

  /// References in `content`, in order of appearance.
  fn scan(&self, content: &str) -> Vec<ScannedDependency>;
}

/// Scanners by file tag, plus the directories non-local references resolve
/// against.
#[derive(Clone, Default)]
pub struct ScannerRegistry {
  scanners: BTreeMap<String, Vec<Arc<dyn DependencyScanner>>>,
  search_paths: Vec<PathBuf>,
}

impl std::fmt::Debug for ScannerRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ScannerRegistry")
      .field("tags", &self.scanners.keys().collect::<Vec<_>>())
      .field("search_paths", &self.search_paths)
      .finish()
  }
}

impl ScannerRegistry {
  /// An empty registry; nothing is scanned.
  pub fn new() -> Self {
    Self::default()
  }

  /// An [`IncludeScanner`] for the `c`, `cpp`, `hpp` and `h` tags.
  pub fn with_defaults() -> Self {
    let mut registry = Self::new();
    let include: Arc<dyn DependencyScanner> = Arc::new(IncludeScanner::new());
    for tag in ["c", "cpp", "hpp", "h"] {
      registry.register_shared(tag, include.clone());
    }
    registry
  }

  pub fn register(&mut self, tag: impl Into<String>, scanner: impl DependencyScanner + 'static) {
    self.register_shared(tag, Arc::new(scanner));
  }

  pub fn register_shared(&mut self, tag: impl Into<String>, scanner: Arc<dyn DependencyScanner>) {
    self.scanners.entry(tag.into()).or_default().push(scanner);
  }

  /// Directories searched for non-local references, relative to the project
  /// root unless absolute.
  pub fn with_search_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
    self.search_paths.extend(paths);
    self
  }

  pub fn search_paths(&self) -> &[PathBuf] {
    &self.search_paths
  }

  pub fn is_empty(&self) -> bool {
    self.scanners.is_empty()
  }

  /// Scanners registered for any of `tags`, each once.
  pub fn scanners_for(&self, tags: &FileTags) -> Vec<Arc<dyn DependencyScanner>> {
    let mut found: Vec<Arc<dyn DependencyScanner>> = Vec::new();
    for scanner in tags.iter().filter_map(|tag| self.scanners.get(tag)).flatten() {
      if !found.iter().any(|s| s.name() == scanner.name()) {
        found.push(scanner.clone());
      }
    }
    found
  }
}

/// Counts from one scanning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
  /// Files read and parsed.
  pub scanned: usize,

  /// Files answered from the cache.
  pub cached: usize,

  pub added: usize,
  pub removed: usize,
}

/// Scan the inputs of every transformer producing an artifact in `order` and
/// update the implicit dependencies of its outputs.
///
/// Implicit dependencies are the dependency children of an output that are
/// not inputs of its producer. They are replaced by what the scan finds; a
/// transformer whose set changed forgets its last run. Transformers without
/// scannable inputs are left alone.
pub fn scan_dependencies(
  project: &mut Project,
  order: &[ArtifactId],
  registry: &ScannerRegistry,
  fingerprinter: Fingerprinter,
) -> Result<ScanSummary, ScanError> {
  let mut summary = ScanSummary::default();
  if registry.is_empty() {
    return Ok(summary);
  }

  let search_paths: Vec<PathBuf> = registry
    .search_paths()
    .iter()
    .map(|p| clean_path(&project.root.join(p)))
    .collect();
  let transformers: BTreeSet<TransformerId> = order
    .iter()
    .filter_map(|&id| project.graph.artifact(id)?.producer())
    .collect();

  let mut found: Vec<(TransformerId, BTreeSet<PathBuf>)> = Vec::new();
  for t in transformers {
    let Some(transformer) = project.graph.transformer(t) else {
      continue;
    };
    let mut scan = FileScan {
      graph: &project.graph,
      cache: &mut project.scan_cache,
      fingerprinter,
      search_paths: &search_paths,
      summary: &mut summary,
    };

    let mut scanned_any = false;
    let mut paths = BTreeSet::new();
    for &input in &transformer.inputs {
      let Some(artifact) = project.graph.artifact(input) else {
        continue;
      };
      for scanner in registry.scanners_for(&artifact.tags) {
        scanned_any = true;
        scan.collect(scanner.as_ref(), artifact.path(), &mut paths)?;
      }
    }
    if !scanned_any {
      continue;
    }

    for &own in transformer.inputs.iter().chain(&transformer.outputs) {
      if let Some(artifact) = project.graph.artifact(own) {
        paths.remove(artifact.path());
      }
    }
    found.push((t, paths));
  }

  for (t, paths) in found {
    apply(project, t, paths, &mut summary)?;
  }

  debug!(
    scanned = summary.scanned,
    cached = summary.cached,
    added = summary.added,
    removed = summary.removed,
    "dependency scan complete"
  );
  Ok(summary)
}

struct FileScan<'a> {
  graph: &'a BuildGraph,
  cache: &'a mut ScanCache,
  fingerprinter: Fingerprinter,
  search_paths: &'a [PathBuf],
  summary: &'a mut ScanSummary,
}

impl FileScan<'_> {
  /// Add every file reachable from `start` through `scanner` to `found`.
  fn collect(
    &mut self,
    scanner: &dyn DependencyScanner,
    start: &Path,
    found: &mut BTreeSet<PathBuf>,
  ) -> Result<(), ScanError> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([start.to_path_buf()]);

    while let Some(path) = queue.pop_front() {
      if !visited.insert(path.clone()) {
        continue;
      }
      for dependency in self.scan_file(scanner, &path)? {
        match self.resolve(&dependency, &path) {
          Some(resolved) => {
            trace!(dependency = %resolved.display(), from = %path.display(), "resolved");
            found.insert(resolved.clone());
            queue.push_back(resolved);
          }
          None => trace!(dependency = %dependency.path, from = %path.display(), "unresolved"),
        }
      }
    }
    Ok(())
  }

  /// Raw references of one file, from the cache when its fingerprint is
  /// unchanged. Missing and unreadable files have none.
  fn scan_file(&mut self, scanner: &dyn DependencyScanner, path: &Path) -> Result<Vec<ScannedDependency>, ScanError> {
    if !path.is_file() {
      return Ok(Vec::new());
    }
    let Some(current) = self.fingerprinter.compute(path, self.cache.fingerprint(path))? else {
      return Ok(Vec::new());
    };
    if let Some(dependencies) = self.cache.lookup(path, scanner.name(), &current, &self.fingerprinter) {
      self.summary.cached += 1;
      return Ok(dependencies.to_vec());
    }

    let content = match fs::read(path) {
      Ok(content) => content,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "cannot read file for dependency scan");
        return Ok(Vec::new());
      }
    };
    let dependencies = scanner.scan(&String::from_utf8_lossy(&content));
    self.summary.scanned += 1;
    self.cache.insert(
      path.to_path_buf(),
      CachedScan {
        fingerprint: current,
        scanner: scanner.name().to_string(),
        dependencies: dependencies.clone(),
      },
    );
    Ok(dependencies)
  }

  /// First existing or known candidate: the scanning file's directory for
  /// local references, then each search path.
  fn resolve(&self, dependency: &ScannedDependency, from: &Path) -> Option<PathBuf> {
    let name = Path::new(&dependency.path);
    let known = |candidate: &Path| candidate.is_file() || self.graph.lookup(candidate).is_some();
    if name.is_absolute() {
      let candidate = clean_path(name);
      return known(&candidate).then_some(candidate);
    }

    let local = from.parent().filter(|_| dependency.local);
    local
      .into_iter()
      .chain(self.search_paths.iter().map(PathBuf::as_path))
      .map(|dir| clean_path(&dir.join(name)))
      .find(|candidate| known(candidate))
  }
}

/// Replace the implicit dependencies of `t`'s outputs with `paths`.
fn apply(
  project: &mut Project,
  t: TransformerId,
  paths: BTreeSet<PathBuf>,
  summary: &mut ScanSummary,
) -> Result<(), ScanError> {
  let Some(transformer) = project.graph.transformer(t) else {
    return Ok(());
  };
  let product = transformer.product.clone();
  let inputs = transformer.inputs.clone();
  let outputs = transformer.outputs.clone();

  let mut wanted = BTreeSet::new();
  for path in paths {
    let id = match project.graph.lookup(&path) {
      Some(id) => id,
      None => project
        .graph
        .add_artifact(path, ArtifactKind::Source, &product, FileTags::new())?,
    };
    wanted.insert(id);
  }

  let mut changed = false;
  for &output in &outputs {
    let children = project.graph.children(output);
    for &(child, kind) in &children {
      if kind == EdgeKind::Dependency && !inputs.contains(&child) && !wanted.contains(&child) {
        project.graph.disconnect(output, child);
        summary.removed += 1;
        changed = true;
      }
    }

    for &child in &wanted {
      if children.contains(&(child, EdgeKind::Dependency)) {
        continue;
      }
      match project.graph.safe_connect(output, child) {
        Ok(()) => {
          summary.added += 1;
          changed = true;
        }
        Err(GraphError::CycleDetected { path }) => {
          warn!(transformer = %t, cycle = ?path, "ignoring implicit dependency that would close a cycle");
        }
        Err(e) => return Err(e.into()),
      }
    }
  }

  if changed && let Some(transformer) = project.graph.transformer_mut(t) {
    debug!(transformer = %t, rule = %transformer.rule, "implicit dependencies changed");
    transformer.last_run = None;
  }
  Ok(())
}

/// Lexically remove `.` and `..` components.
fn clean_path(path: &Path) -> PathBuf {
  let mut cleaned = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        if !cleaned.pop() {
          cleaned.push(component);
        }
      }
      other => cleaned.push(other),
    }
  }
  cleaned
}
