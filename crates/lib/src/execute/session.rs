//! Build sessions.
//!
//! A [`Session`] ties one invocation together:
//!
//! 1. Load the resolved project and build its graph
//! 2. Lock the configuration's build directory
//! 3. Load the previous build data, discarding it if unusable
//! 4. Carry recorded state over and collect stale generated files
//! 5. Build, report status, check or clean
//! 6. Save the build data
//!
//! The lock is held until the session is dropped.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::clean::{clean_project, remove_all};
use crate::consts::DEFAULT_CONFIGURATION;
use crate::lock::{BuildDirLock, LockHolder, LockMode};
use crate::persist::BuildDataStore;
use crate::project::{Project, load_project, reconcile};
use crate::transformer::{RuleId, TransformerId};

use super::types::{BuildError, BuildOptions, BuildReport};
use super::{BuildContext, execute_build, outdated};

/// Where a session keeps its build data.
#[derive(Debug, Clone)]
pub struct SessionOptions {
  /// Build configuration name, one directory per configuration.
  pub configuration: String,

  /// Build root; defaults to [`BuildDataStore::default_build_root`].
  pub build_root: Option<PathBuf>,
}

impl Default for SessionOptions {
  fn default() -> Self {
    Self {
      configuration: DEFAULT_CONFIGURATION.to_string(),
      build_root: None,
    }
  }
}

/// A transformer that would run on the next build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutdatedTransformer {
  pub id: TransformerId,
  pub rule: RuleId,
  pub product: String,
  pub description: String,

  /// Output paths relative to the project root.
  pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StatusReport {
  pub outdated: Vec<OutdatedTransformer>,

  /// Generated files left over from a previous project description.
  pub stale: Vec<PathBuf>,
}

/// Per-product build order, children first.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
  pub products: Vec<(String, Vec<PathBuf>)>,
}

pub struct Session {
  project: Project,
  store: BuildDataStore,
  stale: Vec<PathBuf>,
  _lock: BuildDirLock,
}

impl Session {
  /// Load `project_file` and the build data of its configuration.
  ///
  /// `command` is recorded in the lock file for contention messages.
  pub fn open(project_file: &Path, options: &SessionOptions, mode: LockMode, command: &str) -> Result<Self, BuildError> {
    let mut project = load_project(project_file)?;

    let build_root = match &options.build_root {
      Some(root) => root.clone(),
      None => BuildDataStore::default_build_root(&project.root),
    };
    let store = BuildDataStore::new(&build_root, &options.configuration, &project.name);
    let lock = BuildDirLock::acquire(store.dir(), mode, &LockHolder::current(&project.name, command))?;

    let stale = match store.load_or_discard()? {
      Some(previous) => reconcile(&mut project, previous),
      None => {
        debug!(path = %store.path().display(), "no previous build data");
        Vec::new()
      }
    };
    if !stale.is_empty() {
      info!(count = stale.len(), "found stale generated artifacts");
    }

    Ok(Self {
      project,
      store,
      stale,
      _lock: lock,
    })
  }

  pub fn project(&self) -> &Project {
    &self.project
  }

  pub fn store(&self) -> &BuildDataStore {
    &self.store
  }

  pub fn stale(&self) -> &[PathBuf] {
    &self.stale
  }

  /// Remove stale files, build, and save the build data.
  ///
  /// Build data is saved even when transformers failed, so completed work is
  /// kept. A dry run changes nothing on disk.
  pub async fn build(&mut self, options: &BuildOptions, ctx: BuildContext) -> Result<BuildReport, BuildError> {
    if !options.dry_run && !self.stale.is_empty() {
      let removed = remove_all(&self.stale, false)?;
      info!(removed = removed.len(), "removed stale generated artifacts");
      self.stale.clear();
    }

    let report = execute_build(&mut self.project, options, ctx).await?;

    if !options.dry_run {
      self.store.save(&self.project)?;
    }
    Ok(report)
  }

  /// What the next build would run, without running it.
  pub fn status(&self, options: &BuildOptions) -> Result<StatusReport, BuildError> {
    let graph = &self.project.graph;
    let outdated = outdated(&self.project, options)?
      .into_iter()
      .filter_map(|id| {
        let transformer = graph.transformer(id)?;
        Some(OutdatedTransformer {
          id,
          rule: transformer.rule.clone(),
          product: transformer.product.clone(),
          description: transformer.describe(),
          outputs: transformer
            .outputs
            .iter()
            .filter_map(|&out| graph.artifact(out))
            .map(|a| a.display_path(&self.project.root))
            .collect(),
        })
      })
      .collect();

    Ok(StatusReport {
      outdated,
      stale: self.stale.clone(),
    })
  }

  /// Cycle detection and consistency checks for every product.
  pub fn check(&self) -> Result<CheckReport, BuildError> {
    self.project.graph.sanity_check()?;

    let mut report = CheckReport::default();
    for name in self.project.product_names() {
      self.project.detect_cycles(&name)?;
      let order = self
        .project
        .topological_order(&name)?
        .into_iter()
        .filter_map(|id| self.project.graph.artifact(id))
        .map(|a| a.path().to_path_buf())
        .collect();
      report.products.push((name, order));
    }
    Ok(report)
  }

  /// Remove generated artifacts of `products` (all if empty) and stale files.
  ///
  /// Cleaning everything also deletes the build data file.
  pub fn clean(&mut self, products: &[String], dry_run: bool) -> Result<Vec<PathBuf>, BuildError> {
    if let Some(name) = products.iter().find(|name| self.project.product(name).is_none()) {
      return Err(BuildError::UnknownProduct(name.clone()));
    }

    let mut removed = clean_project(&mut self.project, products, dry_run)?;
    removed.extend(remove_all(&self.stale, dry_run)?);
    if dry_run {
      return Ok(removed);
    }

    self.stale.clear();
    if products.is_empty() {
      self.store.remove()?;
    } else {
      self.store.save(&self.project)?;
    }
    Ok(removed)
  }
}
