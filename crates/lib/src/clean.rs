//! Removing generated artifacts from disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::project::Project;

#[derive(Debug, Error)]
pub enum CleanError {
  #[error("failed to remove {path}: {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Delete one generated artifact. Directories are removed recursively.
///
/// Returns whether anything existed at `path`.
pub fn remove_generated_from_disk(path: &Path, dry_run: bool) -> Result<bool, CleanError> {
  let metadata = match fs::symlink_metadata(path) {
    Ok(m) => m,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
    Err(source) => {
      return Err(CleanError::Remove {
        path: path.to_path_buf(),
        source,
      });
    }
  };

  if dry_run {
    info!(path = %path.display(), "would remove");
    return Ok(true);
  }

  let result = if metadata.is_dir() {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  };
  match result {
    Ok(()) => {
      debug!(path = %path.display(), "removed generated artifact");
      Ok(true)
    }
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
    Err(source) => Err(CleanError::Remove {
      path: path.to_path_buf(),
      source,
    }),
  }
}

/// Delete several generated artifacts, returning the ones that existed.
pub fn remove_all(paths: &[PathBuf], dry_run: bool) -> Result<Vec<PathBuf>, CleanError> {
  let mut removed = Vec::new();
  for path in paths {
    if remove_generated_from_disk(path, dry_run)? {
      removed.push(path.clone());
    }
  }
  Ok(removed)
}

/// Delete the generated artifacts of the selected products (all if empty)
/// and forget their recorded state, so the next build starts from scratch.
pub fn clean_project(project: &mut Project, products: &[String], dry_run: bool) -> Result<Vec<PathBuf>, CleanError> {
  let selected = |name: &str| products.is_empty() || products.iter().any(|p| p == name);

  let ids: Vec<_> = project
    .graph
    .artifact_ids()
    .into_iter()
    .filter(|&id| {
      project
        .graph
        .artifact(id)
        .is_some_and(|a| a.is_generated() && selected(&a.product))
    })
    .collect();

  let mut removed = Vec::new();
  for id in ids {
    let Some(path) = project.graph.artifact(id).map(|a| a.path().to_path_buf()) else {
      continue;
    };
    if remove_generated_from_disk(&path, dry_run)? {
      removed.push(path);
    }
    if !dry_run && let Some(artifact) = project.graph.artifact_mut(id) {
      artifact.recorded = None;
    }
  }

  if !dry_run {
    let tids: Vec<_> = project
      .graph
      .transformers()
      .filter(|(_, t)| selected(&t.product))
      .map(|(id, _)| id)
      .collect();
    for id in tids {
      if let Some(t) = project.graph.transformer_mut(id) {
        t.last_run = None;
      }
    }
  }

  info!(removed = removed.len(), dry_run, "cleaned generated artifacts");
  Ok(removed)
}
