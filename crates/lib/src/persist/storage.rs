//! Build data files on disk.
//!
//! # Storage Layout
//!
//! ```text
//! {build_root}/
//! └── <configuration>/
//!     ├── <project>.kiln.json   # persisted project
//!     └── build.lock            # build directory lock
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::consts::{BUILD_DATA_EXTENSION, BUILD_DIR_ENV, BUILD_DIR_NAME};
use crate::project::Project;

use super::types::PersistenceError;
use super::{load, save};

/// Reads and writes the build data of one project configuration.
#[derive(Debug, Clone)]
pub struct BuildDataStore {
  /// Configuration directory, e.g. `<root>/.kiln/default`.
  dir: PathBuf,

  /// Build data file inside `dir`.
  path: PathBuf,
}

impl BuildDataStore {
  pub fn new(build_root: &Path, configuration: &str, project_name: &str) -> Self {
    let dir = build_root.join(configuration);
    let path = dir.join(format!("{project_name}.{BUILD_DATA_EXTENSION}"));
    Self { dir, path }
  }

  /// Build root for a project: `KILN_BUILD_DIR` if set, else `<root>/.kiln`.
  pub fn default_build_root(project_root: &Path) -> PathBuf {
    match std::env::var_os(BUILD_DIR_ENV) {
      Some(dir) if !dir.is_empty() => PathBuf::from(dir),
      _ => project_root.join(BUILD_DIR_NAME),
    }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Load the stored project. A missing file is `Ok(None)`.
  pub fn load(&self) -> Result<Option<Project>, PersistenceError> {
    let bytes = match fs::read(&self.path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => {
        return Err(PersistenceError::Read {
          path: self.path.clone(),
          source,
        });
      }
    };
    load(&bytes).map(Some)
  }

  /// Load the stored project, discarding unusable data.
  ///
  /// Version mismatches and corrupt files are logged and treated as if no
  /// build data existed, which makes the next build a full rebuild.
  pub fn load_or_discard(&self) -> Result<Option<Project>, PersistenceError> {
    match self.load() {
      Ok(project) => Ok(project),
      Err(e @ (PersistenceError::VersionMismatch { .. } | PersistenceError::Corrupt(_))) => {
        warn!(path = %self.path.display(), error = %e, "discarding build data");
        Ok(None)
      }
      Err(e) => Err(e),
    }
  }

  /// Save the project atomically (write to a temp file, then rename).
  pub fn save(&self, project: &Project) -> Result<(), PersistenceError> {
    fs::create_dir_all(&self.dir).map_err(|source| PersistenceError::Write {
      path: self.dir.clone(),
      source,
    })?;

    let bytes = save(project)?;
    let mut temp_path = self.path.clone().into_os_string();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);
    let write_err = |source| PersistenceError::Write {
      path: self.path.clone(),
      source,
    };
    fs::write(&temp_path, &bytes).map_err(write_err)?;
    fs::rename(&temp_path, &self.path).map_err(write_err)?;

    debug!(path = %self.path.display(), bytes = bytes.len(), "saved build data");
    Ok(())
  }

  /// Delete the build data file. Returns whether it existed.
  pub fn remove(&self) -> Result<bool, PersistenceError> {
    match fs::remove_file(&self.path) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(source) => Err(PersistenceError::Write {
        path: self.path.clone(),
        source,
      }),
    }
  }
}
