//! Builtin in-process commands.
//!
//! Builtins are looked up by name in a [`BuiltinRegistry`] handed to the
//! executor. Relative path arguments resolve against the project root.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuiltinError {
  #[error("usage: {0}")]
  Usage(&'static str),

  #[error("{path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl BuiltinError {
  fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
    move |source| BuiltinError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// An operation runnable as a transformer command.
pub trait Builtin: Send + Sync {
  fn run(&self, args: &[String], root: &Path) -> Result<(), BuiltinError>;
}

/// Named builtins available to a build.
#[derive(Clone, Default)]
pub struct BuiltinRegistry {
  builtins: BTreeMap<String, Arc<dyn Builtin>>,
}

impl std::fmt::Debug for BuiltinRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_set().entries(self.builtins.keys()).finish()
  }
}

impl BuiltinRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with `copy`, `write`, `touch` and `mkdir`.
  pub fn with_defaults() -> Self {
    let mut registry = Self::new();
    registry.register("copy", CopyFile);
    registry.register("write", WriteFile);
    registry.register("touch", TouchFiles);
    registry.register("mkdir", MakeDirs);
    registry
  }

  /// Add or replace a builtin.
  pub fn register(&mut self, name: impl Into<String>, builtin: impl Builtin + 'static) {
    self.builtins.insert(name.into(), Arc::new(builtin));
  }

  pub fn get(&self, name: &str) -> Option<&Arc<dyn Builtin>> {
    self.builtins.get(name)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.builtins.keys().map(String::as_str)
  }
}

fn create_parent(path: &Path) -> Result<(), BuiltinError> {
  match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).map_err(BuiltinError::io(parent)),
    _ => Ok(()),
  }
}

/// `copy <from> <to>`
struct CopyFile;

impl Builtin for CopyFile {
  fn run(&self, args: &[String], root: &Path) -> Result<(), BuiltinError> {
    let [from, to] = args else {
      return Err(BuiltinError::Usage("copy <from> <to>"));
    };
    let (from, to) = (root.join(from), root.join(to));
    create_parent(&to)?;
    fs::copy(&from, &to).map_err(BuiltinError::io(&from))?;
    Ok(())
  }
}

/// `write <path> <content>`
struct WriteFile;

impl Builtin for WriteFile {
  fn run(&self, args: &[String], root: &Path) -> Result<(), BuiltinError> {
    let [path, content] = args else {
      return Err(BuiltinError::Usage("write <path> <content>"));
    };
    let path = root.join(path);
    create_parent(&path)?;
    fs::write(&path, content).map_err(BuiltinError::io(&path))
  }
}

/// `touch <path>...`: create missing files, bump the modification time of
/// existing ones.
struct TouchFiles;

impl Builtin for TouchFiles {
  fn run(&self, args: &[String], root: &Path) -> Result<(), BuiltinError> {
    if args.is_empty() {
      return Err(BuiltinError::Usage("touch <path>..."));
    }
    for path in args {
      let path = root.join(path);
      create_parent(&path)?;
      let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(BuiltinError::io(&path))?;
      file.set_modified(SystemTime::now()).map_err(BuiltinError::io(&path))?;
    }
    Ok(())
  }
}

/// `mkdir <path>...`
struct MakeDirs;

impl Builtin for MakeDirs {
  fn run(&self, args: &[String], root: &Path) -> Result<(), BuiltinError> {
    if args.is_empty() {
      return Err(BuiltinError::Usage("mkdir <path>..."));
    }
    for path in args {
      let path = root.join(path);
      fs::create_dir_all(&path).map_err(BuiltinError::io(&path))?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  fn run(name: &str, list: &[&str], root: &Path) -> Result<(), BuiltinError> {
    let registry = BuiltinRegistry::with_defaults();
    registry.get(name).unwrap().run(&args(list), root)
  }

  #[test]
  fn defaults_are_registered() {
    let registry = BuiltinRegistry::with_defaults();
    assert_eq!(registry.names().collect::<Vec<_>>(), vec!["copy", "mkdir", "touch", "write"]);
    assert!(BuiltinRegistry::new().get("copy").is_none());
  }

  #[test]
  fn write_then_copy_creates_parents() {
    let temp = TempDir::new().unwrap();
    run("write", &["gen/a.txt", "hello"], temp.path()).unwrap();
    run("copy", &["gen/a.txt", "out/nested/b.txt"], temp.path()).unwrap();

    assert_eq!(fs::read_to_string(temp.path().join("out/nested/b.txt")).unwrap(), "hello");
  }

  #[test]
  fn touch_creates_and_preserves_content() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("stamp");
    fs::write(&path, "keep").unwrap();

    run("touch", &["stamp", "new/file"], temp.path()).unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "keep");
    assert!(temp.path().join("new/file").exists());
  }

  #[test]
  fn mkdir_creates_directories() {
    let temp = TempDir::new().unwrap();
    run("mkdir", &["a/b/c"], temp.path()).unwrap();
    assert!(temp.path().join("a/b/c").is_dir());
  }

  #[test]
  fn wrong_arity_is_usage_error() {
    let temp = TempDir::new().unwrap();
    assert!(matches!(run("copy", &["only-one"], temp.path()), Err(BuiltinError::Usage(_))));
    assert!(matches!(run("touch", &[], temp.path()), Err(BuiltinError::Usage(_))));
  }

  #[test]
  fn copy_of_missing_file_reports_path() {
    let temp = TempDir::new().unwrap();
    let err = run("copy", &["absent", "dest"], temp.path()).unwrap_err();
    assert!(err.to_string().contains("absent"));
  }

  #[test]
  fn custom_builtin_can_be_registered() {
    struct Fail;
    impl Builtin for Fail {
      fn run(&self, _: &[String], _: &Path) -> Result<(), BuiltinError> {
        Err(BuiltinError::Usage("fail"))
      }
    }

    let mut registry = BuiltinRegistry::new();
    registry.register("fail", Fail);
    assert!(registry.get("fail").unwrap().run(&[], Path::new("/")).is_err());
  }
}
