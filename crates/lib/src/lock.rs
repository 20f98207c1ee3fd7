//! Locking of a configuration's build directory.
//!
//! A build directory holds one configuration's build data, and the outputs it
//! describes are rewritten by whoever builds it. `build` and `clean` lock the
//! directory exclusively and record themselves as its holder; `status` and
//! `check` lock it shared. Contention fails at once with the holder's
//! description instead of waiting.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::APP_NAME;

const LOCK_FILE: &str = "build.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  /// Read the build data; any number of holders.
  Shared,
  /// Build or clean; a single holder, recorded in the lock file.
  Exclusive,
}

impl std::fmt::Display for LockMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      LockMode::Shared => "shared",
      LockMode::Exclusive => "exclusive",
    })
  }
}

/// The process holding a build directory exclusively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub project: String,
  pub command: String,
  pub pid: u32,

  /// Seconds since the Unix epoch.
  pub since: u64,
}

impl LockHolder {
  /// This process, running `command` on `project`.
  pub fn current(project: &str, command: &str) -> Self {
    Self {
      project: project.to_string(),
      command: command.to_string(),
      pid: std::process::id(),
      since: unix_now(),
    }
  }

  fn running_for(&self) -> u64 {
    unix_now().saturating_sub(self.since)
  }
}

fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("{}", busy_message(.dir, .holder.as_ref()))]
  Busy {
    dir: PathBuf,
    requested: LockMode,
    /// Unknown while the directory is only held shared.
    holder: Option<LockHolder>,
  },

  #[error("cannot {action} {}: {source}", .path.display())]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl LockError {
  fn io<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Self + 'a {
    move |source| LockError::Io {
      action,
      path: path.to_path_buf(),
      source,
    }
  }
}

fn busy_message(dir: &Path, holder: Option<&LockHolder>) -> String {
  let by = match holder {
    Some(h) => format!(
      "`{}` on project {} (PID {}, running for {}s)",
      h.command,
      h.project,
      h.pid,
      h.running_for()
    ),
    None => format!("another {APP_NAME} process"),
  };
  format!(
    "build directory {} is in use by {by}\n\
     If no {APP_NAME} process is running, remove {}",
    dir.display(),
    dir.join(LOCK_FILE).display()
  )
}

/// A locked build directory; unlocked when dropped.
#[derive(Debug)]
pub struct BuildDirLock {
  file: File,
  dir: PathBuf,
  mode: LockMode,
}

impl BuildDirLock {
  /// Lock `dir`, creating it if needed. An exclusive lock records `holder`.
  pub fn acquire(dir: &Path, mode: LockMode, holder: &LockHolder) -> Result<Self, LockError> {
    fs::create_dir_all(dir).map_err(LockError::io("create build directory", dir))?;

    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(LockError::io("open lock file", &path))?;

    match sys::try_lock(&file, mode) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        return Err(LockError::Busy {
          dir: dir.to_path_buf(),
          requested: mode,
          holder: read_holder(&file),
        });
      }
      Err(e) => return Err(LockError::io("lock", &path)(e)),
    }

    let lock = Self {
      file,
      dir: dir.to_path_buf(),
      mode,
    };
    if mode == LockMode::Exclusive {
      lock.record(holder).map_err(LockError::io("write lock file", &path))?;
    }
    debug!(dir = %dir.display(), %mode, "locked build directory");
    Ok(lock)
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn mode(&self) -> LockMode {
    self.mode
  }

  /// The recorded exclusive holder, if any.
  pub fn holder(&self) -> Option<LockHolder> {
    read_holder(&self.file)
  }

  fn record(&self, holder: &LockHolder) -> io::Result<()> {
    let mut file = &self.file;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    serde_json::to_writer_pretty(&mut file, holder).map_err(io::Error::other)?;
    file.flush()
  }
}

impl Drop for BuildDirLock {
  fn drop(&mut self) {
    // The next shared holder must not see a stale holder.
    if self.mode == LockMode::Exclusive
      && let Err(e) = self.file.set_len(0)
    {
      warn!(dir = %self.dir.display(), error = %e, "failed to clear lock holder");
    }
  }
}

/// Holder recorded in the lock file; the file itself may be locked.
fn read_holder(file: &File) -> Option<LockHolder> {
  let mut file = file;
  file.seek(SeekFrom::Start(0)).ok()?;
  let mut contents = String::new();
  file.read_to_string(&mut contents).ok()?;
  serde_json::from_str(&contents).ok()
}

#[cfg(unix)]
mod sys {
  use std::fs::File;
  use std::io;
  use std::os::unix::io::AsFd;

  use rustix::fs::{FlockOperation, flock};

  use super::LockMode;

  pub fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
    let operation = match mode {
      LockMode::Shared => FlockOperation::NonBlockingLockShared,
      LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
    };
    flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
  }
}

#[cfg(windows)]
mod sys {
  use std::fs::File;
  use std::io;
  use std::os::windows::io::AsRawHandle;

  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  use super::LockMode;

  pub fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
    let flags = match mode {
      LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
      LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
    };

    // SAFETY: the handle is open for the duration of the call and a zeroed
    // OVERLAPPED selects offset 0.
    let locked = unsafe {
      let mut overlapped = std::mem::zeroed();
      LockFileEx(file.as_raw_handle() as HANDLE, flags, 0, 1, 0, &mut overlapped)
    };
    if locked == 0 {
      Err(io::Error::last_os_error())
    } else {
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn holder(command: &str) -> LockHolder {
    LockHolder::current("demo", command)
  }

  #[test]
  fn exclusive_lock_records_holder() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("default");
    let lock = BuildDirLock::acquire(&dir, LockMode::Exclusive, &holder("kiln build")).unwrap();

    assert!(dir.join(LOCK_FILE).exists());
    assert_eq!(lock.dir(), dir.as_path());
    let recorded = lock.holder().unwrap();
    assert_eq!(recorded.command, "kiln build");
    assert_eq!(recorded.project, "demo");
    assert_eq!(recorded.pid, std::process::id());
  }

  #[test]
  fn shared_locks_coexist_without_holder() {
    let temp = TempDir::new().unwrap();
    let a = BuildDirLock::acquire(temp.path(), LockMode::Shared, &holder("kiln status")).unwrap();
    let _b = BuildDirLock::acquire(temp.path(), LockMode::Shared, &holder("kiln check")).unwrap();
    assert_eq!(a.mode(), LockMode::Shared);
    assert!(a.holder().is_none());
  }

  #[cfg(unix)]
  #[test]
  fn exclusive_lock_reports_holder_on_contention() {
    let temp = TempDir::new().unwrap();
    let _held = BuildDirLock::acquire(temp.path(), LockMode::Exclusive, &holder("kiln build")).unwrap();

    let err = BuildDirLock::acquire(temp.path(), LockMode::Shared, &holder("kiln status")).unwrap_err();
    let message = err.to_string();
    match err {
      LockError::Busy {
        requested,
        holder: Some(holder),
        ..
      } => {
        assert_eq!(requested, LockMode::Shared);
        assert_eq!(holder.command, "kiln build");
      }
      other => panic!("unexpected error: {other}"),
    }
    assert!(message.contains("in use by `kiln build` on project demo"));
    assert!(message.contains(LOCK_FILE));
  }

  #[cfg(unix)]
  #[test]
  fn shared_holders_block_exclusive_anonymously() {
    let temp = TempDir::new().unwrap();
    drop(BuildDirLock::acquire(temp.path(), LockMode::Exclusive, &holder("kiln build")).unwrap());
    let _reader = BuildDirLock::acquire(temp.path(), LockMode::Shared, &holder("kiln status")).unwrap();

    let err = BuildDirLock::acquire(temp.path(), LockMode::Exclusive, &holder("kiln clean")).unwrap_err();
    assert!(matches!(err, LockError::Busy { holder: None, .. }));
    assert!(err.to_string().contains("another kiln process"));
  }

  #[test]
  fn lock_released_on_drop() {
    let temp = TempDir::new().unwrap();
    drop(BuildDirLock::acquire(temp.path(), LockMode::Exclusive, &holder("first")).unwrap());
    let lock = BuildDirLock::acquire(temp.path(), LockMode::Exclusive, &holder("second")).unwrap();
    assert_eq!(lock.holder().unwrap().command, "second");
  }
}
