//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Read fixture content.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated test environment.
///
/// Each test gets its own project directory and build root.
pub struct TestEnv {
  pub temp: TempDir,
  pub project_path: PathBuf,
}

impl TestEnv {
  /// Create from a fixture file.
  ///
  /// Copies the fixture content to a temporary `project.json`.
  pub fn from_fixture(name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let project_path = temp.path().join("project.json");
    std::fs::write(&project_path, fixture_content(name)).unwrap();
    Self { temp, project_path }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn read_file(&self, relative_path: &str) -> String {
    std::fs::read_to_string(self.temp.path().join(relative_path)).unwrap()
  }

  pub fn exists(&self, relative_path: &str) -> bool {
    self.temp.path().join(relative_path).exists()
  }

  /// Build root (isolated per test).
  pub fn build_root(&self) -> PathBuf {
    self.temp.path().join("out")
  }

  /// Build data file of the default configuration.
  pub fn build_data_path(&self) -> PathBuf {
    self.build_root().join("default").join("demo.kiln.json")
  }

  /// Get a pre-configured Command for the kiln binary.
  ///
  /// Runs in the project directory with `KILN_BUILD_DIR` pointing at an
  /// isolated build root.
  pub fn kiln_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("kiln");
    cmd.current_dir(self.temp.path());
    cmd.env("KILN_BUILD_DIR", self.build_root());
    cmd.env_remove("KILN_JOBS");
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// Run a successful `kiln build` with extra arguments.
  pub fn build(&self, args: &[&str]) {
    self.kiln_cmd().arg("build").args(args).assert().success();
  }
}
