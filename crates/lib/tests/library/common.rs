//! Shared helpers for library integration tests.

use std::fs;
use std::path::PathBuf;

use kiln_lib::execute::{BuildContext, BuildOptions, BuildReport, Session, SessionOptions};
use kiln_lib::lock::LockMode;
use serde_json::{Value, json};
use tempfile::TempDir;

/// A project directory holding a `project.json` description.
pub struct TestProject {
  pub temp: TempDir,
}

impl TestProject {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn path(&self, rel: &str) -> PathBuf {
    self.temp.path().join(rel)
  }

  pub fn write(&self, rel: &str, content: &str) {
    let path = self.path(rel);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
  }

  pub fn read(&self, rel: &str) -> String {
    fs::read_to_string(self.path(rel)).unwrap()
  }

  /// Write the description and return its path.
  pub fn describe(&self, project: &Value) -> PathBuf {
    let path = self.path("project.json");
    fs::write(&path, serde_json::to_string_pretty(project).unwrap()).unwrap();
    path
  }

  pub fn session_options(&self) -> SessionOptions {
    SessionOptions {
      build_root: Some(self.path("out")),
      ..SessionOptions::default()
    }
  }

  pub fn open(&self, mode: LockMode) -> Session {
    Session::open(&self.path("project.json"), &self.session_options(), mode, "test").unwrap()
  }

  pub async fn build_with(&self, options: &BuildOptions, ctx: BuildContext) -> BuildReport {
    let mut session = self.open(LockMode::Exclusive);
    session.build(options, ctx).await.unwrap()
  }

  pub async fn build(&self) -> BuildReport {
    self.build_with(&options(), BuildContext::default()).await
  }
}

pub fn options() -> BuildOptions {
  BuildOptions {
    jobs: 4,
    ..BuildOptions::default()
  }
}

/// Builtin command as it appears in a project description.
pub fn builtin(name: &str, args: &[&str]) -> Value {
  json!({ "type": "builtin", "name": name, "args": args })
}

/// A `cpp -> obj -> application` project driven by rules.
pub fn compile_and_link(sources: &[&str]) -> Value {
  let sources: Vec<Value> = sources.iter().map(|s| json!({ "path": s, "tags": ["cpp"] })).collect();
  json!({
    "name": "demo",
    "products": [{
      "name": "app",
      "sources": sources,
      "rules": [
        {
          "id": "compile",
          "input_tags": ["cpp"],
          "output_tags": ["obj"],
          "output": "build/${stem}.o",
          "commands": [builtin("copy", &["${input}", "${output}"])]
        },
        {
          "id": "link",
          "input_tags": ["obj"],
          "output_tags": ["application"],
          "output": "build/app",
          "multiplex": true,
          "commands": [builtin("touch", &["${output}"])]
        }
      ]
    }]
  })
}

/// Rule names of transformers, in the given order.
pub fn rules(session: &Session, ids: &[kiln_lib::transformer::TransformerId]) -> Vec<String> {
  ids
    .iter()
    .map(|id| session.project().graph.transformer(*id).unwrap().rule.0.clone())
    .collect()
}
