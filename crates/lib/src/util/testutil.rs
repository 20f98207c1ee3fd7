//! Test utilities for kiln-lib.
//!
//! Cross-platform command helpers and a small project fixture rooted in a
//! temporary directory.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::artifact::{ArtifactId, ArtifactKind, FileTags};
use crate::graph::TransformerSpec;
use crate::project::{Product, Project};
use crate::transformer::{BuiltinCommand, Command, ProcessCommand, RuleId, TransformerId};

/// A process command running `script` through the platform shell.
#[cfg(unix)]
pub fn shell(script: &str) -> Command {
  ProcessCommand::new("/bin/sh").args(["-c", script]).into()
}

#[cfg(windows)]
pub fn shell(script: &str) -> Command {
  ProcessCommand::new("cmd.exe").args(["/C", script]).into()
}

/// Builtin `copy` between two root-relative paths.
pub fn copy(from: &str, to: &str) -> Command {
  BuiltinCommand::new("copy", [from, to]).into()
}

/// A project named `demo` with a single product `p` in a temp directory.
pub struct Fixture {
  pub temp: TempDir,
  pub project: Project,
}

impl Fixture {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let root = dunce::canonicalize(temp.path()).unwrap();
    let mut project = Project::new("demo", root);
    project.products.push(Product::new("p"));
    Self { temp, project }
  }

  pub fn root(&self) -> &Path {
    &self.project.root
  }

  pub fn path(&self, rel: &str) -> PathBuf {
    self.project.root.join(rel)
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

  /// Write a source file and add it to the graph.
  pub fn source(&mut self, rel: &str, content: &str) -> ArtifactId {
    self.write(rel, content);
    let path = self.path(rel);
    self
      .project
      .graph
      .add_artifact(path, ArtifactKind::Source, "p", FileTags::new())
      .unwrap()
  }

  /// Add a transformer producing `output` from `inputs`; the output becomes a
  /// target of `p`.
  pub fn step(&mut self, rule: &str, inputs: &[ArtifactId], output: &str, commands: Vec<Command>) -> TransformerId {
    self.step_in("p", rule, inputs, output, commands)
  }

  /// Like [`Fixture::step`] for another product, which is created on first
  /// use.
  pub fn step_in(
    &mut self,
    product: &str,
    rule: &str,
    inputs: &[ArtifactId],
    output: &str,
    commands: Vec<Command>,
  ) -> TransformerId {
    if self.project.product(product).is_none() {
      self.project.products.push(Product::new(product));
    }
    let path = self.path(output);
    let out = self
      .project
      .graph
      .add_artifact(path, ArtifactKind::Generated, product, FileTags::new())
      .unwrap();
    let id = self
      .project
      .graph
      .add_transformer(TransformerSpec {
        rule: RuleId::from(rule),
        product: product.to_string(),
        inputs: inputs.to_vec(),
        outputs: vec![out],
        explicit_depends: Vec::new(),
        commands,
      })
      .unwrap();
    if let Some(product) = self.project.product_mut(product) {
      product.targets.push(out);
    }
    id
  }

  pub fn output(&self, id: TransformerId) -> ArtifactId {
    self.project.graph.transformer(id).unwrap().outputs[0]
  }
}
