//! Loading a resolved project description into a [`Project`].
//!
//! The description is JSON produced by a front end that has already evaluated
//! the project files: products with their source files, rules and explicit
//! transformers. Relative paths resolve against the project root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::artifact::{ArtifactId, ArtifactKind, FileTags};
use crate::graph::{GraphError, TransformerSpec};
use crate::rules::{RuleDescriptor, RuleError, RuleRegistry};
use crate::transformer::{Command, RuleId};

use super::{Product, Project};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedProject {
  pub name: String,

  /// Project directory. Relative to the description file if not absolute;
  /// defaults to the directory containing it.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub root: Option<PathBuf>,

  #[serde(default)]
  pub products: Vec<ResolvedProduct>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedProduct {
  pub name: String,

  #[serde(default)]
  pub sources: Vec<ResolvedSource>,

  /// Target paths. Defaults to every generated artifact nothing depends on.
  #[serde(default)]
  pub targets: Vec<PathBuf>,

  #[serde(default)]
  pub rules: Vec<RuleDescriptor>,

  #[serde(default)]
  pub transformers: Vec<ResolvedTransformer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSource {
  pub path: PathBuf,

  #[serde(default)]
  pub tags: FileTags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOutput {
  pub path: PathBuf,

  #[serde(default)]
  pub tags: FileTags,

  #[serde(default)]
  pub always_update: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTransformer {
  pub rule: String,

  #[serde(default)]
  pub inputs: Vec<PathBuf>,

  pub outputs: Vec<ResolvedOutput>,

  #[serde(default)]
  pub explicit_depends: Vec<PathBuf>,

  pub commands: Vec<Command>,
}

#[derive(Debug, Error)]
pub enum LoadError {
  #[error("failed to read project file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse project file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("project root {path} is not accessible: {source}")]
  Root {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("product '{0}' is declared more than once")]
  DuplicateProduct(String),

  #[error("product '{product}': target {path} is not an artifact of the project")]
  UnknownTarget { product: String, path: PathBuf },

  #[error("product '{product}': {source}")]
  Graph {
    product: String,
    #[source]
    source: GraphError,
  },

  #[error("product '{product}': {source}")]
  Rule {
    product: String,
    #[source]
    source: RuleError,
  },
}

/// Read a resolved project file and build its [`Project`].
pub fn load_project(path: &Path) -> Result<Project, LoadError> {
  let content = fs::read_to_string(path).map_err(|source| LoadError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let resolved: ResolvedProject = serde_json::from_str(&content).map_err(|source| LoadError::Parse {
    path: path.to_path_buf(),
    source,
  })?;

  let base = path.parent().unwrap_or(Path::new("."));
  let root = match &resolved.root {
    Some(root) => base.join(root),
    None => base.to_path_buf(),
  };
  let root = dunce::canonicalize(&root).map_err(|source| LoadError::Root { path: root, source })?;

  resolved.into_project(root)
}

impl ResolvedProject {
  /// Build the project graph with `root` as the absolute project directory.
  ///
  /// Per product: sources are added, then the outputs of explicit
  /// transformers, then rules are applied (so they can match those outputs),
  /// then explicit transformers are connected (so they can consume rule
  /// outputs). Each product is checked for cycles before the next is loaded.
  pub fn into_project(self, root: PathBuf) -> Result<Project, LoadError> {
    let mut project = Project::new(self.name, root);

    for resolved in self.products {
      if project.product(&resolved.name).is_some() {
        return Err(LoadError::DuplicateProduct(resolved.name));
      }
      load_product(&mut project, resolved)?;
    }

    project.graph.sanity_check().map_err(|source| LoadError::Graph {
      product: project.name.clone(),
      source,
    })?;
    info!(
      project = %project.name,
      products = project.products.len(),
      artifacts = project.graph.artifact_count(),
      transformers = project.graph.transformer_count(),
      "loaded project"
    );
    Ok(project)
  }
}

fn load_product(project: &mut Project, resolved: ResolvedProduct) -> Result<(), LoadError> {
  let name = resolved.name.clone();
  let graph_err = |source| LoadError::Graph {
    product: name.clone(),
    source,
  };
  let root = project.root.clone();
  project.products.push(Product::new(&name));

  for source in &resolved.sources {
    project
      .graph
      .add_artifact(root.join(&source.path), ArtifactKind::Source, &name, source.tags.clone())
      .map_err(graph_err)?;
  }

  let mut outputs_per_transformer = Vec::with_capacity(resolved.transformers.len());
  for transformer in &resolved.transformers {
    let mut outputs = Vec::with_capacity(transformer.outputs.len());
    for output in &transformer.outputs {
      let id = project
        .graph
        .add_artifact(root.join(&output.path), ArtifactKind::Generated, &name, output.tags.clone())
        .map_err(graph_err)?;
      if let Some(artifact) = project.graph.artifact_mut(id) {
        artifact.always_update |= output.always_update;
      }
      outputs.push(id);
    }
    outputs_per_transformer.push(outputs);
  }

  let registry = RuleRegistry::new(resolved.rules).map_err(|source| LoadError::Rule {
    product: name.clone(),
    source,
  })?;
  registry
    .apply(&mut project.graph, &name, &root)
    .map_err(|source| LoadError::Rule {
      product: name.clone(),
      source,
    })?;

  for (transformer, outputs) in resolved.transformers.into_iter().zip(outputs_per_transformer) {
    let inputs = resolve_inputs(project, &name, &transformer.inputs)?;
    let explicit_depends = resolve_inputs(project, &name, &transformer.explicit_depends)?;
    project
      .graph
      .add_transformer(TransformerSpec {
        rule: RuleId(transformer.rule),
        product: name.clone(),
        inputs,
        outputs,
        explicit_depends,
        commands: transformer.commands,
      })
      .map_err(graph_err)?;
  }

  let targets = if resolved.targets.is_empty() {
    default_targets(project, &name)
  } else {
    resolved
      .targets
      .iter()
      .map(|path| {
        let path = root.join(path);
        project.graph.lookup(&path).ok_or_else(|| LoadError::UnknownTarget {
          product: name.clone(),
          path,
        })
      })
      .collect::<Result<Vec<_>, _>>()?
  };
  if let Some(product) = project.product_mut(&name) {
    product.targets = targets;
  }

  project.detect_cycles(&name).map_err(graph_err)?;
  debug!(product = %name, "loaded product");
  Ok(())
}

/// Look up input paths, creating source artifacts for unknown ones.
fn resolve_inputs(project: &mut Project, product: &str, paths: &[PathBuf]) -> Result<Vec<ArtifactId>, LoadError> {
  let mut ids = Vec::with_capacity(paths.len());
  for path in paths {
    let path = project.root.join(path);
    let id = match project.graph.lookup(&path) {
      Some(id) => id,
      None => project
        .graph
        .add_artifact(path, ArtifactKind::Source, product, FileTags::new())
        .map_err(|source| LoadError::Graph {
          product: product.to_string(),
          source,
        })?,
    };
    ids.push(id);
  }
  Ok(ids)
}

/// Generated artifacts of `product` that no artifact depends on.
fn default_targets(project: &Project, product: &str) -> Vec<ArtifactId> {
  project
    .graph
    .product_artifacts(product)
    .into_iter()
    .filter(|&id| {
      project.graph.artifact(id).is_some_and(|a| a.is_generated()) && project.graph.parents(id).is_empty()
    })
    .collect()
}
