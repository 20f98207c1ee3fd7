//! Persistent build data.
//!
//! A project is saved as versioned JSON: an artifact table, a transformer
//! table and an edge table referring to each other by dense indices, plus
//! product build data. Indices follow creation order, so loading and saving
//! again without building in between yields identical bytes.

mod storage;
mod types;

use std::collections::HashMap;

use tracing::debug;

use crate::artifact::{ArtifactId, ArtifactKind};
use crate::graph::GraphError;
use crate::project::{Product, Project};
use crate::transformer::{RuleId, Transformer, command_signature};

pub use storage::BuildDataStore;
pub use types::{
  FORMAT_VERSION, PersistedArtifact, PersistedEdge, PersistedProduct, PersistedProject, PersistedTransformer,
  PersistenceError,
};

use types::VersionHeader;

/// Convert a project to its on-disk form.
pub fn to_persisted(project: &Project) -> PersistedProject {
  let graph = &project.graph;
  let artifact_ids = graph.artifact_ids();
  let dense: HashMap<ArtifactId, usize> = artifact_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
  let map = |ids: &[ArtifactId]| -> Vec<usize> { ids.iter().filter_map(|id| dense.get(id).copied()).collect() };

  let artifacts = artifact_ids
    .iter()
    .enumerate()
    .filter_map(|(i, &id)| {
      let a = graph.artifact(id)?;
      Some(PersistedArtifact {
        id: i,
        path: a.path().to_path_buf(),
        product: a.product.clone(),
        kind: a.kind,
        tags: a.tags.clone(),
        always_update: a.always_update,
        fingerprint: a.recorded.clone(),
      })
    })
    .collect();

  let transformers = graph
    .transformers()
    .enumerate()
    .map(|(i, (_, t))| PersistedTransformer {
      id: i,
      rule: t.rule.0.clone(),
      product: t.product.clone(),
      inputs: map(&t.inputs),
      outputs: map(&t.outputs),
      explicit_depends: map(&t.explicit_depends),
      commands: t.commands.clone(),
      last_run: t.last_run.clone(),
    })
    .collect();

  let mut edges: Vec<PersistedEdge> = graph
    .edges()
    .into_iter()
    .filter_map(|(parent, child, kind)| {
      Some(PersistedEdge {
        parent: *dense.get(&parent)?,
        child: *dense.get(&child)?,
        kind,
      })
    })
    .collect();
  edges.sort_by_key(|e| (e.parent, e.child));

  let products = project
    .products
    .iter()
    .map(|p| PersistedProduct {
      name: p.name.clone(),
      targets: map(&p.targets),
      build_data: p.build_data.clone(),
    })
    .collect();

  PersistedProject {
    format_version: FORMAT_VERSION,
    name: project.name.clone(),
    root: project.root.clone(),
    products,
    artifacts,
    transformers,
    edges,
    scan_cache: project.scan_cache.clone(),
  }
}

/// Serialize a project.
pub fn save(project: &Project) -> Result<Vec<u8>, PersistenceError> {
  let mut bytes = serde_json::to_vec_pretty(&to_persisted(project)).map_err(PersistenceError::Serialize)?;
  bytes.push(b'\n');
  Ok(bytes)
}

/// Deserialize a project saved by [`save`].
pub fn load(bytes: &[u8]) -> Result<Project, PersistenceError> {
  let header: VersionHeader =
    serde_json::from_slice(bytes).map_err(|e| PersistenceError::Corrupt(format!("unreadable header: {e}")))?;
  if header.format_version != FORMAT_VERSION {
    return Err(PersistenceError::VersionMismatch {
      found: header.format_version,
      expected: FORMAT_VERSION,
    });
  }

  let persisted: PersistedProject =
    serde_json::from_slice(bytes).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
  from_persisted(persisted)
}

fn corrupt(err: GraphError) -> PersistenceError {
  PersistenceError::Corrupt(err.to_string())
}

/// Rebuild a project from its on-disk form, validating every reference.
pub fn from_persisted(persisted: PersistedProject) -> Result<Project, PersistenceError> {
  let mut project = Project::new(persisted.name, persisted.root);
  project.scan_cache = persisted.scan_cache;
  let mut ids: HashMap<usize, ArtifactId> = HashMap::with_capacity(persisted.artifacts.len());

  for a in persisted.artifacts {
    if ids.contains_key(&a.id) {
      return Err(PersistenceError::Corrupt(format!("duplicate artifact id {}", a.id)));
    }
    if project.graph.lookup(&a.path).is_some() {
      return Err(PersistenceError::Corrupt(format!("duplicate artifact path {}", a.path.display())));
    }
    let id = project
      .graph
      .add_artifact(a.path, a.kind, &a.product, a.tags)
      .map_err(corrupt)?;
    if let Some(artifact) = project.graph.artifact_mut(id) {
      artifact.always_update = a.always_update;
      artifact.recorded = a.fingerprint;
    }
    ids.insert(a.id, id);
  }

  let resolve = |list: &[usize], what: &str| -> Result<Vec<ArtifactId>, PersistenceError> {
    list
      .iter()
      .map(|i| {
        ids
          .get(i)
          .copied()
          .ok_or_else(|| PersistenceError::Corrupt(format!("{what} references missing artifact id {i}")))
      })
      .collect()
  };

  let mut seen_transformers = std::collections::HashSet::new();
  for t in persisted.transformers {
    if !seen_transformers.insert(t.id) {
      return Err(PersistenceError::Corrupt(format!("duplicate transformer id {}", t.id)));
    }
    let what = format!("transformer {}", t.id);
    let inputs = resolve(&t.inputs, what.as_str())?;
    let outputs = resolve(&t.outputs, what.as_str())?;
    let explicit_depends = resolve(&t.explicit_depends, what.as_str())?;
    if outputs.is_empty() {
      return Err(PersistenceError::Corrupt(format!("{what} has no outputs")));
    }
    for &o in &outputs {
      if project.graph.artifact(o).is_some_and(|a| a.kind != ArtifactKind::Generated) {
        return Err(PersistenceError::Corrupt(format!("{what} outputs a source artifact")));
      }
    }

    let input_paths: Vec<_> = inputs
      .iter()
      .filter_map(|&i| project.graph.artifact(i).map(|a| a.path().to_path_buf()))
      .collect();
    let signature = command_signature(&t.commands, &input_paths).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;

    project
      .graph
      .restore_transformer(Transformer {
        rule: RuleId(t.rule),
        product: t.product,
        inputs,
        outputs,
        explicit_depends,
        commands: t.commands,
        signature,
        last_run: t.last_run,
      })
      .map_err(corrupt)?;
  }

  for e in persisted.edges {
    let parent = resolve(&[e.parent], "edge")?[0];
    let child = resolve(&[e.child], "edge")?[0];
    project.graph.connect_with(parent, child, e.kind).map_err(corrupt)?;
  }

  for p in persisted.products {
    if project.product(&p.name).is_some() {
      return Err(PersistenceError::Corrupt(format!("duplicate product {}", p.name)));
    }
    let mut product = Product::new(p.name);
    product.targets = resolve(&p.targets, "product")?;
    product.build_data = p.build_data;
    project.products.push(product);
  }

  project.graph.sanity_check().map_err(corrupt)?;
  debug!(
    project = %project.name,
    artifacts = project.graph.artifact_count(),
    transformers = project.graph.transformer_count(),
    "loaded build data"
  );
  Ok(project)
}
