//! The artifact dependency graph.
//!
//! Artifacts are nodes of a stable petgraph arena; an edge `parent -> child`
//! records that `parent` is built from (or after) `child`. Transformers live in
//! a separate indexed arena and reference artifacts by id, so the graph holds
//! no ownership cycles while still representing dependency cycles faithfully.
//!
//! A transformer with outputs `O` and inputs `I` contributes a dependency edge
//! `o -> i` for every pair, plus an ordering edge to each explicit dependency.

mod sanity;
mod traversal;
mod types;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use tracing::trace;

use crate::artifact::{Artifact, ArtifactId, ArtifactKind, FileTags};
use crate::transformer::{Command, RuleId, Transformer, TransformerId, command_signature};

pub use types::{EdgeKind, GraphError};

/// Everything needed to add a transformer to the graph.
#[derive(Debug, Clone)]
pub struct TransformerSpec {
  pub rule: RuleId,
  pub product: String,
  pub inputs: Vec<ArtifactId>,
  pub outputs: Vec<ArtifactId>,
  pub explicit_depends: Vec<ArtifactId>,
  pub commands: Vec<Command>,
}

/// The graph of artifacts and the transformers connecting them.
#[derive(Debug, Clone, Default)]
pub struct BuildGraph {
  graph: StableDiGraph<Artifact, EdgeKind>,
  by_path: HashMap<PathBuf, ArtifactId>,
  transformers: Vec<Option<Transformer>>,
  next_seq: u64,
}

impl BuildGraph {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn artifact_count(&self) -> usize {
    self.graph.node_count()
  }

  pub fn transformer_count(&self) -> usize {
    self.transformers.iter().flatten().count()
  }

  pub fn artifact(&self, id: ArtifactId) -> Option<&Artifact> {
    self.graph.node_weight(id.0)
  }

  pub fn artifact_mut(&mut self, id: ArtifactId) -> Option<&mut Artifact> {
    self.graph.node_weight_mut(id.0)
  }

  pub(crate) fn artifact_or_err(&self, id: ArtifactId) -> Result<&Artifact, GraphError> {
    self.artifact(id).ok_or_else(|| GraphError::UnknownArtifact(id.to_string()))
  }

  /// Find an artifact by absolute path.
  pub fn lookup(&self, path: &Path) -> Option<ArtifactId> {
    self.by_path.get(path).copied()
  }

  /// All artifact ids in creation order.
  pub fn artifact_ids(&self) -> Vec<ArtifactId> {
    let mut ids: Vec<ArtifactId> = self.graph.node_indices().map(ArtifactId).collect();
    ids.sort_by_key(|id| self.graph[id.0].seq);
    ids
  }

  /// Artifact ids of one product in creation order.
  pub fn product_artifacts(&self, product: &str) -> Vec<ArtifactId> {
    self
      .artifact_ids()
      .into_iter()
      .filter(|id| self.graph[id.0].product == product)
      .collect()
  }

  pub fn transformer(&self, id: TransformerId) -> Option<&Transformer> {
    self.transformers.get(id.index()).and_then(Option::as_ref)
  }

  pub fn transformer_mut(&mut self, id: TransformerId) -> Option<&mut Transformer> {
    self.transformers.get_mut(id.index()).and_then(Option::as_mut)
  }

  pub(crate) fn transformer_or_err(&self, id: TransformerId) -> Result<&Transformer, GraphError> {
    self
      .transformer(id)
      .ok_or_else(|| GraphError::UnknownTransformer(id.to_string()))
  }

  /// All live transformers in id order.
  pub fn transformers(&self) -> impl Iterator<Item = (TransformerId, &Transformer)> {
    self
      .transformers
      .iter()
      .enumerate()
      .filter_map(|(i, t)| t.as_ref().map(|t| (TransformerId(i as u32), t)))
  }

  /// Add an artifact, or return the existing one for the same path.
  ///
  /// Re-adding a path is only allowed from the same product with the same
  /// kind; anything else is a [`GraphError::DuplicatePath`].
  pub fn add_artifact(
    &mut self,
    path: PathBuf,
    kind: ArtifactKind,
    product: &str,
    tags: FileTags,
  ) -> Result<ArtifactId, GraphError> {
    if let Some(&existing) = self.by_path.get(&path) {
      let artifact = &self.graph[existing.0];
      if artifact.product != product {
        return Err(GraphError::DuplicatePath {
          path,
          reason: format!("already belongs to product '{}'", artifact.product),
        });
      }
      if artifact.kind != kind {
        return Err(GraphError::DuplicatePath {
          path,
          reason: format!("already declared as {:?}", artifact.kind).to_lowercase(),
        });
      }
      return Ok(existing);
    }

    let seq = self.next_seq;
    self.next_seq += 1;
    let id = ArtifactId(self.graph.add_node(Artifact::new(path.clone(), kind, product, tags, seq)));
    trace!(artifact = %path.display(), ?kind, product, "insert artifact");
    self.by_path.insert(path, id);
    Ok(id)
  }

  /// Add a transformer and the edges from its outputs to its inputs.
  ///
  /// Fails if an output already has a producer ([`GraphError::DuplicatePath`]),
  /// if inputs and outputs overlap, or if there are no outputs.
  pub fn add_transformer(&mut self, spec: TransformerSpec) -> Result<TransformerId, GraphError> {
    if spec.outputs.is_empty() {
      return Err(GraphError::NoOutputs { rule: spec.rule.0 });
    }

    for &id in spec.inputs.iter().chain(&spec.outputs).chain(&spec.explicit_depends) {
      self.artifact_or_err(id)?;
    }

    for &output in &spec.outputs {
      let artifact = &self.graph[output.0];
      if spec.inputs.contains(&output) {
        return Err(GraphError::OverlappingInputsOutputs {
          rule: spec.rule.0,
          path: artifact.path().to_path_buf(),
        });
      }
      if artifact.kind == ArtifactKind::Source {
        return Err(GraphError::DuplicatePath {
          path: artifact.path().to_path_buf(),
          reason: "is a source artifact and cannot be generated".to_string(),
        });
      }
      if let Some(producer) = artifact.producer {
        let other = self.transformer_or_err(producer)?;
        return Err(GraphError::DuplicatePath {
          path: artifact.path().to_path_buf(),
          reason: format!("already produced by rule '{}'", other.rule),
        });
      }
    }

    let input_paths: Vec<PathBuf> = spec
      .inputs
      .iter()
      .map(|&id| self.graph[id.0].path().to_path_buf())
      .collect();
    let signature = command_signature(&spec.commands, &input_paths).map_err(|e| GraphError::Signature(e.to_string()))?;

    let transformer = Transformer {
      rule: spec.rule,
      product: spec.product,
      inputs: spec.inputs,
      outputs: spec.outputs,
      explicit_depends: spec.explicit_depends,
      commands: spec.commands,
      signature,
      last_run: None,
    };

    let id = self.restore_transformer(transformer)?;

    let (inputs, outputs, depends) = {
      let t = &self.transformers[id.index()];
      let t = t.as_ref().ok_or_else(|| GraphError::UnknownTransformer(id.to_string()))?;
      (t.inputs.clone(), t.outputs.clone(), t.explicit_depends.clone())
    };
    for &output in &outputs {
      for &input in &inputs {
        self.connect_with(output, input, EdgeKind::Dependency)?;
      }
      for &dep in &depends {
        self.connect_with(output, dep, EdgeKind::Ordering)?;
      }
    }

    Ok(id)
  }

  /// Insert a transformer and its producer/consumer links without adding edges.
  pub(crate) fn restore_transformer(&mut self, transformer: Transformer) -> Result<TransformerId, GraphError> {
    let id = TransformerId(self.transformers.len() as u32);

    for &output in &transformer.outputs {
      let artifact = self
        .graph
        .node_weight(output.0)
        .ok_or_else(|| GraphError::UnknownArtifact(output.to_string()))?;
      if artifact.producer.is_some() {
        return Err(GraphError::DuplicatePath {
          path: artifact.path().to_path_buf(),
          reason: "has more than one producer".to_string(),
        });
      }
    }
    for &input in &transformer.inputs {
      self.artifact_or_err(input)?;
    }

    for &output in &transformer.outputs {
      self.graph[output.0].producer = Some(id);
    }
    for &input in &transformer.inputs {
      self.graph[input.0].consumers.insert(id);
    }
    trace!(transformer = %id, rule = %transformer.rule, "insert transformer");
    self.transformers.push(Some(transformer));
    Ok(id)
  }

  /// Record that `parent` depends on `child`.
  ///
  /// Cycles are not checked here; use [`BuildGraph::safe_connect`] to refuse
  /// edges that would close a cycle, or [`BuildGraph::detect_cycles`] later.
  pub fn connect(&mut self, parent: ArtifactId, child: ArtifactId) -> Result<(), GraphError> {
    self.connect_with(parent, child, EdgeKind::Dependency)
  }

  /// Like [`BuildGraph::connect`], but fails with the would-be cycle if
  /// `child` already (transitively) depends on `parent`.
  pub fn safe_connect(&mut self, parent: ArtifactId, child: ArtifactId) -> Result<(), GraphError> {
    self.artifact_or_err(parent)?;
    self.artifact_or_err(child)?;
    if let Some(back) = self.find_path(child, parent) {
      // back = child .. parent; the new edge closes parent -> child.
      let mut cycle = vec![self.graph[parent.0].path().to_path_buf()];
      cycle.extend(
        back[..back.len() - 1]
          .iter()
          .map(|id| self.graph[id.0].path().to_path_buf()),
      );
      trace!(cycle = ?cycle, "safe_connect refused edge");
      return Err(GraphError::CycleDetected { path: cycle });
    }
    self.connect(parent, child)
  }

  pub(crate) fn connect_with(&mut self, parent: ArtifactId, child: ArtifactId, kind: EdgeKind) -> Result<(), GraphError> {
    let parent_path = self.artifact_or_err(parent)?.path().to_path_buf();
    self.artifact_or_err(child)?;
    if parent == child {
      return Err(GraphError::SelfDependency(parent_path));
    }

    match self.graph.find_edge(parent.0, child.0) {
      Some(edge) => {
        // A dependency edge subsumes an ordering edge.
        if kind == EdgeKind::Dependency {
          self.graph[edge] = EdgeKind::Dependency;
        }
      }
      None => {
        trace!(
          parent = %parent_path.display(),
          child = %self.graph[child.0].path().display(),
          ?kind,
          "connect"
        );
        self.graph.add_edge(parent.0, child.0, kind);
      }
    }
    Ok(())
  }

  /// Remove the edge `parent -> child`. Returns whether an edge existed.
  pub fn disconnect(&mut self, parent: ArtifactId, child: ArtifactId) -> bool {
    match self.graph.find_edge(parent.0, child.0) {
      Some(edge) => {
        trace!(parent = %parent, child = %child, "disconnect");
        self.graph.remove_edge(edge);
        true
      }
      None => false,
    }
  }

  /// Direct children of an artifact with edge kinds, in creation order.
  pub fn children(&self, id: ArtifactId) -> Vec<(ArtifactId, EdgeKind)> {
    let mut children: Vec<(ArtifactId, EdgeKind)> = self
      .graph
      .edges_directed(id.0, Direction::Outgoing)
      .map(|e| (ArtifactId(e.target()), *e.weight()))
      .collect();
    children.sort_by_key(|(child, _)| self.graph[child.0].seq);
    children
  }

  /// Direct parents of an artifact, in creation order.
  pub fn parents(&self, id: ArtifactId) -> Vec<ArtifactId> {
    let mut parents: Vec<ArtifactId> = self
      .graph
      .neighbors_directed(id.0, Direction::Incoming)
      .map(ArtifactId)
      .collect();
    parents.sort_by_key(|p| self.graph[p.0].seq);
    parents
  }

  /// All edges as `(parent, child, kind)`.
  pub fn edges(&self) -> Vec<(ArtifactId, ArtifactId, EdgeKind)> {
    self
      .graph
      .edge_indices()
      .filter_map(|e| {
        let (parent, child) = self.graph.edge_endpoints(e)?;
        Some((ArtifactId(parent), ArtifactId(child), self.graph[e]))
      })
      .collect()
  }

  /// Transformers that must finish before `id` can run: the producers of
  /// every child of its outputs, excluding `id` itself.
  pub fn transformer_dependencies(&self, id: TransformerId) -> Result<BTreeSet<TransformerId>, GraphError> {
    let transformer = self.transformer_or_err(id)?;
    let mut deps = BTreeSet::new();
    for &output in &transformer.outputs {
      for (child, _) in self.children(output) {
        if let Some(producer) = self.graph[child.0].producer
          && producer != id
        {
          deps.insert(producer);
        }
      }
    }
    Ok(deps)
  }

  /// Remove a transformer, its edges and its producer/consumer links.
  ///
  /// The output artifacts stay in the graph without a producer.
  pub fn remove_transformer(&mut self, id: TransformerId) -> Option<Transformer> {
    let transformer = self.transformers.get_mut(id.index())?.take()?;
    for &output in &transformer.outputs {
      for &child in transformer.inputs.iter().chain(&transformer.explicit_depends) {
        self.disconnect(output, child);
      }
      if let Some(artifact) = self.graph.node_weight_mut(output.0) {
        artifact.producer = None;
      }
    }
    for &input in &transformer.inputs {
      if let Some(artifact) = self.graph.node_weight_mut(input.0) {
        artifact.consumers.remove(&id);
      }
    }
    trace!(transformer = %id, rule = %transformer.rule, "remove transformer");
    Some(transformer)
  }

  /// Remove an artifact and every edge touching it.
  ///
  /// Consumers lose it as an input; a producer left without outputs is removed.
  pub fn remove_artifact(&mut self, id: ArtifactId) -> Option<Artifact> {
    let artifact = self.graph.remove_node(id.0)?;
    self.by_path.remove(artifact.path());

    for consumer in &artifact.consumers {
      if let Some(t) = self.transformer_mut(*consumer) {
        t.inputs.retain(|&i| i != id);
        t.explicit_depends.retain(|&i| i != id);
      }
    }
    for t in self.transformers.iter_mut().flatten() {
      t.explicit_depends.retain(|&i| i != id);
    }
    if let Some(producer) = artifact.producer {
      let orphaned = match self.transformer_mut(producer) {
        Some(t) => {
          t.outputs.retain(|&o| o != id);
          t.outputs.is_empty()
        }
        None => false,
      };
      if orphaned {
        self.remove_transformer(producer);
      }
    }
    trace!(artifact = %artifact.path().display(), "remove artifact");
    Some(artifact)
  }

  /// Remove every artifact and transformer of a product.
  ///
  /// Returns the paths of the removed generated artifacts, so the caller can
  /// delete them from disk.
  pub fn remove_product(&mut self, product: &str) -> Vec<PathBuf> {
    let owned: Vec<TransformerId> = self
      .transformers()
      .filter(|(_, t)| t.product == product)
      .map(|(id, _)| id)
      .collect();
    for id in owned {
      self.remove_transformer(id);
    }

    let mut generated = Vec::new();
    for id in self.product_artifacts(product) {
      if let Some(artifact) = self.remove_artifact(id)
        && artifact.is_generated()
      {
        generated.push(artifact.path().to_path_buf());
      }
    }
    generated
  }
}
