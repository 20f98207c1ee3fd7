//! Change tracking: decides which artifacts and transformers are dirty.
//!
//! Dirtiness is computed once per build in a single bottom-up pass over a
//! topological order. An artifact is dirty if it is flagged `always_update`,
//! has no recorded or no current fingerprint, its fingerprint changed, a
//! dependency child is dirty, or (when generated) its producer must run.
//! A dirty dependency child of a generated artifact also makes its producer
//! run, whether the edge came from the transformer's inputs, from
//! [`BuildGraph::connect`] or from a dependency scan. Ordering edges never
//! propagate dirtiness.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::artifact::{ArtifactId, ArtifactKind};
use crate::fingerprint::{Fingerprint, FingerprintError, Fingerprinter};
use crate::graph::{BuildGraph, EdgeKind};
use crate::transformer::TransformerId;

/// The result of a change-tracking pass.
#[derive(Debug, Default, Clone)]
pub struct DirtySet {
  artifacts: HashSet<ArtifactId>,
  transformers: BTreeSet<TransformerId>,
  current: HashMap<ArtifactId, Option<Fingerprint>>,
}

impl DirtySet {
  pub fn is_dirty(&self, id: ArtifactId) -> bool {
    self.artifacts.contains(&id)
  }

  pub fn is_transformer_dirty(&self, id: TransformerId) -> bool {
    self.transformers.contains(&id)
  }

  /// Dirty transformers in id order.
  pub fn transformers(&self) -> impl Iterator<Item = TransformerId> + '_ {
    self.transformers.iter().copied()
  }

  pub fn transformer_count(&self) -> usize {
    self.transformers.len()
  }

  pub fn artifact_count(&self) -> usize {
    self.artifacts.len()
  }

  /// Fingerprint observed during the pass, `None` if the file was missing or
  /// the artifact was not visited.
  pub fn current_fingerprint(&self, id: ArtifactId) -> Option<&Fingerprint> {
    self.current.get(&id).and_then(Option::as_ref)
  }
}

/// Computes a [`DirtySet`] against the fingerprints recorded in the graph.
#[derive(Debug, Clone, Copy)]
pub struct ChangeTracker<'a> {
  graph: &'a BuildGraph,
  fingerprinter: Fingerprinter,
  changed_files: Option<&'a HashSet<PathBuf>>,
}

impl<'a> ChangeTracker<'a> {
  pub fn new(graph: &'a BuildGraph, fingerprinter: Fingerprinter) -> Self {
    Self {
      graph,
      fingerprinter,
      changed_files: None,
    }
  }

  /// Only re-fingerprint these sources; other sources with a recorded
  /// fingerprint are assumed unchanged. An empty set disables the filter.
  pub fn with_changed_files(mut self, files: &'a HashSet<PathBuf>) -> Self {
    self.changed_files = (!files.is_empty()).then_some(files);
    self
  }

  /// Run the pass over `order`, which must list children before parents.
  pub fn compute(&self, order: &[ArtifactId]) -> Result<DirtySet, FingerprintError> {
    let mut set = DirtySet::default();
    let mut decided: HashMap<TransformerId, bool> = HashMap::new();

    for &id in order {
      let Some(artifact) = self.graph.artifact(id) else {
        continue;
      };

      let dirty = match artifact.producer() {
        Some(producer) => {
          let transformer_dirty = match decided.get(&producer) {
            Some(&dirty) => dirty,
            None => {
              let dirty = self.transformer_dirty(producer, &mut set)?;
              decided.insert(producer, dirty);
              if dirty {
                set.transformers.insert(producer);
              }
              dirty
            }
          };
          // Children of a sibling output may only be decided after the
          // producer was first visited.
          if !transformer_dirty && self.children_dirty(id, &set) {
            debug!(transformer = %producer, artifact = %artifact.path().display(), "dependency changed");
            decided.insert(producer, true);
            set.transformers.insert(producer);
          }
          transformer_dirty || self.children_dirty(id, &set)
        }
        None => self.self_dirty(id, &mut set)? || self.children_dirty(id, &set),
      };

      if dirty {
        trace!(artifact = %artifact.path().display(), "dirty");
        set.artifacts.insert(id);
      }
    }

    debug!(
      artifacts = set.artifacts.len(),
      transformers = set.transformers.len(),
      "change tracking complete"
    );
    Ok(set)
  }

  fn children_dirty(&self, id: ArtifactId, set: &DirtySet) -> bool {
    self
      .graph
      .children(id)
      .into_iter()
      .any(|(child, kind)| kind == EdgeKind::Dependency && set.artifacts.contains(&child))
  }

  /// A producer must run if its commands changed, any input or other
  /// dependency of its outputs is dirty, or any output changed, is missing or
  /// was never recorded.
  fn transformer_dirty(&self, id: TransformerId, set: &mut DirtySet) -> Result<bool, FingerprintError> {
    let Some(transformer) = self.graph.transformer(id) else {
      return Ok(true);
    };

    if transformer.command_changed() {
      debug!(transformer = %id, rule = %transformer.rule, "command changed");
      return Ok(true);
    }

    if let Some(input) = transformer.inputs.iter().find(|i| set.artifacts.contains(i)) {
      debug!(transformer = %id, input = %input, "input changed");
      return Ok(true);
    }

    if let Some(&output) = transformer.outputs.iter().find(|&&o| self.children_dirty(o, set)) {
      debug!(transformer = %id, output = %output, "dependency changed");
      return Ok(true);
    }

    // Visit every output so each gets its fingerprint recorded in the set.
    let mut dirty = false;
    for &output in &transformer.outputs {
      dirty |= self.self_dirty(output, set)?;
    }
    if dirty {
      debug!(transformer = %id, rule = %transformer.rule, "output changed or missing");
    }
    Ok(dirty)
  }

  fn self_dirty(&self, id: ArtifactId, set: &mut DirtySet) -> Result<bool, FingerprintError> {
    let Some(artifact) = self.graph.artifact(id) else {
      return Ok(true);
    };
    let recorded = artifact.recorded.as_ref();

    let current = match set.current.get(&id) {
      Some(fp) => fp.clone(),
      None => {
        let assume_unchanged = artifact.kind == ArtifactKind::Source
          && recorded.is_some()
          && self.changed_files.is_some_and(|files| !files.contains(artifact.path()));
        let fp = if assume_unchanged {
          recorded.cloned()
        } else {
          self.fingerprinter.compute(artifact.path(), recorded)?
        };
        set.current.insert(id, fp.clone());
        fp
      }
    };

    let dirty = match (recorded, current.as_ref()) {
      _ if artifact.always_update => true,
      (Some(recorded), Some(current)) => !self.fingerprinter.unchanged(recorded, current),
      _ => true,
    };
    Ok(dirty)
  }
}
