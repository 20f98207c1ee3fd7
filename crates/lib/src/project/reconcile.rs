use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use tracing::{debug, info};

use crate::artifact::ArtifactKind;
use crate::graph::EdgeKind;

use super::Project;

/// Carry the state of a previous build into a freshly loaded project.
///
/// Recorded fingerprints move over for artifacts with the same path and kind,
/// last-run signatures for transformers producing the same set of outputs,
/// and product build data by product name. Implicit dependencies and the scan
/// cache move over as well. Returns the generated paths of the
/// previous build that no longer exist in `fresh`; the caller deletes them
/// from disk.
pub fn reconcile(fresh: &mut Project, mut previous: Project) -> Vec<PathBuf> {
  let mut stale = Vec::new();

  let fresh_products: HashSet<String> = fresh.product_names().into_iter().collect();
  for name in previous.product_names() {
    if !fresh_products.contains(&name) {
      info!(product = %name, "product removed since last build");
      stale.extend(previous.remove_product(&name));
    }
  }

  for id in fresh.graph.artifact_ids() {
    let Some(artifact) = fresh.graph.artifact(id) else {
      continue;
    };
    let recorded = previous
      .graph
      .lookup(artifact.path())
      .and_then(|old| previous.graph.artifact(old))
      .filter(|old| old.kind == artifact.kind)
      .and_then(|old| old.recorded.clone());
    if let Some(artifact) = fresh.graph.artifact_mut(id) {
      artifact.recorded = recorded;
    }
  }

  carry_implicit_dependencies(fresh, &previous);
  fresh.scan_cache = std::mem::take(&mut previous.scan_cache);

  let fresh_ids: Vec<_> = fresh.graph.transformers().map(|(id, _)| id).collect();
  for id in fresh_ids {
    let Some(transformer) = fresh.graph.transformer(id) else {
      continue;
    };
    let outputs: BTreeSet<PathBuf> = transformer
      .outputs
      .iter()
      .filter_map(|&o| fresh.graph.artifact(o).map(|a| a.path().to_path_buf()))
      .collect();

    let last_run = outputs
      .first()
      .and_then(|path| previous.graph.lookup(path))
      .and_then(|old| previous.graph.artifact(old))
      .and_then(|old| old.producer())
      .and_then(|producer| previous.graph.transformer(producer))
      .filter(|old| {
        let old_outputs: BTreeSet<PathBuf> = old
          .outputs
          .iter()
          .filter_map(|&o| previous.graph.artifact(o).map(|a| a.path().to_path_buf()))
          .collect();
        old_outputs == outputs
      })
      .and_then(|old| old.last_run.clone());

    if let Some(transformer) = fresh.graph.transformer_mut(id) {
      transformer.last_run = last_run;
    }
  }

  for product in &mut fresh.products {
    if let Some(old) = previous.product(&product.name) {
      product.build_data = old.build_data.clone();
    }
  }

  for id in previous.graph.artifact_ids() {
    let Some(old) = previous.graph.artifact(id) else {
      continue;
    };
    if old.kind != ArtifactKind::Generated {
      continue;
    }
    let still_generated = fresh
      .graph
      .lookup(old.path())
      .and_then(|new| fresh.graph.artifact(new))
      .is_some_and(|new| new.is_generated());
    if !still_generated {
      stale.push(old.path().to_path_buf());
    }
  }

  debug!(stale = stale.len(), "reconciled with previous build");
  stale
}

/// Re-create the previous build's implicit dependencies: dependency edges
/// from a generated artifact to anything but its producer's inputs. Missing
/// children are added back as sources with their recorded fingerprints.
fn carry_implicit_dependencies(fresh: &mut Project, previous: &Project) {
  let mut carried = 0;
  for (parent, child, kind) in previous.graph.edges() {
    if kind != EdgeKind::Dependency {
      continue;
    }
    let (Some(old_parent), Some(old_child)) = (previous.graph.artifact(parent), previous.graph.artifact(child)) else {
      continue;
    };
    let declared = old_parent
      .producer()
      .and_then(|t| previous.graph.transformer(t))
      .is_none_or(|t| t.inputs.contains(&child));
    if declared {
      continue;
    }

    let Some((new_parent, product)) = fresh
      .graph
      .lookup(old_parent.path())
      .and_then(|id| fresh.graph.artifact(id).map(|a| (id, a)))
      .filter(|(_, a)| a.is_generated())
      .map(|(id, a)| (id, a.product.clone()))
    else {
      continue;
    };
    let new_child = match fresh.graph.lookup(old_child.path()) {
      Some(id) => id,
      None if old_child.kind == ArtifactKind::Source => {
        let Ok(id) = fresh.graph.add_artifact(
          old_child.path().to_path_buf(),
          ArtifactKind::Source,
          &product,
          old_child.tags.clone(),
        ) else {
          continue;
        };
        if let Some(artifact) = fresh.graph.artifact_mut(id) {
          artifact.recorded = old_child.recorded.clone();
        }
        id
      }
      None => continue,
    };
    if fresh.graph.safe_connect(new_parent, new_child).is_ok() {
      carried += 1;
    }
  }
  if carried > 0 {
    debug!(edges = carried, "carried implicit dependencies");
  }
}
