use tracing::debug;

use crate::artifact::ArtifactId;

use super::{BuildGraph, EdgeKind, GraphError};

impl BuildGraph {
  /// Verify the bookkeeping between artifacts, transformers and edges.
  ///
  /// Checks that the path index matches the nodes, every generated artifact
  /// has exactly one producer listing it as an output, producer and consumer
  /// links agree with transformer inputs and outputs, and every output has a
  /// dependency edge to every input.
  pub fn sanity_check(&self) -> Result<(), GraphError> {
    let ids = self.artifact_ids();
    if ids.len() != self.by_path.len() {
      return Err(GraphError::Inconsistent(format!(
        "{} artifacts but {} indexed paths",
        ids.len(),
        self.by_path.len()
      )));
    }

    for &id in &ids {
      let artifact = self.artifact_or_err(id)?;
      let path = artifact.path().display();
      if self.lookup(artifact.path()) != Some(id) {
        return Err(GraphError::Inconsistent(format!("{path} is not indexed by its path")));
      }

      match artifact.producer() {
        Some(producer) => {
          let transformer = self.transformer_or_err(producer)?;
          if !transformer.outputs.contains(&id) {
            return Err(GraphError::Inconsistent(format!(
              "{path} names {producer} as producer, which does not output it"
            )));
          }
        }
        None if artifact.is_generated() => {
          return Err(GraphError::Inconsistent(format!("generated artifact {path} has no producer")));
        }
        None => {}
      }

      for consumer in artifact.consumers() {
        if !self.transformer_or_err(consumer)?.inputs.contains(&id) {
          return Err(GraphError::Inconsistent(format!(
            "{path} names {consumer} as consumer, which does not read it"
          )));
        }
      }
    }

    for (tid, transformer) in self.transformers() {
      for &output in &transformer.outputs {
        if self.artifact_or_err(output)?.producer() != Some(tid) {
          return Err(GraphError::Inconsistent(format!(
            "{tid} outputs {output} without being its producer"
          )));
        }
        for &input in &transformer.inputs {
          if !self.has_edge(output, input, EdgeKind::Dependency) {
            return Err(GraphError::Inconsistent(format!(
              "missing dependency edge {output} -> {input} for {tid}"
            )));
          }
        }
      }
      for &input in &transformer.inputs {
        if !self.artifact_or_err(input)?.consumers().any(|c| c == tid) {
          return Err(GraphError::Inconsistent(format!("{tid} reads {input} without being a consumer")));
        }
      }
    }

    debug!(
      artifacts = ids.len(),
      transformers = self.transformer_count(),
      "build graph is consistent"
    );
    Ok(())
  }

  fn has_edge(&self, parent: ArtifactId, child: ArtifactId, kind: EdgeKind) -> bool {
    self
      .graph
      .find_edge(parent.0, child.0)
      .is_some_and(|edge| self.graph[edge] == kind)
  }
}
