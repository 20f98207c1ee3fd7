//! Graph walks: cycle detection, topological ordering and path queries.
//!
//! All walks use an explicit stack so deep graphs cannot overflow the call
//! stack, and visit children in creation order so results are deterministic.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::artifact::ArtifactId;

use super::{BuildGraph, GraphError};

struct Frame {
  node: ArtifactId,
  children: Vec<ArtifactId>,
  next: usize,
}

impl BuildGraph {
  fn frame(&self, node: ArtifactId) -> Frame {
    Frame {
      node,
      children: self.children(node).into_iter().map(|(child, _)| child).collect(),
      next: 0,
    }
  }

  /// Depth-first post-order walk from `roots`, failing on the first cycle.
  fn post_order(&self, roots: &[ArtifactId]) -> Result<Vec<ArtifactId>, GraphError> {
    let mut done: HashSet<ArtifactId> = HashSet::new();
    let mut on_path: HashSet<ArtifactId> = HashSet::new();
    let mut order = Vec::new();

    for &root in roots {
      self.artifact_or_err(root)?;
      if done.contains(&root) {
        continue;
      }

      on_path.insert(root);
      let mut stack = vec![self.frame(root)];

      while let Some(frame) = stack.last_mut() {
        if let Some(&child) = frame.children.get(frame.next) {
          frame.next += 1;
          if done.contains(&child) {
            continue;
          }
          if on_path.contains(&child) {
            let start = stack.iter().position(|f| f.node == child).unwrap_or(0);
            let path = stack[start..]
              .iter()
              .map(|f| self.graph[f.node.0].path().to_path_buf())
              .collect();
            return Err(GraphError::CycleDetected { path });
          }
          on_path.insert(child);
          stack.push(self.frame(child));
        } else {
          let node = frame.node;
          stack.pop();
          on_path.remove(&node);
          done.insert(node);
          order.push(node);
        }
      }
    }

    Ok(order)
  }

  /// Check that nothing reachable from `roots` forms a dependency cycle.
  ///
  /// On failure the error lists the cycle's artifacts, each exactly once.
  pub fn detect_cycles(&self, roots: &[ArtifactId]) -> Result<(), GraphError> {
    let order = self.post_order(roots)?;
    debug!(roots = roots.len(), visited = order.len(), "no dependency cycles");
    Ok(())
  }

  /// Artifacts reachable from `roots`, children before parents.
  ///
  /// Roots are walked in the given order and children in creation order, so
  /// the result is stable across runs.
  pub fn topological_order(&self, roots: &[ArtifactId]) -> Result<Vec<ArtifactId>, GraphError> {
    self.post_order(roots)
  }

  /// True if `to` is reachable from `from` (including `from == to`).
  pub fn exists_path(&self, from: ArtifactId, to: ArtifactId) -> bool {
    if self.artifact(from).is_none() {
      return false;
    }
    let mut seen = HashSet::from([from]);
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
      if node == to {
        return true;
      }
      for (child, _) in self.children(node) {
        if seen.insert(child) {
          stack.push(child);
        }
      }
    }
    false
  }

  /// Shortest path from `from` to `to`, both included.
  pub fn find_path(&self, from: ArtifactId, to: ArtifactId) -> Option<Vec<ArtifactId>> {
    self.artifact(from)?;
    let mut came_from: HashMap<ArtifactId, ArtifactId> = HashMap::new();
    let mut seen = HashSet::from([from]);
    let mut queue = VecDeque::from([from]);

    while let Some(node) = queue.pop_front() {
      if node == to {
        let mut path = vec![to];
        let mut current = to;
        while let Some(&prev) = came_from.get(&current) {
          path.push(prev);
          current = prev;
        }
        path.reverse();
        return Some(path);
      }
      for (child, _) in self.children(node) {
        if seen.insert(child) {
          came_from.insert(child, node);
          queue.push_back(child);
        }
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;
  use crate::graph::tests::{generated, source, spec};

  #[test]
  fn diamond_is_not_a_cycle() {
    let mut graph = BuildGraph::new();
    let a = generated(&mut graph, "/p/a");
    let b = generated(&mut graph, "/p/b");
    let c = generated(&mut graph, "/p/c");
    let d = generated(&mut graph, "/p/d");
    graph.connect(a, b).unwrap();
    graph.connect(a, c).unwrap();
    graph.connect(b, d).unwrap();
    graph.connect(c, d).unwrap();

    graph.detect_cycles(&[a]).unwrap();
    assert_eq!(graph.topological_order(&[a]).unwrap(), vec![d, b, c, a]);
  }

  #[test]
  fn two_node_cycle() {
    let mut graph = BuildGraph::new();
    let a = generated(&mut graph, "/p/a");
    let b = generated(&mut graph, "/p/b");
    graph.connect(a, b).unwrap();
    graph.connect(b, a).unwrap();

    let err = graph.detect_cycles(&[a]).unwrap_err();
    assert_eq!(
      err,
      GraphError::CycleDetected {
        path: vec![PathBuf::from("/p/a"), PathBuf::from("/p/b")],
      }
    );
  }

  #[test]
  fn three_node_cycle_lists_each_node_once() {
    let mut graph = BuildGraph::new();
    let a = generated(&mut graph, "/p/a");
    let b = generated(&mut graph, "/p/b");
    let c = generated(&mut graph, "/p/c");
    graph.connect(a, b).unwrap();
    graph.connect(b, c).unwrap();
    graph.connect(c, a).unwrap();

    let GraphError::CycleDetected { path } = graph.detect_cycles(&[a]).unwrap_err() else {
      panic!("expected a cycle");
    };
    assert_eq!(
      path,
      vec![PathBuf::from("/p/a"), PathBuf::from("/p/b"), PathBuf::from("/p/c")]
    );
  }

  #[test]
  fn cycle_below_the_root_is_reported_without_the_root() {
    let mut graph = BuildGraph::new();
    let app = generated(&mut graph, "/p/app");
    let a = generated(&mut graph, "/p/a");
    let b = generated(&mut graph, "/p/b");
    graph.connect(app, a).unwrap();
    graph.connect(a, b).unwrap();
    graph.connect(b, a).unwrap();

    let GraphError::CycleDetected { path } = graph.detect_cycles(&[app]).unwrap_err() else {
      panic!("expected a cycle");
    };
    assert_eq!(path, vec![PathBuf::from("/p/a"), PathBuf::from("/p/b")]);
  }

  #[test]
  fn topological_order_puts_inputs_first() {
    let mut graph = BuildGraph::new();
    let a_cpp = source(&mut graph, "/p/a.cpp");
    let b_cpp = source(&mut graph, "/p/b.cpp");
    let a_o = generated(&mut graph, "/p/a.o");
    let b_o = generated(&mut graph, "/p/b.o");
    let app = generated(&mut graph, "/p/app");
    graph.add_transformer(spec("compile-a", vec![a_cpp], vec![a_o])).unwrap();
    graph.add_transformer(spec("compile-b", vec![b_cpp], vec![b_o])).unwrap();
    graph.add_transformer(spec("link", vec![a_o, b_o], vec![app])).unwrap();

    let order = graph.topological_order(&[app]).unwrap();
    assert_eq!(order, vec![a_cpp, a_o, b_cpp, b_o, app]);
  }

  #[test]
  fn path_queries() {
    let mut graph = BuildGraph::new();
    let a = generated(&mut graph, "/p/a");
    let b = generated(&mut graph, "/p/b");
    let c = generated(&mut graph, "/p/c");
    graph.connect(a, b).unwrap();
    graph.connect(b, c).unwrap();

    assert!(graph.exists_path(a, c));
    assert!(!graph.exists_path(c, a));
    assert_eq!(graph.find_path(a, c), Some(vec![a, b, c]));
    assert_eq!(graph.find_path(c, a), None);
    assert_eq!(graph.find_path(a, a), Some(vec![a]));
  }
}
