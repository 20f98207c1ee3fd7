//! Projects and products.
//!
//! A [`Project`] is the unit of build invocation and persistence. It owns the
//! build graph shared by all of its [`Product`]s; every artifact and
//! transformer names the product it belongs to.

mod reconcile;
mod resolved;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactId;
use crate::graph::{BuildGraph, GraphError};
use crate::scanner::ScanCache;

pub use reconcile::reconcile;
pub use resolved::{
  LoadError, ResolvedOutput, ResolvedProduct, ResolvedProject, ResolvedSource, ResolvedTransformer, load_project,
};

/// Per-product data carried between builds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductBuildData {
  /// Warnings emitted by the last build, e.g. commands that wrote to stderr.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub warnings: Vec<String>,

  /// Completion time of the last build, in seconds since the Unix epoch.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_build: Option<u64>,
}

/// A named group of artifacts built together.
#[derive(Debug, Clone)]
pub struct Product {
  pub name: String,

  /// Artifacts requested when the product is built.
  pub targets: Vec<ArtifactId>,

  pub build_data: ProductBuildData,
}

impl Product {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      targets: Vec::new(),
      build_data: ProductBuildData::default(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Project {
  pub name: String,

  /// Absolute project directory. Relative paths resolve against it.
  pub root: PathBuf,

  pub products: Vec<Product>,

  pub graph: BuildGraph,

  /// Raw dependency scan results, reused while files are unchanged.
  pub scan_cache: ScanCache,
}

impl Project {
  pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
    Self {
      name: name.into(),
      root: root.into(),
      products: Vec::new(),
      graph: BuildGraph::new(),
      scan_cache: ScanCache::new(),
    }
  }

  pub fn product(&self, name: &str) -> Option<&Product> {
    self.products.iter().find(|p| p.name == name)
  }

  pub fn product_mut(&mut self, name: &str) -> Option<&mut Product> {
    self.products.iter_mut().find(|p| p.name == name)
  }

  pub fn product_names(&self) -> Vec<String> {
    self.products.iter().map(|p| p.name.clone()).collect()
  }

  /// Display `path` relative to the project root when possible.
  pub fn display_path(&self, path: &Path) -> String {
    path.strip_prefix(&self.root).unwrap_or(path).display().to_string()
  }

  /// Walk roots of a product: its targets in declared order, then every other
  /// artifact of the product in creation order.
  pub fn roots(&self, product: &str) -> Vec<ArtifactId> {
    let mut roots: Vec<ArtifactId> = self.product(product).map(|p| p.targets.clone()).unwrap_or_default();
    for id in self.graph.product_artifacts(product) {
      if !roots.contains(&id) {
        roots.push(id);
      }
    }
    roots
  }

  /// Fail with the cycle path if the product's artifacts form a cycle.
  pub fn detect_cycles(&self, product: &str) -> Result<(), GraphError> {
    self.graph.detect_cycles(&self.roots(product))
  }

  /// Topological order of a product, children first.
  pub fn topological_order(&self, product: &str) -> Result<Vec<ArtifactId>, GraphError> {
    self.graph.topological_order(&self.roots(product))
  }

  /// Combined topological order of several products; all products if
  /// `products` is empty. Artifacts shared between products appear once.
  pub fn build_order(&self, products: &[String]) -> Result<Vec<ArtifactId>, GraphError> {
    let mut roots = Vec::new();
    for product in &self.products {
      if products.is_empty() || products.contains(&product.name) {
        roots.extend(self.roots(&product.name));
      }
    }
    self.graph.topological_order(&roots)
  }

  /// Remove a product and its graph contents. Returns the paths of its
  /// generated artifacts, which the caller should delete from disk.
  pub fn remove_product(&mut self, name: &str) -> Vec<PathBuf> {
    self.products.retain(|p| p.name != name);
    self.graph.remove_product(name)
  }
}
