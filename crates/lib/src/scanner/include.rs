//! `#include` directives of C-family sources.

use super::{DependencyScanner, ScannedDependency};

/// Finds `#include "..."` and `#include <...>` lines (and `#import`).
///
/// Quoted names are local: they resolve against the including file's
/// directory before the search paths. Macro includes are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeScanner;

impl IncludeScanner {
  pub fn new() -> Self {
    Self
  }
}

impl DependencyScanner for IncludeScanner {
  fn name(&self) -> &str {
    "include"
  }

  fn scan(&self, content: &str) -> Vec<ScannedDependency> {
    content.lines().filter_map(directive).collect()
  }
}

fn directive(line: &str) -> Option<ScannedDependency> {
  let rest = line.trim_start().strip_prefix('#')?.trim_start();
  let rest = rest
    .strip_prefix("include")
    .or_else(|| rest.strip_prefix("import"))?
    .trim_start();

  let mut chars = rest.chars();
  let (close, local) = match chars.next()? {
    '"' => ('"', true),
    '<' => ('>', false),
    _ => return None,
  };
  let name = chars.as_str();
  let end = name.find(close)?;
  let path = name[..end].trim();
  if path.is_empty() {
    return None;
  }
  Some(ScannedDependency {
    path: path.to_string(),
    local,
  })
}
