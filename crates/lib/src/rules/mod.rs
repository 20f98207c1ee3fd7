//! Tag-driven rules that generate transformers.
//!
//! A rule consumes artifacts carrying any of its input tags and produces an
//! artifact tagged with its output tags. The registry orders rules by tag flow
//! once, then applies each rule in that order, so a rule sees the outputs of
//! every rule feeding it.

pub mod template;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::artifact::{ArtifactId, ArtifactKind, FileTags};
use crate::graph::{BuildGraph, GraphError, TransformerSpec};
use crate::transformer::{BuiltinCommand, Command, ProcessCommand, RuleId, TransformerId};

use template::{TemplateContext, TemplateError};

/// Description of a rule as declared by a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDescriptor {
  pub id: String,

  pub input_tags: FileTags,

  pub output_tags: FileTags,

  /// Output path template, relative to the project root.
  pub output: String,

  /// Commands whose string fields are templates.
  pub commands: Vec<Command>,

  /// Create one transformer for all matching inputs instead of one per input.
  #[serde(default)]
  pub multiplex: bool,
}

#[derive(Debug, Error)]
pub enum RuleError {
  #[error("rules form a cycle through their tags: {}", .0.join(" -> "))]
  Cycle(Vec<String>),

  #[error("rule '{0}' is declared more than once")]
  Duplicate(String),

  #[error("rule '{rule}': {source}")]
  Template {
    rule: String,
    #[source]
    source: TemplateError,
  },

  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// Rules of one product, in application order.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
  rules: Vec<RuleDescriptor>,
}

impl RuleRegistry {
  /// Order `rules` so that every rule comes after the rules producing its
  /// input tags. Rules with independent tags keep their declared order.
  pub fn new(rules: Vec<RuleDescriptor>) -> Result<Self, RuleError> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..rules.len()).map(|i| graph.add_node(i)).collect();

    for (i, producer) in rules.iter().enumerate() {
      if rules[..i].iter().any(|r| r.id == producer.id) {
        return Err(RuleError::Duplicate(producer.id.clone()));
      }
      for (j, consumer) in rules.iter().enumerate() {
        if producer.output_tags.intersects(&consumer.input_tags) {
          graph.add_edge(nodes[i], nodes[j], ());
        }
      }
    }

    // Kahn's algorithm, always taking the earliest declared ready rule.
    let mut in_degree: Vec<usize> = nodes
      .iter()
      .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
      .collect();
    let mut ready: BTreeSet<usize> = (0..rules.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(rules.len());

    while let Some(i) = ready.pop_first() {
      order.push(i);
      for next in graph.neighbors_directed(nodes[i], Direction::Outgoing) {
        let j = graph[next];
        in_degree[j] -= 1;
        if in_degree[j] == 0 {
          ready.insert(j);
        }
      }
    }

    if order.len() < rules.len() {
      let cycle = tarjan_scc(&graph)
        .into_iter()
        .find(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .unwrap_or_default();
      let mut members: Vec<usize> = cycle.into_iter().map(|n| graph[n]).collect();
      members.sort_unstable();
      return Err(RuleError::Cycle(members.into_iter().map(|i| rules[i].id.clone()).collect()));
    }

    let mut slots: Vec<Option<RuleDescriptor>> = rules.into_iter().map(Some).collect();
    let ordered: Vec<RuleDescriptor> = order.into_iter().filter_map(|i| slots[i].take()).collect();
    debug!(rules = ?ordered.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), "rule order");
    Ok(Self { rules: ordered })
  }

  pub fn rules(&self) -> &[RuleDescriptor] {
    &self.rules
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  /// Apply every rule to the matching artifacts of `product`.
  ///
  /// Each rule is applied once per matching artifact (or once for all of them
  /// when multiplexed). Artifacts a rule already consumes are not matched again.
  pub fn apply(&self, graph: &mut BuildGraph, product: &str, root: &Path) -> Result<Vec<TransformerId>, RuleError> {
    let mut created = Vec::new();

    for rule in &self.rules {
      let rule_id = RuleId(rule.id.clone());
      let matches: Vec<ArtifactId> = graph
        .product_artifacts(product)
        .into_iter()
        .filter(|&id| {
          graph.artifact(id).is_some_and(|a| {
            a.tags.intersects(&rule.input_tags)
              && !a
                .consumers()
                .any(|t| graph.transformer(t).is_some_and(|t| t.rule == rule_id))
          })
        })
        .collect();

      if matches.is_empty() {
        continue;
      }

      let groups: Vec<Vec<ArtifactId>> = if rule.multiplex {
        vec![matches]
      } else {
        matches.into_iter().map(|id| vec![id]).collect()
      };

      for inputs in groups {
        let id = apply_rule(graph, rule, product, root, inputs)?;
        created.push(id);
      }
    }

    if !created.is_empty() {
      info!(product, transformers = created.len(), "applied rules");
    }
    Ok(created)
  }
}

fn apply_rule(
  graph: &mut BuildGraph,
  rule: &RuleDescriptor,
  product: &str,
  root: &Path,
  inputs: Vec<ArtifactId>,
) -> Result<TransformerId, RuleError> {
  let template_err = |source| RuleError::Template {
    rule: rule.id.clone(),
    source,
  };

  let input_paths: Vec<PathBuf> = inputs
    .iter()
    .filter_map(|&id| graph.artifact(id).map(|a| a.path().to_path_buf()))
    .collect();
  let mut ctx = TemplateContext::new(input_paths);

  let output_path = root.join(ctx.expand(&rule.output).map_err(template_err)?);
  ctx.outputs.push(output_path.clone());

  let output = graph.add_artifact(output_path, ArtifactKind::Generated, product, rule.output_tags.clone())?;
  let commands = rule
    .commands
    .iter()
    .map(|c| expand_command(c, &ctx))
    .collect::<Result<Vec<_>, _>>()
    .map_err(template_err)?;

  let id = graph.add_transformer(TransformerSpec {
    rule: RuleId(rule.id.clone()),
    product: product.to_string(),
    inputs,
    outputs: vec![output],
    explicit_depends: Vec::new(),
    commands,
  })?;
  Ok(id)
}

fn expand_command(command: &Command, ctx: &TemplateContext) -> Result<Command, TemplateError> {
  let expand_args = |args: &[String]| -> Result<Vec<String>, TemplateError> {
    let mut expanded = Vec::new();
    for arg in args {
      expanded.extend(ctx.expand_arg(arg)?);
    }
    Ok(expanded)
  };
  let expand_path = |path: &Option<PathBuf>| -> Result<Option<PathBuf>, TemplateError> {
    path
      .as_ref()
      .map(|p| ctx.expand(&p.to_string_lossy()).map(PathBuf::from))
      .transpose()
  };

  Ok(match command {
    Command::Process(cmd) => Command::Process(ProcessCommand {
      program: ctx.expand(&cmd.program)?,
      arguments: expand_args(&cmd.arguments)?,
      working_dir: expand_path(&cmd.working_dir)?,
      environment: cmd
        .environment
        .iter()
        .map(|(k, v)| Ok((k.clone(), ctx.expand(v)?)))
        .collect::<Result<_, TemplateError>>()?,
      description: cmd.description.as_deref().map(|d| ctx.expand(d)).transpose()?,
      max_exit_code: cmd.max_exit_code,
      stdout_path: expand_path(&cmd.stdout_path)?,
      stderr_path: expand_path(&cmd.stderr_path)?,
      silent: cmd.silent,
    }),
    Command::Builtin(cmd) => Command::Builtin(BuiltinCommand {
      name: cmd.name.clone(),
      args: expand_args(&cmd.args)?,
      description: cmd.description.as_deref().map(|d| ctx.expand(d)).transpose()?,
      silent: cmd.silent,
    }),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tags(list: &[&str]) -> FileTags {
    list.iter().copied().collect()
  }

  fn rule(id: &str, input: &[&str], output: &[&str], path: &str) -> RuleDescriptor {
    RuleDescriptor {
      id: id.to_string(),
      input_tags: tags(input),
      output_tags: tags(output),
      output: path.to_string(),
      commands: vec![ProcessCommand::new("cc").args(["-c", "${input}", "-o", "${output}"]).into()],
      multiplex: false,
    }
  }

  #[test]
  fn orders_rules_by_tag_flow() {
    let link = RuleDescriptor {
      multiplex: true,
      ..rule("link", &["obj"], &["application"], "build/app")
    };
    let compile = rule("compile", &["cpp"], &["obj"], "build/${stem}.o");
    let registry = RuleRegistry::new(vec![link, compile]).unwrap();
    let ids: Vec<&str> = registry.rules().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["compile", "link"]);
  }

  #[test]
  fn rule_cycle_is_an_error() {
    let a = rule("a", &["x"], &["y"], "${stem}.y");
    let b = rule("b", &["y"], &["x"], "${stem}.x");
    let err = RuleRegistry::new(vec![a, b]).unwrap_err();
    match err {
      RuleError::Cycle(path) => {
        assert_eq!(path.len(), 2);
        assert!(path.contains(&"a".to_string()) && path.contains(&"b".to_string()));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn self_feeding_rule_is_a_cycle() {
    let err = RuleRegistry::new(vec![rule("gen", &["x"], &["x"], "${stem}.x")]).unwrap_err();
    assert!(matches!(err, RuleError::Cycle(path) if path == vec!["gen".to_string()]));
  }

  #[test]
  fn apply_creates_transformers_per_input_and_multiplexed() {
    let root = Path::new("/proj");
    let mut graph = BuildGraph::new();
    for name in ["src/a.cpp", "src/b.cpp"] {
      graph
        .add_artifact(root.join(name), ArtifactKind::Source, "app", tags(&["cpp"]))
        .unwrap();
    }
    graph
      .add_artifact(root.join("README"), ArtifactKind::Source, "app", tags(&["doc"]))
      .unwrap();

    let link = RuleDescriptor {
      multiplex: true,
      commands: vec![ProcessCommand::new("cc").args(["-o", "${output}", "${inputs}"]).into()],
      ..rule("link", &["obj"], &["application"], "build/app")
    };
    let registry = RuleRegistry::new(vec![rule("compile", &["cpp"], &["obj"], "build/${stem}.o"), link]).unwrap();

    let created = registry.apply(&mut graph, "app", root).unwrap();
    assert_eq!(created.len(), 3);

    let app = graph.lookup(Path::new("/proj/build/app")).unwrap();
    let linker = graph.transformer(graph.artifact(app).unwrap().producer().unwrap()).unwrap();
    assert_eq!(linker.inputs.len(), 2);
    match &linker.commands[0] {
      Command::Process(cmd) => assert_eq!(
        cmd.arguments,
        vec!["-o", "/proj/build/app", "/proj/build/a.o", "/proj/build/b.o"]
      ),
      other => panic!("unexpected command {other:?}"),
    }

    // A second application finds nothing new.
    assert!(registry.apply(&mut graph, "app", root).unwrap().is_empty());
    graph.sanity_check().unwrap();
  }

  #[test]
  fn colliding_outputs_are_duplicate_paths() {
    let root = Path::new("/proj");
    let mut graph = BuildGraph::new();
    for name in ["src/a.cpp", "lib/a.cpp"] {
      graph
        .add_artifact(root.join(name), ArtifactKind::Source, "app", tags(&["cpp"]))
        .unwrap();
    }
    let registry = RuleRegistry::new(vec![rule("compile", &["cpp"], &["obj"], "build/${stem}.o")]).unwrap();
    let err = registry.apply(&mut graph, "app", root).unwrap_err();
    assert!(matches!(err, RuleError::Graph(GraphError::DuplicatePath { .. })));
  }
}
