//! Build execution.
//!
//! This module provides the main entry point for building a project. It:
//! - Scans inputs for implicit dependencies
//! - Computes the dirty transformers of the selected products
//! - Dispatches ready transformers to a bounded pool of tokio tasks
//! - Records output fingerprints and command signatures as work completes
//! - Skips dependents of failed transformers and honors cancellation
//!
//! The graph is only touched by the coordinating task. Workers receive an
//! owned `Job` and hand back a `JobOutcome`.

pub mod actions;
mod cancel;
mod session;
mod types;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::artifact::{ArtifactId, ArtifactKind};
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::graph::EdgeKind;
use crate::project::Project;
use crate::scanner::{ScannerRegistry, scan_dependencies};
use crate::tracker::{ChangeTracker, DirtySet};
use crate::transformer::{Command, TransformerId};

use actions::{CommandContext, execute_command};

pub use actions::{Builtin, BuiltinError, BuiltinRegistry, CommandOutput};
pub use cancel::CancellationToken;
pub use session::{CheckReport, OutdatedTransformer, Session, SessionOptions, StatusReport};
pub use types::{
  BuildError, BuildEvent, BuildOptions, BuildReport, BuildStatus, EchoMode, SkippedTransformer, TransformerError,
  TransformerFailure, TransformerState, default_jobs,
};

/// Collaborators of a build.
#[derive(Debug, Clone)]
pub struct BuildContext {
  pub builtins: Arc<BuiltinRegistry>,
  pub scanners: Arc<ScannerRegistry>,
  pub cancel: CancellationToken,

  /// Receives progress events when set.
  pub events: Option<mpsc::UnboundedSender<BuildEvent>>,
}

impl Default for BuildContext {
  fn default() -> Self {
    Self {
      builtins: Arc::new(BuiltinRegistry::with_defaults()),
      scanners: Arc::new(ScannerRegistry::with_defaults()),
      cancel: CancellationToken::new(),
      events: None,
    }
  }
}

/// Dirty transformers of the selected products, in build order.
///
/// Implicit dependencies are those found by the last scan.
pub fn outdated(project: &Project, options: &BuildOptions) -> Result<Vec<TransformerId>, BuildError> {
  let (order, dirty) = track_changes(project, options)?;
  Ok(ranked(project, &order, &dirty).into_iter().map(|(id, _)| id).collect())
}

/// Build the selected products of `project`.
///
/// Structural problems (cycles, unknown products) and fingerprinting errors
/// abort before anything runs. Transformer failures do not: they are collected
/// in the returned report.
pub async fn execute_build(
  project: &mut Project,
  options: &BuildOptions,
  ctx: BuildContext,
) -> Result<BuildReport, BuildError> {
  let order = selected_order(project, options)?;
  scan_dependencies(
    project,
    &order,
    &ctx.scanners,
    Fingerprinter::new(options.fingerprint_mode),
  )?;

  let (order, dirty) = track_changes(project, options)?;
  let ranked = ranked(project, &order, &dirty);

  info!(
    project = %project.name,
    artifacts = order.len(),
    outdated = ranked.len(),
    jobs = options.jobs,
    dry_run = options.dry_run,
    "starting build"
  );

  let mut scheduler = Scheduler::new(project, options, ctx, &ranked)?;
  scheduler.run().await;
  let report = scheduler.finish();

  if !options.dry_run {
    record_sources(project, &order, &dirty, &report);
  }

  info!(
    status = ?report.status,
    executed = report.executed.len(),
    failed = report.failures.len(),
    skipped = report.skipped.len(),
    "build complete"
  );
  Ok(report)
}

fn selected_order(project: &Project, options: &BuildOptions) -> Result<Vec<ArtifactId>, BuildError> {
  if let Some(name) = options.products.iter().find(|name| project.product(name).is_none()) {
    return Err(BuildError::UnknownProduct(name.clone()));
  }
  Ok(project.build_order(&options.products)?)
}

fn track_changes(project: &Project, options: &BuildOptions) -> Result<(Vec<ArtifactId>, DirtySet), BuildError> {
  let order = selected_order(project, options)?;
  let dirty = ChangeTracker::new(&project.graph, Fingerprinter::new(options.fingerprint_mode))
    .with_changed_files(&options.changed_files)
    .compute(&order)?;
  Ok((order, dirty))
}

/// Dirty transformers paired with the position of their first output in
/// `order`, sorted by that position.
fn ranked(project: &Project, order: &[ArtifactId], dirty: &DirtySet) -> Vec<(TransformerId, usize)> {
  let mut rank: BTreeMap<TransformerId, usize> = BTreeMap::new();
  for (position, &id) in order.iter().enumerate() {
    if let Some(producer) = project.graph.artifact(id).and_then(|a| a.producer())
      && dirty.is_transformer_dirty(producer)
    {
      rank.entry(producer).or_insert(position);
    }
  }
  let mut ranked: Vec<_> = rank.into_iter().collect();
  ranked.sort_by_key(|&(id, position)| (position, id));
  ranked
}

/// Record fingerprints of sources once every transformer depending on them
/// has caught up.
///
/// A source is depended on by its consumers and by the producers of artifacts
/// connected to it. Each of them must have succeeded in this build or have
/// been evaluated clean; a transformer outside the build order was never
/// evaluated and still needs to see the change.
fn record_sources(project: &mut Project, order: &[ArtifactId], dirty: &DirtySet, report: &BuildReport) {
  let evaluated: HashSet<ArtifactId> = order.iter().copied().collect();
  let settled = |t: TransformerId| match report.state(t) {
    Some(state) => state == TransformerState::Succeeded,
    None => {
      !dirty.is_transformer_dirty(t)
        && project
          .graph
          .transformer(t)
          .is_some_and(|transformer| transformer.outputs.iter().all(|o| evaluated.contains(o)))
    }
  };

  let mut record = Vec::new();
  for &id in order {
    let Some(artifact) = project.graph.artifact(id) else {
      continue;
    };
    if artifact.kind != ArtifactKind::Source {
      continue;
    }
    let Some(current) = dirty.current_fingerprint(id) else {
      continue;
    };
    let dependents = project.graph.parents(id).into_iter().filter_map(|parent| {
      if !project.graph.children(parent).contains(&(id, EdgeKind::Dependency)) {
        return None;
      }
      project.graph.artifact(parent)?.producer()
    });
    if artifact.consumers().chain(dependents).all(&settled) {
      record.push((id, current.clone()));
    } else {
      debug!(source = %artifact.path().display(), "source left unrecorded");
    }
  }

  for (id, current) in record {
    if let Some(artifact) = project.graph.artifact_mut(id) {
      artifact.recorded = Some(current);
    }
  }
}

/// Owned snapshot of one transformer's work.
struct Job {
  commands: Vec<Command>,
  outputs: Vec<(ArtifactId, PathBuf)>,
  root: PathBuf,
  fingerprinter: Fingerprinter,
  kill_timeout: Duration,
  echo_mode: EchoMode,
  dry_run: bool,
  builtins: Arc<BuiltinRegistry>,
  cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct JobSuccess {
  fingerprints: Vec<(ArtifactId, Fingerprint)>,
  warnings: Vec<String>,
}

struct JobOutcome {
  id: TransformerId,
  result: Result<JobSuccess, TransformerError>,
}

impl Job {
  async fn run(self) -> Result<JobSuccess, TransformerError> {
    if self.dry_run {
      for command in &self.commands {
        info!(command = %command.command_line(), "would run");
      }
      return Ok(JobSuccess::default());
    }

    for (_, path) in &self.outputs {
      if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
      }
    }

    let ctx = CommandContext {
      root: &self.root,
      builtins: &self.builtins,
      kill_timeout: self.kill_timeout,
      echo_mode: self.echo_mode,
      cancel: &self.cancel,
    };

    let mut warnings = Vec::new();
    for command in &self.commands {
      let output = execute_command(command, &ctx).await?;
      let stderr = output.stderr.trim();
      if !stderr.is_empty() && !command.is_silent() {
        warnings.push(format!("{}: {stderr}", command.command_line()));
      }
    }

    let mut fingerprints = Vec::with_capacity(self.outputs.len());
    for (id, path) in &self.outputs {
      match self.fingerprinter.compute(path, None)? {
        Some(fingerprint) => fingerprints.push((*id, fingerprint)),
        None => return Err(TransformerError::MissingOutput { path: path.clone() }),
      }
    }

    Ok(JobSuccess { fingerprints, warnings })
  }
}

struct Scheduler<'a> {
  project: &'a mut Project,
  options: &'a BuildOptions,
  ctx: BuildContext,
  fingerprinter: Fingerprinter,

  states: BTreeMap<TransformerId, TransformerState>,
  rank: HashMap<TransformerId, usize>,

  /// Unfinished scheduled dependencies per transformer.
  waiting: HashMap<TransformerId, usize>,
  dependents: HashMap<TransformerId, Vec<TransformerId>>,
  ready: BTreeSet<(usize, TransformerId)>,

  executed: Vec<TransformerId>,
  failures: Vec<TransformerFailure>,
  skipped: Vec<SkippedTransformer>,
  warnings: BTreeMap<String, Vec<String>>,
  finished: usize,
  cancelled: bool,
}

impl<'a> Scheduler<'a> {
  fn new(
    project: &'a mut Project,
    options: &'a BuildOptions,
    ctx: BuildContext,
    ranked: &[(TransformerId, usize)],
  ) -> Result<Self, BuildError> {
    let rank: HashMap<_, _> = ranked.iter().copied().collect();
    let mut states = BTreeMap::new();
    let mut waiting = HashMap::new();
    let mut dependents: HashMap<TransformerId, Vec<TransformerId>> = HashMap::new();
    let mut ready = BTreeSet::new();

    for &(id, position) in ranked {
      let deps: Vec<_> = project
        .graph
        .transformer_dependencies(id)?
        .into_iter()
        .filter(|dep| rank.contains_key(dep))
        .collect();
      for &dep in &deps {
        dependents.entry(dep).or_default().push(id);
      }
      if deps.is_empty() {
        states.insert(id, TransformerState::Ready);
        ready.insert((position, id));
      } else {
        states.insert(id, TransformerState::Pending);
        waiting.insert(id, deps.len());
      }
    }

    Ok(Self {
      project,
      options,
      ctx,
      fingerprinter: Fingerprinter::new(options.fingerprint_mode),
      states,
      rank,
      waiting,
      dependents,
      ready,
      executed: Vec::new(),
      failures: Vec::new(),
      skipped: Vec::new(),
      warnings: BTreeMap::new(),
      finished: 0,
      cancelled: false,
    })
  }

  async fn run(&mut self) {
    let jobs = self.options.jobs.max(1);
    let mut join_set: JoinSet<JobOutcome> = JoinSet::new();
    let mut stopping = false;

    loop {
      if self.ctx.cancel.is_cancelled() {
        self.cancelled = true;
        stopping = true;
      }

      while !stopping && join_set.len() < jobs {
        let Some((_, id)) = self.ready.pop_first() else {
          break;
        };
        let Some(job) = self.job(id) else {
          continue;
        };
        self.states.insert(id, TransformerState::Running);
        self.emit(BuildEvent::Started {
          transformer: id,
          description: self.describe(id),
          percentage: self.percentage(),
        });
        debug!(transformer = %id, "dispatching");

        join_set.spawn(async move {
          // Run in a nested task so a panic is reported against its transformer.
          let result = match tokio::spawn(job.run()).await {
            Ok(result) => result,
            Err(e) => Err(TransformerError::Panicked(e.to_string())),
          };
          JobOutcome { id, result }
        });
      }

      if join_set.is_empty() {
        break;
      }

      let joined = tokio::select! {
        joined = join_set.join_next() => joined,
        () = self.ctx.cancel.cancelled(), if !stopping => {
          info!("cancellation requested, waiting for running commands");
          continue;
        }
      };

      match joined {
        Some(Ok(JobOutcome { id, result: Ok(success) })) => self.succeed(id, success),
        Some(Ok(JobOutcome { id, result: Err(e) })) => {
          self.fail(id, e);
          if !self.options.keep_going && !stopping {
            info!("stopping after first failure");
            stopping = true;
          }
        }
        Some(Err(e)) => error!(error = %e, "build task failed"),
        None => break,
      }
    }

    let remaining: Vec<_> = self
      .states
      .iter()
      .filter(|(_, state)| !state.is_terminal())
      .map(|(&id, _)| id)
      .collect();
    for id in remaining {
      self.skip(id, None);
    }
  }

  fn job(&self, id: TransformerId) -> Option<Job> {
    let transformer = self.project.graph.transformer(id)?;
    let outputs = transformer
      .outputs
      .iter()
      .filter_map(|&out| Some((out, self.project.graph.artifact(out)?.path().to_path_buf())))
      .collect();
    Some(Job {
      commands: transformer.commands.clone(),
      outputs,
      root: self.project.root.clone(),
      fingerprinter: self.fingerprinter,
      kill_timeout: self.options.kill_timeout,
      echo_mode: self.options.echo_mode,
      dry_run: self.options.dry_run,
      builtins: Arc::clone(&self.ctx.builtins),
      cancel: self.ctx.cancel.clone(),
    })
  }

  fn succeed(&mut self, id: TransformerId, success: JobSuccess) {
    self.states.insert(id, TransformerState::Succeeded);
    self.finished += 1;
    self.executed.push(id);

    if !self.options.dry_run {
      for (artifact, fingerprint) in success.fingerprints {
        if let Some(artifact) = self.project.graph.artifact_mut(artifact) {
          artifact.recorded = Some(fingerprint);
        }
      }
      if let Some(transformer) = self.project.graph.transformer_mut(id) {
        transformer.last_run = Some(transformer.signature.clone());
        if !success.warnings.is_empty() {
          self
            .warnings
            .entry(transformer.product.clone())
            .or_default()
            .extend(success.warnings);
        }
      }
    }

    debug!(transformer = %id, "succeeded");
    self.emit(BuildEvent::Finished {
      transformer: id,
      description: self.describe(id),
      success: true,
      percentage: self.percentage(),
    });

    for dependent in self.dependents.get(&id).cloned().unwrap_or_default() {
      let Some(count) = self.waiting.get_mut(&dependent) else {
        continue;
      };
      *count = count.saturating_sub(1);
      if *count == 0 && self.states.get(&dependent) == Some(&TransformerState::Pending) {
        self.states.insert(dependent, TransformerState::Ready);
        let position = self.rank.get(&dependent).copied().unwrap_or(usize::MAX);
        self.ready.insert((position, dependent));
      }
    }
  }

  fn fail(&mut self, id: TransformerId, error: TransformerError) {
    self.states.insert(id, TransformerState::Failed);
    self.finished += 1;
    self.forget_run(id);

    let description = self.describe(id);
    if matches!(error, TransformerError::Interrupted { .. }) {
      warn!(transformer = %id, "{description}: interrupted");
    } else {
      error!(transformer = %id, error = %error, "{description} failed");
    }
    self.emit(BuildEvent::Finished {
      transformer: id,
      description: description.clone(),
      success: false,
      percentage: self.percentage(),
    });

    let rule = self
      .project
      .graph
      .transformer(id)
      .map(|t| t.rule.clone())
      .unwrap_or_else(|| "unknown".into());
    self.failures.push(TransformerFailure {
      transformer: id,
      rule,
      description,
      error,
    });

    // Skip everything that transitively depends on the failure.
    let mut stack = self.dependents.get(&id).cloned().unwrap_or_default();
    while let Some(dependent) = stack.pop() {
      if self.states.get(&dependent).is_some_and(|s| !s.is_terminal()) {
        self.skip(dependent, Some(id));
        stack.extend(self.dependents.get(&dependent).cloned().unwrap_or_default());
      }
    }
  }

  fn skip(&mut self, id: TransformerId, failed_ancestor: Option<TransformerId>) {
    self.states.insert(id, TransformerState::Skipped);
    self.finished += 1;
    self.forget_run(id);
    if let Some(&position) = self.rank.get(&id) {
      self.ready.remove(&(position, id));
    }

    let description = self.describe(id);
    match failed_ancestor {
      Some(ancestor) => warn!(transformer = %id, failed = %ancestor, "skipping {description}"),
      None => debug!(transformer = %id, "skipping {description}"),
    }
    self.emit(BuildEvent::Skipped {
      transformer: id,
      description: description.clone(),
      percentage: self.percentage(),
    });

    let rule = self
      .project
      .graph
      .transformer(id)
      .map(|t| t.rule.clone())
      .unwrap_or_else(|| "unknown".into());
    self.skipped.push(SkippedTransformer {
      transformer: id,
      rule,
      description,
      failed_ancestor,
    });
  }

  /// A transformer that did not complete must run again next time, even if
  /// its inputs get recorded as up to date by other transformers.
  fn forget_run(&mut self, id: TransformerId) {
    if self.options.dry_run {
      return;
    }
    if let Some(transformer) = self.project.graph.transformer_mut(id) {
      transformer.last_run = None;
    }
  }

  fn describe(&self, id: TransformerId) -> String {
    self
      .project
      .graph
      .transformer(id)
      .map(|t| t.describe())
      .unwrap_or_else(|| id.to_string())
  }

  fn percentage(&self) -> u8 {
    match self.states.len() {
      0 => 100,
      total => (self.finished * 100 / total).min(100) as u8,
    }
  }

  fn emit(&self, event: BuildEvent) {
    if let Some(events) = &self.ctx.events {
      // A dropped receiver only means nobody is listening.
      let _ = events.send(event);
    }
  }

  fn finish(self) -> BuildReport {
    let status = if self.cancelled || self.ctx.cancel.is_cancelled() {
      BuildStatus::Cancelled
    } else if self.failures.is_empty() {
      BuildStatus::Succeeded
    } else {
      BuildStatus::Failed
    };

    if !self.options.dry_run {
      let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
      let selected = &self.options.products;
      for product in &mut self.project.products {
        if selected.is_empty() || selected.contains(&product.name) {
          product.build_data.last_build = Some(now);
          product.build_data.warnings = self.warnings.get(&product.name).cloned().unwrap_or_default();
        }
      }
    }

    BuildReport {
      status,
      states: self.states,
      executed: self.executed,
      failures: self.failures,
      skipped: self.skipped,
    }
  }
}
