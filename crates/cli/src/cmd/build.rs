//! Implementation of the `kiln build` command.
//!
//! Loads the project, runs every outdated transformer and saves the build
//! data. Ctrl-C cancels the build; running processes are terminated and the
//! build data is still saved.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::debug;

use kiln_lib::execute::{
  BuildContext, BuildEvent, BuildOptions, BuildReport, BuildStatus, BuiltinRegistry, CancellationToken, EchoMode,
  Session, default_jobs,
};
use kiln_lib::fingerprint::FingerprintMode;
use kiln_lib::lock::LockMode;
use kiln_lib::scanner::ScannerRegistry;

use crate::ProjectArgs;
use crate::output::{
  OutputFormat, format_duration, print_error, print_info, print_item, print_json, print_progress, print_stat,
  print_success, print_warning, symbols,
};

pub struct BuildArgs {
  pub project: ProjectArgs,
  pub jobs: Option<usize>,
  pub stop_on_error: bool,
  pub dry_run: bool,
  pub timestamps: bool,
  pub changed_files: Vec<PathBuf>,
  pub include_paths: Vec<PathBuf>,
  pub echo_commands: bool,
}

/// Execute the build command.
///
/// Exits with an error when any transformer failed or the build was
/// cancelled.
pub fn cmd_build(args: BuildArgs, output: OutputFormat) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(build(args, output))
}

async fn build(args: BuildArgs, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  let mut session = Session::open(
    &args.project.file,
    &args.project.session_options(),
    LockMode::Exclusive,
    "kiln build",
  )
  .with_context(|| format!("Failed to open project {}", args.project.file.display()))?;

  let options = BuildOptions {
    jobs: args.jobs.filter(|&j| j > 0).unwrap_or_else(default_jobs),
    keep_going: !args.stop_on_error,
    dry_run: args.dry_run,
    fingerprint_mode: if args.timestamps {
      FingerprintMode::Timestamp
    } else {
      FingerprintMode::Content
    },
    changed_files: args
      .changed_files
      .iter()
      .map(|p| resolve_changed_file(&session.project().root, p))
      .collect(),
    echo_mode: if args.echo_commands {
      EchoMode::CommandLine
    } else {
      EchoMode::Description
    },
    products: args.project.products.clone(),
    ..BuildOptions::default()
  };
  debug!(jobs = options.jobs, keep_going = options.keep_going, "build options");

  let cancel = CancellationToken::new();
  let (events, mut progress) = mpsc::unbounded_channel();
  let ctx = BuildContext {
    builtins: Arc::new(BuiltinRegistry::with_defaults()),
    scanners: Arc::new(ScannerRegistry::with_defaults().with_search_paths(args.include_paths)),
    cancel: cancel.clone(),
    events: (!output.is_json()).then_some(events),
  };

  let interrupt = tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      print_warning("Interrupted, stopping build");
      cancel.cancel();
    }
  });
  let printer = tokio::spawn(async move {
    while let Some(event) = progress.recv().await {
      print_event(&event);
    }
  });

  let result = session.build(&options, ctx).await;
  interrupt.abort();
  // The channel closes once the build has dropped its sender.
  let _ = printer.await;
  let report = result.context("Build failed")?;

  if output.is_json() {
    print_json(&report_json(&session, &report, start))?;
  } else {
    print_report(&session, &report, args.dry_run, start);
  }

  match report.status {
    BuildStatus::Succeeded => Ok(()),
    BuildStatus::Failed => bail!("Build failed: {} transformer(s) failed", report.failures.len()),
    BuildStatus::Cancelled => bail!("Build cancelled"),
  }
}

fn resolve_changed_file(root: &Path, path: &Path) -> PathBuf {
  let path = if path.is_absolute() {
    path.to_path_buf()
  } else {
    root.join(path)
  };
  dunce::canonicalize(&path).unwrap_or(path)
}

fn print_event(event: &BuildEvent) {
  match event {
    BuildEvent::Started {
      description,
      percentage,
      ..
    } => print_progress(*percentage, description),
    BuildEvent::Finished {
      description,
      success: false,
      percentage,
      ..
    } => print_progress(*percentage, &format!("{} {description} failed", symbols::ERROR)),
    BuildEvent::Finished { .. } | BuildEvent::Skipped { .. } => {}
  }
}

fn print_report(session: &Session, report: &BuildReport, dry_run: bool, start: Instant) {
  let project = session.project();

  for failure in &report.failures {
    print_error(&format!("{}: {}", failure.description, failure.error));
    if let Some(command) = failure.error.command() {
      print_item(symbols::ARROW, command);
    }
    if let Some(stderr) = failure.error.stderr() {
      for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        eprintln!("    {line}");
      }
    }
  }

  for product in &project.products {
    for warning in &product.build_data.warnings {
      print_warning(&format!("{}: {warning}", product.name));
    }
  }

  println!();
  match report.status {
    BuildStatus::Succeeded if report.executed.is_empty() => print_info("Nothing to do"),
    BuildStatus::Succeeded if dry_run => print_info("Dry run - nothing was executed"),
    BuildStatus::Succeeded => print_success("Build complete!"),
    BuildStatus::Failed => print_error("Build failed"),
    BuildStatus::Cancelled => print_warning("Build cancelled"),
  }

  let label = if dry_run { "Would run" } else { "Executed" };
  print_stat(label, &report.executed.len().to_string());
  if !report.failures.is_empty() {
    print_stat("Failed", &report.failures.len().to_string());
  }
  if !report.skipped.is_empty() {
    print_stat("Skipped", &report.skipped.len().to_string());
  }
  print_stat("Duration", &format_duration(start.elapsed()));
}

fn report_json(session: &Session, report: &BuildReport, start: Instant) -> serde_json::Value {
  let graph = &session.project().graph;
  let rule = |id| graph.transformer(id).map(|t| t.rule.to_string()).unwrap_or_default();

  let executed: Vec<_> = report
    .executed
    .iter()
    .map(|&id| serde_json::json!({ "id": id.to_string(), "rule": rule(id) }))
    .collect();
  let failures: Vec<_> = report
    .failures
    .iter()
    .map(|f| {
      serde_json::json!({
        "id": f.transformer.to_string(),
        "rule": f.rule.to_string(),
        "description": f.description,
        "error": f.error.to_string(),
        "command": f.error.command(),
        "stderr": f.error.stderr(),
      })
    })
    .collect();
  let skipped: Vec<_> = report
    .skipped
    .iter()
    .map(|s| {
      serde_json::json!({
        "id": s.transformer.to_string(),
        "rule": s.rule.to_string(),
        "failed_ancestor": s.failed_ancestor.map(|id| id.to_string()),
      })
    })
    .collect();

  serde_json::json!({
    "status": report.status,
    "executed": executed,
    "failures": failures,
    "skipped": skipped,
    "duration_ms": start.elapsed().as_millis() as u64,
  })
}
