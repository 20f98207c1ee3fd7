//! Implementation of the `kiln clean` command.
//!
//! Removes generated files of the selected products. Cleaning every product
//! also deletes the configuration's build data.

use std::time::Instant;

use anyhow::{Context, Result};

use kiln_lib::execute::Session;
use kiln_lib::lock::LockMode;

use crate::ProjectArgs;
use crate::output::{OutputFormat, format_duration, print_info, print_item, print_json, print_stat, print_success, symbols};

pub fn cmd_clean(args: &ProjectArgs, dry_run: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  let mut session = Session::open(&args.file, &args.session_options(), LockMode::Exclusive, "kiln clean")
    .with_context(|| format!("Failed to open project {}", args.file.display()))?;
  let removed = session.clean(&args.products, dry_run).context("Clean failed")?;
  let project = session.project();
  let paths: Vec<String> = removed.iter().map(|p| project.display_path(p)).collect();

  if output.is_json() {
    print_json(&serde_json::json!({ "dry_run": dry_run, "removed": paths }))?;
    return Ok(());
  }

  for path in &paths {
    print_item(symbols::REMOVE, path);
  }
  println!();
  if dry_run {
    print_info("Dry run - no changes made");
  } else {
    print_success("Clean complete!");
  }
  print_stat(if dry_run { "Would remove" } else { "Removed" }, &paths.len().to_string());
  print_stat("Duration", &format_duration(start.elapsed()));

  Ok(())
}
