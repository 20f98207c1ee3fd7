//! Implementation of the `kiln check` command.

use anyhow::{Context, Result};

use kiln_lib::execute::Session;
use kiln_lib::lock::LockMode;

use crate::ProjectArgs;
use crate::output::{OutputFormat, print_item, print_json, print_success, symbols};

/// Load the project, run the graph checks and report each product's build
/// order. The order is printed only when `verbose` is set.
pub fn cmd_check(args: &ProjectArgs, verbose: bool, output: OutputFormat) -> Result<()> {
  let session = Session::open(&args.file, &args.session_options(), LockMode::Shared, "kiln check")
    .with_context(|| format!("Failed to open project {}", args.file.display()))?;
  let report = session.check().context("Check failed")?;
  let project = session.project();

  let selected = report
    .products
    .iter()
    .filter(|(name, _)| args.products.is_empty() || args.products.contains(name));

  if output.is_json() {
    let products: Vec<_> = selected
      .map(|(name, order)| {
        let order: Vec<_> = order.iter().map(|p| project.display_path(p)).collect();
        serde_json::json!({ "name": name, "order": order })
      })
      .collect();
    print_json(&serde_json::json!({ "ok": true, "products": products }))?;
    return Ok(());
  }

  print_success(&format!(
    "No problems found in {} product(s), {} artifact(s), {} transformer(s)",
    report.products.len(),
    project.graph.artifact_count(),
    project.graph.transformer_count()
  ));

  if verbose {
    for (name, order) in selected {
      println!();
      println!("{name}:");
      for path in order {
        print_item(symbols::ARROW, &project.display_path(path));
      }
    }
  }

  Ok(())
}
