//! Status command implementation.
//!
//! Lists the transformers the next build would run, and generated files left
//! over from an earlier project description, without building anything.

use anyhow::{Context, Result};

use kiln_lib::execute::{BuildOptions, Session};
use kiln_lib::fingerprint::FingerprintMode;
use kiln_lib::lock::LockMode;

use crate::ProjectArgs;
use crate::output::{
  OutputFormat, format_timestamp, print_info, print_item, print_json, print_stat, print_success, symbols,
};

pub fn cmd_status(args: &ProjectArgs, timestamps: bool, output: OutputFormat) -> Result<()> {
  let session = Session::open(&args.file, &args.session_options(), LockMode::Shared, "kiln status")
    .with_context(|| format!("Failed to open project {}", args.file.display()))?;

  let options = BuildOptions {
    fingerprint_mode: if timestamps {
      FingerprintMode::Timestamp
    } else {
      FingerprintMode::Content
    },
    products: args.products.clone(),
    ..BuildOptions::default()
  };
  let status = session.status(&options).context("Failed to compute status")?;
  let project = session.project();

  if output.is_json() {
    let outdated: Vec<_> = status
      .outdated
      .iter()
      .map(|t| {
        serde_json::json!({
          "id": t.id.to_string(),
          "rule": t.rule.to_string(),
          "product": t.product,
          "description": t.description,
          "outputs": t.outputs,
        })
      })
      .collect();
    let stale: Vec<_> = status.stale.iter().map(|p| project.display_path(p)).collect();
    let products: Vec<_> = project
      .products
      .iter()
      .map(|p| serde_json::json!({ "name": p.name, "last_build": p.build_data.last_build }))
      .collect();
    print_json(&serde_json::json!({ "outdated": outdated, "stale": stale, "products": products }))?;
    return Ok(());
  }

  for product in &project.products {
    let last = product
      .build_data
      .last_build
      .map(format_timestamp)
      .unwrap_or_else(|| "never".to_string());
    print_stat(&format!("{} last built", product.name), &last);
  }
  println!();

  if status.outdated.is_empty() && status.stale.is_empty() {
    print_success("Up to date");
    return Ok(());
  }

  if !status.outdated.is_empty() {
    print_info(&format!("{} transformer(s) out of date", status.outdated.len()));
    for t in &status.outdated {
      print_item(
        symbols::MODIFY,
        &format!("{} [{}] {}", t.outputs.join(" "), t.product, t.description),
      );
    }
  }

  if !status.stale.is_empty() {
    print_info(&format!("{} stale file(s) will be removed", status.stale.len()));
    for path in &status.stale {
      print_item(symbols::REMOVE, &project.display_path(path));
    }
  }

  Ok(())
}
