mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiln_lib::consts::DEFAULT_CONFIGURATION;
use kiln_lib::execute::SessionOptions;

use output::OutputFormat;

/// kiln - incremental build-graph engine
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log output (-v for info, -vv for debug)
  #[arg(short, long, action = ArgAction::Count, global = true)]
  verbose: u8,

  /// Print machine-readable JSON instead of text
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Commands,
}

/// Arguments shared by every command that opens a project.
#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
  /// Resolved project description
  #[arg(default_value = "project.json")]
  pub file: PathBuf,

  /// Build configuration name
  #[arg(short, long = "config", default_value = DEFAULT_CONFIGURATION)]
  pub configuration: String,

  /// Build root (default: $KILN_BUILD_DIR or <project root>/.kiln)
  #[arg(long)]
  pub build_root: Option<PathBuf>,

  /// Restrict to these products (repeatable; default: all)
  #[arg(short, long = "product")]
  pub products: Vec<String>,
}

impl ProjectArgs {
  pub fn session_options(&self) -> SessionOptions {
    SessionOptions {
      configuration: self.configuration.clone(),
      build_root: self.build_root.clone(),
    }
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Build the outdated parts of a project
  Build {
    #[command(flatten)]
    project: ProjectArgs,

    /// Maximum number of transformers running at once (default: $KILN_JOBS or CPU count)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Stop dispatching work after the first failure
    #[arg(long)]
    stop_on_error: bool,

    /// Show what would run without running it
    #[arg(long)]
    dry_run: bool,

    /// Detect changes by modification time and size only
    #[arg(long)]
    timestamps: bool,

    /// Only rescan these source files (repeatable; relative to the project root)
    #[arg(long = "changed-file")]
    changed_files: Vec<PathBuf>,

    /// Directory searched for `#include <...>` files (repeatable; relative to the project root)
    #[arg(short = 'I', long = "include-path")]
    include_paths: Vec<PathBuf>,

    /// Echo full command lines instead of descriptions
    #[arg(long)]
    echo_commands: bool,
  },

  /// List transformers that would run on the next build
  Status {
    #[command(flatten)]
    project: ProjectArgs,

    /// Detect changes by modification time and size only
    #[arg(long)]
    timestamps: bool,
  },

  /// Check the build graph for cycles and inconsistencies
  Check {
    #[command(flatten)]
    project: ProjectArgs,
  },

  /// Remove generated files and build data
  Clean {
    #[command(flatten)]
    project: ProjectArgs,

    /// Show what would be removed without removing it
    #[arg(long)]
    dry_run: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  let output = if cli.json { OutputFormat::Json } else { OutputFormat::Text };

  match cli.command {
    Commands::Build {
      project,
      jobs,
      stop_on_error,
      dry_run,
      timestamps,
      changed_files,
      include_paths,
      echo_commands,
    } => cmd::cmd_build(
      cmd::BuildArgs {
        project,
        jobs,
        stop_on_error,
        dry_run,
        timestamps,
        changed_files,
        include_paths,
        echo_commands,
      },
      output,
    ),
    Commands::Status { project, timestamps } => cmd::cmd_status(&project, timestamps, output),
    Commands::Check { project } => cmd::cmd_check(&project, cli.verbose > 0, output),
    Commands::Clean { project, dry_run } => cmd::cmd_clean(&project, dry_run, output),
  }
}

/// `RUST_LOG` wins; otherwise warnings only, raised by `-v`.
fn init_logging(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .without_time()
    .init();
}
