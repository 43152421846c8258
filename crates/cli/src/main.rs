//! quill - command-line driver for the Quill build engine.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;

/// quill - incremental builds for Quill packages
#[derive(Parser)]
#[command(name = "quill")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Package directory (defaults to the current directory)
  #[arg(short, long, global = true, default_value = ".")]
  dir: PathBuf,

  /// Maximum concurrent compiler processes
  #[arg(short = 'j', long, global = true)]
  jobs: Option<usize>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build the package, or a selected set of its modules
  Build {
    /// Module names to build (default: the package roots)
    modules: Vec<String>,
  },

  /// Print module artifact paths and search directories
  Paths {
    /// Module names to report on (default: the package roots)
    modules: Vec<String>,

    /// Print paths without building first
    #[arg(long)]
    no_build: bool,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let cli = Cli::parse();

  match cli.command {
    Commands::Build { modules } => cmd::cmd_build(&cli.dir, &modules, cli.jobs),
    Commands::Paths { modules, no_build } => cmd::cmd_paths(&cli.dir, &modules, cli.jobs, no_build),
  }
}
