//! Implementation of the `quill build` command.
//!
//! Builds the package rooted at the given directory, or a selected set of
//! its modules. Per-node diagnostics are reported by the engine as the
//! failures happen; this command only summarizes the outcome.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use tracing::debug;

use super::{load_context, select_modules};

/// Execute the build command.
///
/// With no module arguments, builds the whole package (root closure plus
/// libraries). With module names, builds exactly those modules and their
/// import closures.
pub fn cmd_build(dir: &Path, modules: &[String], jobs: Option<usize>) -> Result<()> {
  let (ctx, root) = load_context(dir, jobs)?;
  debug!(dir = %dir.display(), package = %ctx.ws.package(root).name, "workspace loaded");
  let selected = if modules.is_empty() {
    None
  } else {
    Some(select_modules(&ctx, root, modules)?)
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = rt.block_on(async {
    match &selected {
      Some(mods) => ctx.build_modules(mods).await,
      None => ctx.build_package(root).await,
    }
  });

  match result {
    Ok(()) => {
      println!("{} Build complete", "✓".green());
      Ok(())
    }
    Err(_) => {
      // Every primary diagnostic was already printed by its failing node.
      eprintln!("{} Build failed.", "✗".red());
      std::process::exit(1);
    }
  }
}
