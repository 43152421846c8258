//! Implementation of the `quill paths` command.
//!
//! Reports where module artifacts live and which directories the compiler
//! searches, for downstream tooling that wants to load or link against
//! built modules. By default the modules are built first so every printed
//! path exists.

use std::path::Path;

use anyhow::{Context, Result};
use quill_lib::Facet;

use super::{load_context, select_modules};

/// Execute the paths command.
pub fn cmd_paths(dir: &Path, modules: &[String], jobs: Option<usize>, no_build: bool) -> Result<()> {
  let (ctx, root) = load_context(dir, jobs)?;
  let selected = select_modules(&ctx, root, modules)?;

  if !no_build {
    let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
    if rt.block_on(ctx.build_modules(&selected)).is_err() {
      eprintln!("Build failed.");
      std::process::exit(1);
    }
  }

  for id in selected {
    let module = ctx.ws.module(id);
    let mut facets = vec![Facet::Bin, Facet::Iface];
    if !module.pure {
      facets.extend([Facet::C, Facet::Obj, Facet::Dynlib]);
    }
    for facet in facets {
      println!("{}\t{facet}\t{}", module.name, ctx.ws.artifact_path(id, facet).display());
    }
  }

  let (out_dirs, src_dirs) = ctx.ws.search_dirs(root);
  let out_path = std::env::join_paths(out_dirs).context("output directory not joinable")?;
  let src_path = std::env::join_paths(src_dirs).context("source directory not joinable")?;
  println!("{}", out_path.to_string_lossy());
  println!("{}", src_path.to_string_lossy());
  Ok(())
}
