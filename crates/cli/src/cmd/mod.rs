mod build;
mod paths;

pub use build::cmd_build;
pub use paths::cmd_paths;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use quill_lib::{BuildConfig, BuildContext, ModuleId, PackageId, ProcessToolchain, Workspace};

/// Load the workspace rooted at `dir` and prepare a build context for it.
fn load_context(dir: &Path, jobs: Option<usize>) -> Result<(Arc<BuildContext>, PackageId)> {
  let (ws, root) = Workspace::load(dir)?;
  let mut config = BuildConfig::default();
  if let Some(jobs) = jobs {
    config.parallelism = jobs;
  }
  let ctx = BuildContext::new(Arc::new(ws), Arc::new(ProcessToolchain::from_env()), config);
  Ok((ctx, root))
}

/// Resolve command-line module names, defaulting to the package roots.
fn select_modules(ctx: &BuildContext, root: PackageId, names: &[String]) -> Result<Vec<ModuleId>> {
  if names.is_empty() {
    return Ok(ctx.ws.root_modules(root));
  }
  names
    .iter()
    .map(|name| {
      ctx
        .ws
        .find_module(name)
        .ok_or_else(|| anyhow!("unknown module: {name}"))
    })
    .collect()
}
