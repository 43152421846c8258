//! The build engine: context, scheduling, and the artifact pipeline.
//!
//! Everything here runs on top of the memoizing [`BuildStore`]: fetch
//! functions register targets under canonical keys, targets run as tokio
//! tasks, and compiler invocations are throttled by one semaphore so that
//! graph bookkeeping never waits on process slots.

pub mod module;
pub mod package;

use std::sync::Arc;

use tokio::sync::{OnceCell, Semaphore};
use tracing::{info, instrument};

use crate::error::BuildError;
use crate::resolve::Resolver;
use crate::store::BuildStore;
use crate::toolchain::Toolchain;
use crate::trace::Trace;
use crate::workspace::{ModuleId, PackageId, Workspace};

pub use module::ModuleArtifacts;
pub use package::PackageArtifact;

/// Tunables for one build run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
  /// Maximum concurrent toolchain processes.
  pub parallelism: usize,
}

impl Default for BuildConfig {
  fn default() -> Self {
    let parallelism = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    BuildConfig { parallelism }
  }
}

/// Shared state of one build run. Cheap to clone via [`Arc`] into every
/// spawned target task.
pub struct BuildContext {
  pub ws: Arc<Workspace>,
  pub store: BuildStore,
  pub toolchain: Arc<dyn Toolchain>,
  pub resolver: Resolver,
  /// Gates toolchain subprocesses only; target bookkeeping never holds a permit.
  pub permits: Arc<Semaphore>,
  toolchain_trace: OnceCell<Trace>,
}

impl BuildContext {
  pub fn new(ws: Arc<Workspace>, toolchain: Arc<dyn Toolchain>, config: BuildConfig) -> Arc<Self> {
    Arc::new(BuildContext {
      ws,
      store: BuildStore::new(),
      toolchain,
      resolver: Resolver::new(),
      permits: Arc::new(Semaphore::new(config.parallelism.max(1))),
      toolchain_trace: OnceCell::new(),
    })
  }

  /// Trace of the toolchain version, probed once per run and mixed into
  /// every module trace so that a compiler upgrade stales prior artifacts.
  pub async fn toolchain_trace(&self) -> Result<Trace, BuildError> {
    self
      .toolchain_trace
      .get_or_try_init(|| async {
        let version = self.toolchain.version().await?;
        Ok(Trace::of_bytes(version.as_bytes()))
      })
      .await
      .copied()
  }

  /// Build a whole package: its root module closure plus its libraries.
  #[instrument(skip(self, id), fields(package = %self.ws.package(id).name))]
  pub async fn build_package(self: &Arc<Self>, id: PackageId) -> Result<(), BuildError> {
    let target = package::fetch_package(self, id).await;
    let (artifact, trace) = target.materialize().await?;
    info!(package = %self.ws.package(id).name, modules = artifact.modules.len(), %trace, "package up to date");
    Ok(())
  }

  /// Build a selected set of modules (binary facet), draining every branch
  /// before reporting the first failure.
  pub async fn build_modules(self: &Arc<Self>, modules: &[ModuleId]) -> Result<(), BuildError> {
    let mut handles = Vec::with_capacity(modules.len());
    for id in modules {
      handles.push(module::fetch_module_bin(self, *id).await);
    }
    let mut first_err = None;
    for handle in &handles {
      if let Err(err) = handle.materialize().await
        && first_err.is_none()
      {
        first_err = Some(err);
      }
    }
    match first_err {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}
