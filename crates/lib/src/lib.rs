//! quill-lib: Core types and logic for the Quill build engine
//!
//! This crate provides the fundamental pieces of an incremental build:
//! - `Trace`: content fingerprints deciding what is stale
//! - `Target` / `ActiveTarget`: lazy build recipes and their running tasks
//! - `BuildStore`: the per-run memoization table keyed by entity and facet
//! - `Workspace`: the loaded package and module arenas
//! - `BuildContext`: one build run over a workspace and a toolchain

pub mod build;
pub mod error;
pub mod resolve;
pub mod store;
pub mod target;
pub mod toolchain;
pub mod trace;
pub mod workspace;

pub use build::{BuildConfig, BuildContext, ModuleArtifacts, PackageArtifact};
pub use error::{BuildError, FailedNode};
pub use store::{BuildKey, BuildStore, Facet};
pub use target::{ActiveTarget, Target};
pub use toolchain::{CompileSpec, ProcessToolchain, ToolFuture, Toolchain};
pub use trace::Trace;
pub use workspace::{Module, ModuleId, Package, PackageId, Workspace};
