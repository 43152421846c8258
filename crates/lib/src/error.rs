//! Error types for the build engine.
//!
//! `BuildError` is the primary error carried inside build tasks. Failures
//! crossing a task boundary are reported once where they occur and collapse
//! into a [`FailedNode`], so dependents never duplicate the root diagnostic.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving, tracing, or building targets.
#[derive(Debug, Error)]
pub enum BuildError {
  /// I/O error while reading sources or writing artifacts/traces.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A package manifest could not be read or parsed.
  #[error("failed to load {path}: {message}")]
  Config { path: PathBuf, message: String },

  /// Cycle in the local import graph. Detected at import-parsing stage,
  /// before any compilation begins.
  #[error("import cycle detected involving: {}", chain.join(" -> "))]
  ImportCycle { chain: Vec<String> },

  /// Cycle in the package dependency graph.
  #[error("package dependency cycle involving: {0}")]
  PackageCycle(String),

  /// A dependency package named in a manifest could not be located.
  #[error("unknown dependency package: {0}")]
  UnknownPackage(String),

  /// A root module named in a manifest does not exist in its package.
  #[error("unknown module {module} in package {package}")]
  UnknownModule { module: String, package: String },

  /// A module's source file is missing.
  #[error("source file for module {module} not found: {path}")]
  MissingSource { module: String, path: PathBuf },

  /// A native artifact was requested for a module with no native stage.
  #[error("module {0} is pure and has no native artifacts")]
  PureModule(String),

  /// The external compiler exited nonzero, carrying its raw diagnostics.
  #[error("compilation of {module} failed (exit {code:?}):\n{diagnostic}")]
  Compiler {
    module: String,
    code: Option<i32>,
    diagnostic: String,
  },

  /// The external linker/archiver exited nonzero.
  #[error("linking {output} failed (exit {code:?}):\n{diagnostic}")]
  Link {
    output: PathBuf,
    code: Option<i32>,
    diagnostic: String,
  },

  /// The toolchain could not be invoked or probed at all.
  #[error("toolchain error: {0}")]
  Toolchain(String),

  /// A dependency this node awaited has failed. Secondary: the root cause
  /// was already reported by the failing node's own task.
  #[error(transparent)]
  Dependency(#[from] FailedNode),
}

impl BuildError {
  /// True for failures that merely propagate another node's failure.
  pub fn is_secondary(&self) -> bool {
    matches!(self, BuildError::Dependency(_))
  }
}

/// The cloneable failure value that crosses a target's task boundary.
///
/// Carries only the label of the node that failed; the underlying
/// diagnostic was logged exactly once where the failure happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("build of {0} failed")]
pub struct FailedNode(pub String);

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn import_cycle_lists_chain() {
    let err = BuildError::ImportCycle {
      chain: vec!["A".to_string(), "B".to_string(), "A".to_string()],
    };
    assert_eq!(err.to_string(), "import cycle detected involving: A -> B -> A");
  }

  #[test]
  fn dependency_failure_is_secondary() {
    let err = BuildError::from(FailedNode("Data.List:bin".to_string()));
    assert!(err.is_secondary());
    assert_eq!(err.to_string(), "build of Data.List:bin failed");

    let primary = BuildError::Toolchain("quillc not found".to_string());
    assert!(!primary.is_secondary());
  }
}
