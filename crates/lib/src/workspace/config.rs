//! Package manifest loading.
//!
//! Each package directory carries a `quill.toml` describing the package:
//! directories, module roots, dependency package names, external libraries,
//! sub-libraries, and per-module flags. The richer configuration language for
//! authoring custom build steps is out of scope; this loader covers exactly
//! the surface the engine consumes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::BuildError;

/// Manifest file name expected in every package directory.
pub const MANIFEST_FILE: &str = "quill.toml";

/// Deserialized `quill.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageConfig {
  /// Package name; also the directory name dependency solving looks for.
  pub name: String,

  /// Source directory, relative to the package root.
  #[serde(default = "default_src_dir")]
  pub src_dir: PathBuf,

  /// Output directory for all derived artifacts, relative to the root.
  #[serde(default = "default_out_dir")]
  pub out_dir: PathBuf,

  /// Root module names. Empty means every scanned module is a root.
  #[serde(default)]
  pub roots: Vec<String>,

  /// Names of dependency packages, solved against sibling directories.
  #[serde(default)]
  pub deps: Vec<String>,

  /// Extra compiler arguments applied to every module of the package.
  #[serde(default)]
  pub extra_compile_args: Vec<String>,

  /// Extra linker arguments for the package's shared libraries.
  #[serde(default)]
  pub extra_link_args: Vec<String>,

  /// Catch-all prerequisite files (e.g. generated sources), relative to the
  /// package root. Their traces mix into every member module's trace.
  #[serde(default)]
  pub extra_deps: Vec<PathBuf>,

  /// Modules with no native stage: no C output, no object, no dynlib.
  #[serde(default)]
  pub pure_modules: Vec<String>,

  /// Modules whose flagged import chain is preloaded as shared libraries.
  #[serde(default)]
  pub precompile_modules: Vec<String>,

  /// Additional compiler arguments for specific modules.
  #[serde(default)]
  pub module_args: HashMap<String, Vec<String>>,

  /// External (prebuilt) libraries linked into native artifacts.
  #[serde(default, rename = "ext_lib")]
  pub ext_libs: Vec<ExtLibConfig>,

  /// Named sub-libraries with their own root sets.
  #[serde(default, rename = "lib")]
  pub libs: Vec<LibConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtLibConfig {
  pub name: String,
  /// Explicit path to the library file. Without it the library is linked
  /// by name (`-l<name>`).
  #[serde(default)]
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LibConfig {
  pub name: String,
  /// Member root modules; empty means the package's own roots.
  #[serde(default)]
  pub roots: Vec<String>,
}

fn default_src_dir() -> PathBuf {
  PathBuf::from(".")
}

fn default_out_dir() -> PathBuf {
  PathBuf::from("build")
}

/// Load and parse the manifest of the package rooted at `dir`.
pub fn load_config(dir: &Path) -> Result<PackageConfig, BuildError> {
  let path = dir.join(MANIFEST_FILE);
  let content = fs::read_to_string(&path).map_err(|e| BuildError::Config {
    path: path.clone(),
    message: e.to_string(),
  })?;
  toml::from_str(&content).map_err(|e| BuildError::Config {
    path,
    message: e.to_string(),
  })
}
