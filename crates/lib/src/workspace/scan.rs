//! Source tree scanning.
//!
//! Maps a package's source directory onto dotted module names: `A/B.qu`
//! becomes module `A.B`. Scanning happens once per package load; module
//! entities are immutable afterwards for the whole run.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::BuildError;

/// Quill source file extension.
pub const SOURCE_EXT: &str = "qu";

/// Scan `src_dir` for source files, returning `(module name, source path)`
/// pairs sorted by name for determinism. A missing directory scans empty.
pub fn scan_modules(src_dir: &Path) -> Result<Vec<(String, PathBuf)>, BuildError> {
  if !src_dir.is_dir() {
    return Ok(Vec::new());
  }

  let mut found = Vec::new();
  for entry in WalkDir::new(src_dir).sort_by_file_name() {
    let entry = entry.map_err(|e| BuildError::Config {
      path: src_dir.to_path_buf(),
      message: format!("failed to scan source tree: {e}"),
    })?;
    let path = entry.path();
    if !entry.file_type().is_file() || path.extension().and_then(|s| s.to_str()) != Some(SOURCE_EXT) {
      continue;
    }
    if let Some(name) = module_name_of(src_dir, path) {
      found.push((name, path.to_path_buf()));
    }
  }
  found.sort();
  Ok(found)
}

/// Derive the dotted module name for a source file under `src_dir`.
/// Returns `None` for paths with non-UTF-8 components.
fn module_name_of(src_dir: &Path, path: &Path) -> Option<String> {
  let rel = path.strip_prefix(src_dir).ok()?.with_extension("");
  let mut parts = Vec::new();
  for component in rel.components() {
    parts.push(component.as_os_str().to_str()?.to_string());
  }
  Some(parts.join("."))
}

/// Relative path (without extension) for a dotted module name.
pub fn module_rel_path(name: &str) -> PathBuf {
  name.split('.').collect()
}
