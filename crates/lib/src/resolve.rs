//! Import resolution over module source headers.
//!
//! A module's imports are the `import Some.Name` lines in its source
//! header, read before any compilation happens. Resolution is recursive
//! and memoized per module; a cycle among source headers is a hard
//! failure reported with the full chain of names.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::BuildError;
use crate::workspace::{ModuleId, Workspace};

/// Resolved imports of one module.
#[derive(Debug, Default)]
pub struct Resolved {
  /// Modules named directly in the header, in source order.
  pub direct: Vec<ModuleId>,
  /// Transitive import closure (direct imports included, self excluded),
  /// dependency-first and deduplicated.
  pub transitive: Vec<ModuleId>,
}

/// Memoized recursive import resolver.
///
/// Source headers do not change during a run, so resolved entries are
/// shared across every build task that asks.
#[derive(Default)]
pub struct Resolver {
  cache: Mutex<HashMap<ModuleId, Arc<Resolved>>>,
}

impl Resolver {
  pub fn new() -> Self {
    Self::default()
  }

  /// Resolve the imports of `id`, following headers transitively.
  pub async fn resolve(&self, ws: &Workspace, id: ModuleId) -> Result<Arc<Resolved>, BuildError> {
    let mut visiting = Vec::new();
    self.resolve_inner(ws, id, &mut visiting).await
  }

  fn resolve_inner<'a>(
    &'a self,
    ws: &'a Workspace,
    id: ModuleId,
    visiting: &'a mut Vec<ModuleId>,
  ) -> Pin<Box<dyn Future<Output = Result<Arc<Resolved>, BuildError>> + Send + 'a>> {
    Box::pin(async move {
      if let Some(hit) = self.cache.lock().expect("resolver cache poisoned").get(&id) {
        return Ok(hit.clone());
      }
      if let Some(pos) = visiting.iter().position(|v| *v == id) {
        let mut chain: Vec<String> = visiting[pos..].iter().map(|v| ws.module(*v).name.clone()).collect();
        chain.push(ws.module(id).name.clone());
        return Err(BuildError::ImportCycle { chain });
      }

      let module = ws.module(id);
      let source = match tokio::fs::read_to_string(&module.src_path).await {
        Ok(source) => source,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
          return Err(BuildError::MissingSource {
            module: module.name.clone(),
            path: module.src_path.clone(),
          });
        }
        Err(err) => return Err(err.into()),
      };

      let mut direct = Vec::new();
      for name in parse_imports(&source) {
        match ws.find_module(name) {
          Some(dep) if dep != id => direct.push(dep),
          Some(_) => {}
          // Names outside the workspace resolve to nothing; the compiler
          // finds them on its own search path or reports them itself.
          None => debug!(module = %module.name, import = name, "import not in workspace, skipping"),
        }
      }

      visiting.push(id);
      let mut transitive = Vec::new();
      for dep in &direct {
        let resolved = self.resolve_inner(ws, *dep, &mut *visiting).await?;
        for m in &resolved.transitive {
          if !transitive.contains(m) {
            transitive.push(*m);
          }
        }
        if !transitive.contains(dep) {
          transitive.push(*dep);
        }
      }
      visiting.pop();

      let resolved = Arc::new(Resolved { direct, transitive });
      self
        .cache
        .lock()
        .expect("resolver cache poisoned")
        .insert(id, resolved.clone());
      Ok(resolved)
    })
  }
}

/// Extract the import names from a source header.
///
/// Imports must appear before the first non-import, non-comment line;
/// anything after that is body text and never scanned.
pub fn parse_imports(source: &str) -> Vec<&str> {
  let mut imports = Vec::new();
  for line in source.lines() {
    let line = line.trim();
    if line.is_empty() || line.starts_with("--") {
      continue;
    }
    match line.strip_prefix("import ") {
      Some(rest) => {
        if let Some(name) = rest.split_whitespace().next() {
          imports.push(name);
        }
      }
      None => break,
    }
  }
  imports
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::workspace::config::MANIFEST_FILE;
  use tempfile::TempDir;

  #[test]
  fn parses_header_imports_only() {
    let source = "-- a comment\nimport Data.List\nimport Prelude\n\ndef main := ()\nimport NotAnImport\n";
    assert_eq!(parse_imports(source), vec!["Data.List", "Prelude"]);
  }

  fn workspace_with(sources: &[(&str, &str)]) -> (TempDir, Workspace) {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("pkg");
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(dir.join(MANIFEST_FILE), "name = \"pkg\"\nsrc_dir = \"src\"\n").unwrap();
    for (rel, content) in sources {
      let path = dir.join("src").join(rel);
      std::fs::create_dir_all(path.parent().unwrap()).unwrap();
      std::fs::write(path, content).unwrap();
    }
    let (ws, _) = Workspace::load(&dir).unwrap();
    (temp, ws)
  }

  #[tokio::test]
  async fn resolves_transitive_imports_dependency_first() {
    let (_temp, ws) = workspace_with(&[
      ("A.qu", "import B\n"),
      ("B.qu", "import C\n"),
      ("C.qu", ""),
    ]);
    let resolver = Resolver::new();
    let a = ws.find_module("A").unwrap();
    let b = ws.find_module("B").unwrap();
    let c = ws.find_module("C").unwrap();

    let resolved = resolver.resolve(&ws, a).await.unwrap();
    assert_eq!(resolved.direct, vec![b]);
    assert_eq!(resolved.transitive, vec![c, b]);
  }

  #[tokio::test]
  async fn import_cycle_reports_the_chain() {
    let (_temp, ws) = workspace_with(&[
      ("A.qu", "import B\n"),
      ("B.qu", "import C\n"),
      ("C.qu", "import A\n"),
    ]);
    let resolver = Resolver::new();
    let a = ws.find_module("A").unwrap();

    let err = resolver.resolve(&ws, a).await.unwrap_err();
    match err {
      BuildError::ImportCycle { chain } => {
        assert_eq!(chain, vec!["A", "B", "C", "A"]);
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[tokio::test]
  async fn unknown_imports_are_skipped() {
    let (_temp, ws) = workspace_with(&[("A.qu", "import Elsewhere.Thing\n")]);
    let resolver = Resolver::new();
    let a = ws.find_module("A").unwrap();

    let resolved = resolver.resolve(&ws, a).await.unwrap();
    assert!(resolved.direct.is_empty());
    assert!(resolved.transitive.is_empty());
  }

  #[tokio::test]
  async fn missing_source_is_reported_by_module_name() {
    let (temp, ws) = workspace_with(&[("A.qu", "")]);
    std::fs::remove_file(temp.path().join("pkg/src/A.qu")).unwrap();
    let resolver = Resolver::new();
    let a = ws.find_module("A").unwrap();

    let err = resolver.resolve(&ws, a).await.unwrap_err();
    assert!(matches!(err, BuildError::MissingSource { module, .. } if module == "A"));
  }
}
