//! Process-scoped memoization of launched targets.
//!
//! The [`BuildStore`] is the single deduplication point of the engine: every
//! recursive fetch of module facets, packages, libraries, and extra-dep
//! nodes routes through [`BuildStore::rec_build`], so an entity reachable through
//! many paths is built exactly once per run. The store lives for one
//! top-level build invocation and is discarded with it; nothing here is
//! global or persisted.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use crate::error::BuildError;
use crate::target::{ActiveTarget, Target};
use crate::workspace::{ModuleId, PackageId};

/// A named kind of artifact derivable from a module.
///
/// The facet set is fixed and small, so a closed enum rather than any open
/// registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
  /// Binary-compiled module (`.qo`).
  Bin,
  /// Interface export (`.qi`).
  Iface,
  /// Intermediate C output (`.c`).
  C,
  /// Native object compiled from the C output (`.o`).
  Obj,
  /// Per-module shared library with the module's transitive objects.
  Dynlib,
}

impl std::fmt::Display for Facet {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Facet::Bin => "bin",
      Facet::Iface => "iface",
      Facet::C => "c",
      Facet::Obj => "obj",
      Facet::Dynlib => "dynlib",
    };
    write!(f, "{name}")
  }
}

/// Canonical memoization key: entity reference plus facet/artifact kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BuildKey {
  /// One facet of one module.
  Module(ModuleId, Facet),
  /// A whole package (its module map plus its libraries).
  Package(PackageId),
  /// A named static archive within a package.
  StaticLib(PackageId, String),
  /// A named shared library within a package.
  SharedLib(PackageId, String),
  /// A package's catch-all extra-dep prerequisite.
  ExtraDep(PackageId),
}

type AnyActive = Box<dyn Any + Send + Sync>;

/// Memoization table from [`BuildKey`] to launched target.
///
/// Insertion is linearizable per key: of any number of concurrent
/// [`rec_build`](BuildStore::rec_build) calls for one key, exactly one runs
/// the build function; the rest read the winner's handle.
#[derive(Default)]
pub struct BuildStore {
  entries: Mutex<HashMap<BuildKey, AnyActive>>,
}

impl BuildStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of memoized entries, for diagnostics.
  pub fn len(&self) -> usize {
    self.entries.lock().expect("build store lock poisoned").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Memoized recursive build.
  ///
  /// On hit, returns the stored [`ActiveTarget`] without invoking `build_fn`.
  /// On miss, inserts a pending handle under the key first (so concurrent
  /// fetchers of the same key immediately observe it), then invokes
  /// `build_fn`, which may itself recursively call `rec_build` for other
  /// keys, and launches the resulting target into the handle. If `build_fn`
  /// fails, the handle resolves as failed and every waiter sees a dependency
  /// failure; the primary error is reported once here.
  pub async fn rec_build<T, F, Fut>(&self, key: BuildKey, label: &str, build_fn: F) -> ActiveTarget<T>
  where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Target<T>, BuildError>>,
  {
    let (promise, active) = {
      let mut entries = self.entries.lock().expect("build store lock poisoned");
      if let Some(existing) = entries.get(&key) {
        return existing
          .downcast_ref::<ActiveTarget<T>>()
          .expect("one build key must always map to one artifact type")
          .clone();
      }
      let (promise, active) = ActiveTarget::pending(label);
      entries.insert(key, Box::new(active.clone()));
      (promise, active)
    };

    // This caller won the insert race, so it alone runs the build function.
    // The lock is not held here: build_fn may recurse back into the store.
    match build_fn().await {
      Ok(target) => promise.fulfill(target),
      Err(err) => promise.fail(err),
    }
    active
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::trace::Trace;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
  }

  fn key_a() -> BuildKey {
    BuildKey::Module(ModuleId(0), Facet::Bin)
  }

  #[test]
  fn hit_does_not_reinvoke_the_build_function() {
    rt().block_on(async {
      let store = BuildStore::new();
      let runs = Arc::new(AtomicUsize::new(0));

      for _ in 0..3 {
        let runs = runs.clone();
        let active = store
          .rec_build(key_a(), "A:bin", || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(Target::ready(1u32, Trace::NIL))
          })
          .await;
        assert_eq!(active.materialize().await.unwrap().0, 1);
      }

      assert_eq!(runs.load(Ordering::SeqCst), 1);
      assert_eq!(store.len(), 1);
    });
  }

  #[test]
  fn concurrent_fetchers_share_one_build() {
    rt().block_on(async {
      let store = Arc::new(BuildStore::new());
      let runs = Arc::new(AtomicUsize::new(0));

      let mut handles = Vec::new();
      for _ in 0..8 {
        let store = store.clone();
        let runs = runs.clone();
        handles.push(tokio::spawn(async move {
          let active = store
            .rec_build(key_a(), "A:bin", || async move {
              runs.fetch_add(1, Ordering::SeqCst);
              // Yield so racing fetchers overlap the pending window.
              tokio::task::yield_now().await;
              Ok(Target::ready(42u32, Trace::of_bytes(b"A")))
            })
            .await;
          active.materialize().await.unwrap().0
        }));
      }

      for handle in handles {
        assert_eq!(handle.await.unwrap(), 42);
      }
      assert_eq!(runs.load(Ordering::SeqCst), 1, "build function must run exactly once");
    });
  }

  #[test]
  fn distinct_facets_of_one_module_are_distinct_keys() {
    rt().block_on(async {
      let store = BuildStore::new();
      let _bin = store
        .rec_build(BuildKey::Module(ModuleId(3), Facet::Bin), "M:bin", || async {
          Ok(Target::ready(1u32, Trace::NIL))
        })
        .await;
      let _iface = store
        .rec_build(BuildKey::Module(ModuleId(3), Facet::Iface), "M:iface", || async {
          Ok(Target::ready(2u32, Trace::NIL))
        })
        .await;
      assert_eq!(store.len(), 2);
    });
  }

  #[test]
  fn failing_build_function_resolves_all_waiters() {
    rt().block_on(async {
      let store = BuildStore::new();
      let active = store
        .rec_build::<u32, _, _>(key_a(), "A:bin", || async {
          Err(BuildError::ImportCycle {
            chain: vec!["A".to_string(), "B".to_string(), "A".to_string()],
          })
        })
        .await;

      let err = active.materialize().await.unwrap_err();
      assert!(matches!(err, BuildError::Dependency(_)));

      // The failed entry stays memoized: nobody retries within a run.
      let runs = Arc::new(AtomicUsize::new(0));
      let runs2 = runs.clone();
      let again = store
        .rec_build::<u32, _, _>(key_a(), "A:bin", || async move {
          runs2.fetch_add(1, Ordering::SeqCst);
          Ok(Target::ready(1, Trace::NIL))
        })
        .await;
      assert!(again.materialize().await.is_err());
      assert_eq!(runs.load(Ordering::SeqCst), 0);
    });
  }
}
