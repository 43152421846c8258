//! Deferred build work and its launched form.
//!
//! A [`Target`] is a lazy description of work yielding an artifact plus its
//! [`Trace`]. Nothing runs until [`Target::activate`] spawns the work as an
//! asynchronous task, producing an [`ActiveTarget`]: a cloneable handle that
//! many dependents can [`materialize`](ActiveTarget::materialize) while the
//! underlying computation runs exactly once.
//!
//! Activation is deliberately not memoized here; deduplication per build key
//! is the [`BuildStore`](crate::store::BuildStore)'s job.
//!
//! Failure discipline: the spawn boundary reports a primary error once, then
//! hands dependents an opaque [`FailedNode`] so diagnostics never repeat.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error};

use crate::error::{BuildError, FailedNode};
use crate::trace::Trace;

/// The outcome of running a target's work: artifact plus trace, or failure.
pub type TargetResult<T> = Result<(T, Trace), BuildError>;

type BoxWork<T> = Pin<Box<dyn Future<Output = TargetResult<T>> + Send>>;

type Outcome<T> = Result<(T, Trace), FailedNode>;

/// A lazy, composable unit of build work producing a `T` and a [`Trace`].
pub struct Target<T> {
  work: BoxWork<T>,
}

impl<T: Clone + Send + Sync + 'static> Target<T> {
  /// Wrap asynchronous work into a target. Nothing runs yet.
  pub fn new<F>(work: F) -> Self
  where
    F: Future<Output = TargetResult<T>> + Send + 'static,
  {
    Target { work: Box::pin(work) }
  }

  /// A target that immediately yields an already-known artifact and trace.
  pub fn ready(value: T, trace: Trace) -> Self {
    Target::new(async move { Ok((value, trace)) })
  }

  /// Launch this target's work as an independent asynchronous task.
  ///
  /// The returned handle may be cloned freely; exactly one computation runs.
  pub fn activate(self, label: impl Into<String>) -> ActiveTarget<T> {
    let (promise, active) = ActiveTarget::pending(label);
    promise.fulfill(self);
    active
  }

  /// Sequence: activate the receiver, then feed its result to `f`. The
  /// receiver runs as its own task, so it may proceed concurrently with
  /// sibling branches while the continuation merely waits on it.
  pub fn bind_async<U, F>(self, label: impl Into<String>, f: F) -> Target<U>
  where
    U: Clone + Send + Sync + 'static,
    F: FnOnce(T, Trace) -> Target<U> + Send + 'static,
  {
    let label = label.into();
    Target::new(async move {
      let active = self.activate(label);
      let (value, trace) = active.materialize().await?;
      f(value, trace).work.await
    })
  }

  /// Same-task sequencing for cheap continuations: no intermediate spawn,
  /// the continuation runs before control is handed back.
  pub fn bind_sync<U, F>(self, f: F) -> Target<U>
  where
    U: Clone + Send + Sync + 'static,
    F: FnOnce(T, Trace) -> TargetResult<U> + Send + 'static,
  {
    Target::new(async move {
      let (value, trace) = self.work.await?;
      f(value, trace)
    })
  }

  /// Fan-in: activate all targets, wait on all, and mix their traces.
  ///
  /// Fails with the first failure encountered in order; siblings that were
  /// already launched keep running to completion on their own tasks.
  pub fn collect_all(label: impl Into<String>, targets: Vec<Target<T>>) -> Target<Vec<T>> {
    let label = label.into();
    Target::new(async move {
      let active: Vec<ActiveTarget<T>> = targets
        .into_iter()
        .enumerate()
        .map(|(idx, target)| target.activate(format!("{label}[{idx}]")))
        .collect();

      let mut values = Vec::with_capacity(active.len());
      let mut trace = Trace::NIL;
      for target in &active {
        let (value, t) = target.materialize().await?;
        values.push(value);
        trace = trace.mix(t);
      }
      Ok((values, trace))
    })
  }
}

impl Target<()> {
  /// A target whose artifact is trivial; only its trace is interesting.
  /// Used for pure-dependency nodes such as extra-dep prerequisites.
  pub fn opaque<F>(work: F) -> Self
  where
    F: Future<Output = Result<Trace, BuildError>> + Send + 'static,
  {
    Target::new(async move { Ok(((), work.await?)) })
  }

  /// The empty opaque target.
  pub fn nil() -> Self {
    Target::ready((), Trace::NIL)
  }

  /// Fan-in over opaque targets, mixing all traces into one.
  pub fn collect_opaque(label: impl Into<String>, targets: Vec<Target<()>>) -> Target<()> {
    Target::collect_all(label, targets).bind_sync(|_, trace| Ok(((), trace)))
  }
}

/// A launched [`Target`]: an in-flight or completed asynchronous computation.
pub struct ActiveTarget<T> {
  label: Arc<str>,
  rx: watch::Receiver<Option<Outcome<T>>>,
}

impl<T> Clone for ActiveTarget<T> {
  fn clone(&self) -> Self {
    ActiveTarget {
      label: self.label.clone(),
      rx: self.rx.clone(),
    }
  }
}

impl<T: Clone + Send + Sync + 'static> ActiveTarget<T> {
  /// Create an unresolved handle plus the promise that will resolve it.
  ///
  /// The [`BuildStore`](crate::store::BuildStore) inserts the handle before
  /// running the build function, so racing fetchers of the same key observe
  /// one winner.
  pub(crate) fn pending(label: impl Into<String>) -> (Promise<T>, ActiveTarget<T>) {
    let label: Arc<str> = Arc::from(label.into());
    let (tx, rx) = watch::channel(None);
    let promise = Promise {
      label: label.clone(),
      tx,
    };
    (promise, ActiveTarget { label, rx })
  }

  /// The label this target was activated under, for diagnostics.
  pub fn label(&self) -> &str {
    &self.label
  }

  /// Wait for the underlying computation and yield its artifact and trace.
  ///
  /// A failed computation surfaces as [`BuildError::Dependency`]; the primary
  /// diagnostic was already reported by the failing task itself.
  pub async fn materialize(&self) -> TargetResult<T> {
    let mut rx = self.rx.clone();
    let outcome = match rx.wait_for(|slot| slot.is_some()).await {
      Ok(slot) => (*slot).clone().expect("wait_for guarantees a resolved slot"),
      // Producing task dropped its promise without resolving (panic).
      Err(_) => Err(FailedNode(self.label.to_string())),
    };
    outcome.map_err(BuildError::from)
  }

  /// Wait for completion and yield only the trace.
  pub async fn trace(&self) -> Result<Trace, BuildError> {
    Ok(self.materialize().await?.1)
  }

  /// Re-wrap this handle as a target, so already-launched work can feed
  /// the combinators alongside work that has not been activated yet.
  pub fn to_target(&self) -> Target<T> {
    let handle = self.clone();
    Target::new(async move { handle.materialize().await })
  }
}

/// The resolving half of a pending [`ActiveTarget`].
pub(crate) struct Promise<T> {
  label: Arc<str>,
  tx: watch::Sender<Option<Outcome<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
  /// Spawn the target's work and wire its outcome into the handle.
  pub(crate) fn fulfill(self, target: Target<T>) {
    let Promise { label, tx } = self;
    tokio::spawn(async move {
      let outcome = match target.work.await {
        Ok(result) => Ok(result),
        Err(err) => {
          report_failure(&label, &err);
          Err(FailedNode(label.to_string()))
        }
      };
      // Dependents may all have gone away; that is not an error.
      let _ = tx.send(Some(outcome));
    });
  }

  /// Resolve the handle as failed without ever spawning work. Used when the
  /// build function itself fails (e.g. an import cycle).
  pub(crate) fn fail(self, err: BuildError) {
    report_failure(&self.label, &err);
    let _ = self.tx.send(Some(Err(FailedNode(self.label.to_string()))));
  }
}

/// Report a node failure exactly once, at the point of occurrence.
/// Secondary (dependency) failures only get a debug line.
fn report_failure(label: &str, err: &BuildError) {
  if err.is_secondary() {
    debug!(target_label = %label, error = %err, "node skipped: dependency failed");
  } else {
    error!(target_label = %label, error = %err, "build node failed");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
  }

  #[test]
  fn materialize_yields_artifact_and_trace() {
    rt().block_on(async {
      let target = Target::ready(7u32, Trace::of_bytes(b"seven"));
      let active = target.activate("seven");
      let (value, trace) = active.materialize().await.unwrap();
      assert_eq!(value, 7);
      assert_eq!(trace, Trace::of_bytes(b"seven"));
    });
  }

  #[test]
  fn clones_share_one_computation() {
    rt().block_on(async {
      let runs = Arc::new(AtomicUsize::new(0));
      let runs2 = runs.clone();
      let target = Target::new(async move {
        runs2.fetch_add(1, Ordering::SeqCst);
        Ok((1u32, Trace::NIL))
      });

      let active = target.activate("once");
      let clone = active.clone();
      let (a, _) = active.materialize().await.unwrap();
      let (b, _) = clone.materialize().await.unwrap();
      assert_eq!(a, 1);
      assert_eq!(b, 1);
      assert_eq!(runs.load(Ordering::SeqCst), 1);
    });
  }

  #[test]
  fn bind_async_sequences_and_sees_predecessor_trace() {
    rt().block_on(async {
      let first = Target::ready("base".to_string(), Trace::of_bytes(b"base"));
      let chained = first.bind_async("base", |value, trace| {
        Target::new(async move {
          let own = Trace::of_bytes(b"step");
          Ok((format!("{value}+step"), trace.mix(own)))
        })
      });

      let (value, trace) = chained.activate("chain").materialize().await.unwrap();
      assert_eq!(value, "base+step");
      assert_eq!(trace, Trace::of_bytes(b"base").mix(Trace::of_bytes(b"step")));
    });
  }

  #[test]
  fn bind_sync_runs_in_the_same_task() {
    rt().block_on(async {
      let target = Target::ready(2u32, Trace::NIL).bind_sync(|v, t| Ok((v * 3, t)));
      let (value, _) = target.activate("sync").materialize().await.unwrap();
      assert_eq!(value, 6);
    });
  }

  #[test]
  fn collect_mixes_traces_in_any_order() {
    rt().block_on(async {
      let a = Trace::of_bytes(b"a");
      let b = Trace::of_bytes(b"b");
      let c = Trace::of_bytes(b"c");
      let targets = vec![
        Target::ready(1u32, a),
        Target::ready(2u32, b),
        Target::ready(3u32, c),
      ];

      let (values, trace) = Target::collect_all("nums", targets)
        .activate("nums")
        .materialize()
        .await
        .unwrap();
      assert_eq!(values, vec![1, 2, 3]);
      assert_eq!(trace, Trace::mix_all([a, b, c]));
    });
  }

  #[test]
  fn launched_handles_feed_back_into_collect() {
    rt().block_on(async {
      let a = Target::ready(1u32, Trace::of_bytes(b"a")).activate("a");
      let b = Target::ready(2u32, Trace::of_bytes(b"b")).activate("b");

      let (values, trace) = Target::collect_all("pair", vec![a.to_target(), b.to_target()])
        .activate("pair")
        .materialize()
        .await
        .unwrap();
      assert_eq!(values, vec![1, 2]);
      assert_eq!(trace, Trace::of_bytes(b"a").mix(Trace::of_bytes(b"b")));
    });
  }

  #[test]
  fn collect_fails_fast_while_siblings_drain() {
    rt().block_on(async {
      let sibling_done = Arc::new(AtomicUsize::new(0));
      let done = sibling_done.clone();

      let failing: Target<u32> = Target::new(async {
        Err(BuildError::Toolchain("simulated compiler crash".to_string()))
      });
      let sibling = Target::new(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        done.fetch_add(1, Ordering::SeqCst);
        Ok((9u32, Trace::NIL))
      });

      let collected = Target::collect_all("wave", vec![failing, sibling]);
      let err = collected.activate("wave").materialize().await.unwrap_err();
      assert!(matches!(err, BuildError::Dependency(_)));

      // The already-launched sibling still runs to completion.
      tokio::time::sleep(Duration::from_millis(100)).await;
      assert_eq!(sibling_done.load(Ordering::SeqCst), 1);
    });
  }

  #[test]
  fn dependent_failure_carries_its_own_label_not_the_diagnostic() {
    rt().block_on(async {
      let failing: Target<u32> =
        Target::new(async { Err(BuildError::Toolchain("root cause".to_string())) });
      let dependent = failing.bind_async("root", |value, trace| Target::ready(value + 1, trace));

      let err = dependent.activate("dependent").materialize().await.unwrap_err();
      match err {
        BuildError::Dependency(node) => assert_eq!(node.0, "dependent"),
        other => panic!("expected dependency failure, got {other}"),
      }
    });
  }

  #[test]
  fn failed_promise_resolves_waiters() {
    rt().block_on(async {
      let (promise, active) = ActiveTarget::<u32>::pending("doomed");
      promise.fail(BuildError::Toolchain("tool missing".to_string()));
      let err = active.materialize().await.unwrap_err();
      assert!(matches!(err, BuildError::Dependency(FailedNode(ref l)) if l == "doomed"));
    });
  }
}
