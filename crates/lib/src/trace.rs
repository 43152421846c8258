//! Artifact fingerprints and the up-to-date check.
//!
//! A [`Trace`] is an opaque 64-bit fingerprint derived from SHA-256. Traces
//! combine with [`Trace::mix`], which is commutative and associative with
//! [`Trace::NIL`] as identity: mixing a local trace with any set of dependency
//! traces yields a value that changes iff any constituent changed.
//!
//! A trace persisted next to an artifact answers "is this artifact up to date".
//! The file is written only after the artifact itself was written completely;
//! a missing or unreadable trace file simply means "not up to date".

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::BuildError;

/// On-disk trace format version. Bumping it invalidates all recorded traces.
const TRACE_FORMAT_VERSION: u32 = 1;

/// A combinable fingerprint used to decide artifact staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Trace(u64);

impl std::fmt::Display for Trace {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:016x}", self.0)
  }
}

/// Serialized form of a persisted trace file.
#[derive(Debug, Serialize, Deserialize)]
struct TraceFile {
  version: u32,
  trace: String,
}

impl Trace {
  /// The identity element of [`Trace::mix`].
  pub const NIL: Trace = Trace(0);

  /// Fingerprint arbitrary bytes.
  pub fn of_bytes(bytes: &[u8]) -> Trace {
    let digest = Sha256::digest(bytes);
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    Trace(u64::from_le_bytes(first))
  }

  /// Fingerprint a file's content.
  pub fn of_file(path: &Path) -> Result<Trace, BuildError> {
    let bytes = fs::read(path)?;
    Ok(Trace::of_bytes(&bytes))
  }

  /// Fingerprint an argument list via a stable length-prefixed serialization,
  /// so `["ab"]` and `["a", "b"]` hash differently.
  pub fn of_args<S: AsRef<str>>(args: &[S]) -> Trace {
    let mut hasher = Sha256::new();
    for arg in args {
      let arg = arg.as_ref();
      hasher.update((arg.len() as u64).to_le_bytes());
      hasher.update(arg.as_bytes());
    }
    let digest = hasher.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    Trace(u64::from_le_bytes(first))
  }

  /// Combine two traces. Commutative and associative, with `NIL` as identity.
  #[must_use]
  pub fn mix(self, other: Trace) -> Trace {
    Trace(self.0 ^ other.0)
  }

  /// Bind this trace to the name of the constituent it came from.
  ///
  /// `mix` alone is linear: two constituents changing by the same delta
  /// cancel each other out of the combined value. Rehashing each
  /// constituent together with a unique name makes contributions
  /// independent, so a combined trace changes whenever any named
  /// constituent changes, even when several change identically.
  #[must_use]
  pub fn keyed(self, key: &str) -> Trace {
    let mut hasher = Sha256::new();
    hasher.update((key.len() as u64).to_le_bytes());
    hasher.update(key.as_bytes());
    hasher.update(self.0.to_le_bytes());
    let digest = hasher.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    Trace(u64::from_le_bytes(first))
  }

  /// Mix every trace in an iterator into one.
  pub fn mix_all(traces: impl IntoIterator<Item = Trace>) -> Trace {
    traces.into_iter().fold(Trace::NIL, Trace::mix)
  }

  /// Compare this trace against the one recorded in `path`.
  ///
  /// A missing, unreadable, or version-mismatched file means not up to date.
  pub fn check_against_file(&self, path: &Path) -> bool {
    let Ok(content) = fs::read_to_string(path) else {
      return false;
    };
    let Ok(recorded) = serde_json::from_str::<TraceFile>(&content) else {
      debug!(path = %path.display(), "unparsable trace file, treating as stale");
      return false;
    };
    recorded.version == TRACE_FORMAT_VERSION && recorded.trace == self.to_string()
  }

  /// Persist this trace to `path`, fully overwriting any previous value.
  ///
  /// Callers must only do this after the corresponding artifact file has been
  /// successfully and completely written.
  pub fn write_to_file(&self, path: &Path) -> Result<(), BuildError> {
    let file = TraceFile {
      version: TRACE_FORMAT_VERSION,
      trace: self.to_string(),
    };
    let content = serde_json::to_string(&file).expect("trace file serialization cannot fail");
    fs::write(path, format!("{}\n", content))?;
    Ok(())
  }
}
