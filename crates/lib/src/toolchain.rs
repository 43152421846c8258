//! External toolchain invocation.
//!
//! The engine shells out for every artifact: `quillc` for module
//! compilation, the C compiler for objects and shared libraries, `ar`
//! for static archives. Binaries are found on `PATH` unless overridden
//! through `QUILLC`, `QUILL_CC`, and `QUILL_AR`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Output;

use tokio::process::Command;
use tracing::debug;

use crate::error::BuildError;

/// Boxed future returned by [`Toolchain`] methods, keeping the trait
/// object-safe.
pub type ToolFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BuildError>> + Send + 'a>>;

/// One `quillc` invocation, fully described.
#[derive(Debug, Clone)]
pub struct CompileSpec {
  /// Module name, used only for diagnostics.
  pub module: String,
  pub src: PathBuf,
  pub bin_out: PathBuf,
  pub iface_out: PathBuf,
  /// Intermediate C output; absent for pure modules.
  pub c_out: Option<PathBuf>,
  /// Per-module compiler arguments, appended last.
  pub args: Vec<String>,
  /// Directories searched for compiled imports.
  pub out_dirs: Vec<PathBuf>,
  /// Directories searched for source roots.
  pub src_dirs: Vec<PathBuf>,
  /// External-library link arguments of the owning package. Passed to the
  /// compiler before any preloaded module library.
  pub ext_libs: Vec<String>,
  /// Directories searched for shared libraries at compile time.
  pub lib_dirs: Vec<PathBuf>,
  /// Shared libraries to preload into the compiler process.
  pub preload: Vec<PathBuf>,
}

/// Abstraction over the external compilers. Object-safe so the build
/// layer can hold it as `Arc<dyn Toolchain>` and tests can substitute
/// a recording fake.
pub trait Toolchain: Send + Sync {
  /// Compile one module to its binary and interface (and C, if requested).
  fn compile_module<'a>(&'a self, spec: &'a CompileSpec) -> ToolFuture<'a, ()>;

  /// Compile intermediate C to a native object file.
  fn compile_object<'a>(&'a self, module: &'a str, c: &'a Path, obj: &'a Path) -> ToolFuture<'a, ()>;

  /// Link object files and libraries into a shared library.
  fn link_shared<'a>(&'a self, output: &'a Path, args: &'a [String]) -> ToolFuture<'a, ()>;

  /// Archive object files into a static library.
  fn archive_static<'a>(&'a self, output: &'a Path, objects: &'a [PathBuf]) -> ToolFuture<'a, ()>;

  /// Version string of the compiler, recorded into every module trace.
  fn version(&self) -> ToolFuture<'_, String>;
}

/// The real toolchain: spawned subprocesses with captured output.
pub struct ProcessToolchain {
  quillc: PathBuf,
  cc: PathBuf,
  ar: PathBuf,
}

impl ProcessToolchain {
  /// Resolve tool binaries from the environment, falling back to `PATH`
  /// lookups by conventional name.
  pub fn from_env() -> Self {
    Self {
      quillc: env_tool("QUILLC", "quillc"),
      cc: env_tool("QUILL_CC", "cc"),
      ar: env_tool("QUILL_AR", "ar"),
    }
  }
}

fn env_tool(var: &str, default: &str) -> PathBuf {
  match std::env::var_os(var) {
    Some(path) if !path.is_empty() => PathBuf::from(path),
    _ => PathBuf::from(default),
  }
}

/// Run a command to completion with captured output.
async fn run(program: &Path, args: &[String]) -> Result<Output, BuildError> {
  debug!(program = %program.display(), ?args, "spawning tool");
  Command::new(program)
    .args(args)
    .output()
    .await
    .map_err(|err| BuildError::Toolchain(format!("failed to run {}: {err}", program.display())))
}

/// Captured stderr, falling back to stdout when stderr is empty.
fn diagnostic(output: &Output) -> String {
  let stderr = String::from_utf8_lossy(&output.stderr);
  if stderr.trim().is_empty() {
    String::from_utf8_lossy(&output.stdout).into_owned()
  } else {
    stderr.into_owned()
  }
}

impl Toolchain for ProcessToolchain {
  fn compile_module<'a>(&'a self, spec: &'a CompileSpec) -> ToolFuture<'a, ()> {
    Box::pin(async move {
      let mut args = vec![
        spec.src.display().to_string(),
        "-o".into(),
        spec.bin_out.display().to_string(),
        "--iface".into(),
        spec.iface_out.display().to_string(),
      ];
      if let Some(c) = &spec.c_out {
        args.push("--c".into());
        args.push(c.display().to_string());
      }
      for dir in &spec.out_dirs {
        args.push("-I".into());
        args.push(dir.display().to_string());
      }
      for dir in &spec.src_dirs {
        args.push("-S".into());
        args.push(dir.display().to_string());
      }
      for dir in &spec.lib_dirs {
        args.push("-L".into());
        args.push(dir.display().to_string());
      }
      for lib in &spec.ext_libs {
        args.push("--link".into());
        args.push(lib.clone());
      }
      for lib in &spec.preload {
        args.push("--load".into());
        args.push(lib.display().to_string());
      }
      args.extend(spec.args.iter().cloned());

      let output = run(&self.quillc, &args).await?;
      if !output.status.success() {
        return Err(BuildError::Compiler {
          module: spec.module.clone(),
          code: output.status.code(),
          diagnostic: diagnostic(&output),
        });
      }
      Ok(())
    })
  }

  fn compile_object<'a>(&'a self, module: &'a str, c: &'a Path, obj: &'a Path) -> ToolFuture<'a, ()> {
    Box::pin(async move {
      let args = vec![
        "-c".into(),
        c.display().to_string(),
        "-o".into(),
        obj.display().to_string(),
        "-fPIC".into(),
      ];
      let output = run(&self.cc, &args).await?;
      if !output.status.success() {
        return Err(BuildError::Compiler {
          module: module.to_owned(),
          code: output.status.code(),
          diagnostic: diagnostic(&output),
        });
      }
      Ok(())
    })
  }

  fn link_shared<'a>(&'a self, output_path: &'a Path, args: &'a [String]) -> ToolFuture<'a, ()> {
    Box::pin(async move {
      let mut full = vec!["-shared".to_string(), "-o".into(), output_path.display().to_string()];
      full.extend(args.iter().cloned());
      let output = run(&self.cc, &full).await?;
      if !output.status.success() {
        return Err(BuildError::Link {
          output: output_path.to_path_buf(),
          code: output.status.code(),
          diagnostic: diagnostic(&output),
        });
      }
      Ok(())
    })
  }

  fn archive_static<'a>(&'a self, output_path: &'a Path, objects: &'a [PathBuf]) -> ToolFuture<'a, ()> {
    Box::pin(async move {
      let mut args = vec!["rcs".to_string(), output_path.display().to_string()];
      args.extend(objects.iter().map(|o| o.display().to_string()));
      let output = run(&self.ar, &args).await?;
      if !output.status.success() {
        return Err(BuildError::Link {
          output: output_path.to_path_buf(),
          code: output.status.code(),
          diagnostic: diagnostic(&output),
        });
      }
      Ok(())
    })
  }

  fn version(&self) -> ToolFuture<'_, String> {
    Box::pin(async move {
      let output = run(&self.quillc, &["--version".to_string()]).await?;
      if !output.status.success() {
        return Err(BuildError::Toolchain(format!(
          "{} --version exited with {}",
          self.quillc.display(),
          output.status
        )));
      }
      Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn env_overrides_win_over_defaults() {
    temp_env::with_vars([("QUILLC", Some("/opt/quill/bin/quillc")), ("QUILL_CC", None::<&str>)], || {
      let tc = ProcessToolchain::from_env();
      assert_eq!(tc.quillc, PathBuf::from("/opt/quill/bin/quillc"));
      assert_eq!(tc.cc, PathBuf::from("cc"));
      assert_eq!(tc.ar, PathBuf::from("ar"));
    });
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn compile_args_put_external_libs_before_preloads() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempfile::TempDir::new().unwrap();
    let log = temp.path().join("args.txt");
    let script = temp.path().join("quillc");
    std::fs::write(
      &script,
      format!("#!/bin/sh\nprintf '%s\\n' \"$@\" > {}\n", log.display()),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let tc = ProcessToolchain {
      quillc: script,
      cc: PathBuf::from("cc"),
      ar: PathBuf::from("ar"),
    };
    let spec = CompileSpec {
      module: "App".into(),
      src: PathBuf::from("App.qu"),
      bin_out: PathBuf::from("App.qo"),
      iface_out: PathBuf::from("App.qi"),
      c_out: None,
      args: vec![],
      out_dirs: vec![],
      src_dirs: vec![],
      ext_libs: vec!["-lz".into()],
      lib_dirs: vec![temp.path().to_path_buf()],
      preload: vec![PathBuf::from("libDep.so")],
    };
    tc.compile_module(&spec).await.unwrap();

    let recorded = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = recorded.lines().collect();
    let link = lines.iter().position(|a| *a == "--link").unwrap();
    let load = lines.iter().position(|a| *a == "--load").unwrap();
    assert!(link < load, "library args must precede preloads: {lines:?}");
    assert_eq!(lines[link + 1], "-lz");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn missing_tool_is_a_toolchain_error() {
    let tc = ProcessToolchain {
      quillc: PathBuf::from("/nonexistent/quillc"),
      cc: PathBuf::from("cc"),
      ar: PathBuf::from("ar"),
    };
    let err = tc.version().await.unwrap_err();
    assert!(matches!(err, BuildError::Toolchain(_)));
  }
}
