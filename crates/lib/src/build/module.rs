//! Per-module facet targets.
//!
//! The binary facet is the core node: one `quillc` invocation produces the
//! binary, the interface, and (for non-pure modules) the intermediate C in
//! a single step. The other facets either project out of that node (iface,
//! C) or derive further artifacts from it (object, shared library), each
//! registered under its own build key so downstream nodes share one
//! computation per artifact.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info};

use super::BuildContext;
use super::package::fetch_extra_dep;
use crate::error::BuildError;
use crate::store::{BuildKey, Facet};
use crate::target::{ActiveTarget, Target};
use crate::toolchain::CompileSpec;
use crate::trace::Trace;
use crate::workspace::{ModuleId, trace_path};

/// Artifacts of one module compilation.
#[derive(Debug, Clone)]
pub struct ModuleArtifacts {
  pub bin: PathBuf,
  pub iface: PathBuf,
  /// Absent for pure modules.
  pub c: Option<PathBuf>,
}

fn facet_label(ctx: &BuildContext, id: ModuleId, facet: Facet) -> String {
  format!("{}:{facet}", ctx.ws.module(id).name)
}

/// Fetch the binary facet of a module, compiling it and its import closure
/// as needed.
///
/// Boxed because registration recurses through the import graph.
pub fn fetch_module_bin<'a>(
  ctx: &'a Arc<BuildContext>,
  id: ModuleId,
) -> Pin<Box<dyn Future<Output = ActiveTarget<ModuleArtifacts>> + Send + 'a>> {
  Box::pin(async move {
    let label = facet_label(ctx, id, Facet::Bin);
    ctx
      .store
      .rec_build(BuildKey::Module(id, Facet::Bin), &label, || async {
        let module = ctx.ws.module(id).clone();
        let resolved = ctx.resolver.resolve(&ctx.ws, id).await?;

        let mut deps = Vec::with_capacity(resolved.transitive.len());
        for dep in &resolved.transitive {
          deps.push(fetch_module_bin(ctx, *dep).await);
        }
        let mut preloads = Vec::new();
        for dep in &resolved.transitive {
          if ctx.ws.module(*dep).precompile {
            preloads.push(fetch_module_dynlib(ctx, *dep).await);
          }
        }
        let extra_dep = fetch_extra_dep(ctx, module.package).await;

        let bin = ctx.ws.artifact_path(id, Facet::Bin);
        let iface = ctx.ws.artifact_path(id, Facet::Iface);
        let c = (!module.pure).then(|| ctx.ws.artifact_path(id, Facet::C));
        let (out_dirs, src_dirs) = ctx.ws.search_dirs(module.package);
        let package = ctx.ws.package(module.package);
        let ext_libs: Vec<String> = package.ext_libs.iter().flat_map(|l| l.link_args()).collect();
        let mut lib_dirs: Vec<PathBuf> = package
          .ext_libs
          .iter()
          .filter_map(|l| l.path.as_ref().and_then(|p| p.parent()).map(Path::to_path_buf))
          .collect();
        lib_dirs.dedup();
        let ctx = ctx.clone();

        Ok(Target::new(async move {
          let mut trace = ctx.toolchain_trace().await?;
          trace = trace.mix(Trace::of_file(&module.src_path)?);
          trace = trace.mix(Trace::of_args(&module.args));
          trace = trace.mix(Trace::of_args(&ext_libs));
          for dep in &deps {
            trace = trace.mix(dep.trace().await?.keyed(dep.label()));
          }
          let mut preload_paths = Vec::with_capacity(preloads.len());
          for preload in &preloads {
            let (path, preload_trace) = preload.materialize().await?;
            trace = trace.mix(preload_trace.keyed(preload.label()));
            preload_paths.push(path);
          }
          trace = trace.mix(extra_dep.trace().await?.keyed(extra_dep.label()));

          let artifacts = ModuleArtifacts {
            bin: bin.clone(),
            iface: iface.clone(),
            c: c.clone(),
          };
          let trace_file = trace_path(&bin);
          let fresh = bin.is_file()
            && iface.is_file()
            && trace.check_against_file(&trace_file)
            && c
              .as_deref()
              .is_none_or(|c| c.is_file() && trace.check_against_file(&trace_path(c)));
          if fresh {
            debug!(module = %module.name, %trace, "binary up to date");
            return Ok((artifacts, trace));
          }

          if let Some(parent) = bin.parent() {
            tokio::fs::create_dir_all(parent).await?;
          }
          let spec = CompileSpec {
            module: module.name.clone(),
            src: module.src_path.clone(),
            bin_out: bin,
            iface_out: iface,
            c_out: c,
            args: module.args.clone(),
            out_dirs,
            src_dirs,
            ext_libs,
            lib_dirs,
            preload: preload_paths,
          };
          {
            let _permit = acquire(&ctx).await?;
            ctx.toolchain.compile_module(&spec).await?;
          }
          trace.write_to_file(&trace_file)?;
          if let Some(c) = &artifacts.c {
            trace.write_to_file(&trace_path(c))?;
          }
          info!(module = %module.name, %trace, "compiled");
          Ok((artifacts, trace))
        }))
      })
      .await
  })
}

/// Interface facet: a projection of the binary node.
pub async fn fetch_module_iface(ctx: &Arc<BuildContext>, id: ModuleId) -> ActiveTarget<PathBuf> {
  let label = facet_label(ctx, id, Facet::Iface);
  ctx
    .store
    .rec_build(BuildKey::Module(id, Facet::Iface), &label, || async {
      let core = fetch_module_bin(ctx, id).await;
      Ok(Target::new(async move {
        let (artifacts, trace) = core.materialize().await?;
        Ok((artifacts.iface, trace))
      }))
    })
    .await
}

/// Intermediate-C facet: a projection of the binary node. Hard failure for
/// pure modules.
pub async fn fetch_module_c(ctx: &Arc<BuildContext>, id: ModuleId) -> ActiveTarget<PathBuf> {
  let label = facet_label(ctx, id, Facet::C);
  ctx
    .store
    .rec_build(BuildKey::Module(id, Facet::C), &label, || async {
      let module = ctx.ws.module(id).clone();
      if module.pure {
        return Err(BuildError::PureModule(module.name));
      }
      let core = fetch_module_bin(ctx, id).await;
      Ok(Target::new(async move {
        let (artifacts, trace) = core.materialize().await?;
        let c = artifacts.c.ok_or(BuildError::PureModule(module.name))?;
        Ok((c, trace))
      }))
    })
    .await
}

/// Object facet: native compilation of the intermediate C, with its own
/// persisted trace.
pub async fn fetch_module_obj(ctx: &Arc<BuildContext>, id: ModuleId) -> ActiveTarget<PathBuf> {
  let label = facet_label(ctx, id, Facet::Obj);
  ctx
    .store
    .rec_build(BuildKey::Module(id, Facet::Obj), &label, || async {
      let module = ctx.ws.module(id).clone();
      if module.pure {
        return Err(BuildError::PureModule(module.name));
      }
      let c_node = fetch_module_c(ctx, id).await;
      let obj = ctx.ws.artifact_path(id, Facet::Obj);
      let ctx = ctx.clone();
      Ok(Target::new(async move {
        let (c, trace) = c_node.materialize().await?;
        let trace_file = trace_path(&obj);
        if obj.is_file() && trace.check_against_file(&trace_file) {
          debug!(module = %module.name, %trace, "object up to date");
          return Ok((obj, trace));
        }
        {
          let _permit = acquire(&ctx).await?;
          ctx.toolchain.compile_object(&module.name, &c, &obj).await?;
        }
        trace.write_to_file(&trace_file)?;
        info!(module = %module.name, %trace, "object compiled");
        Ok((obj, trace))
      }))
    })
    .await
}

/// Shared-library facet: the module's object plus the objects of its
/// non-pure transitive imports, linked against the owning package's
/// external libraries.
///
/// External library arguments always precede module objects on the link
/// line; objects follow in resolution order, dependencies first.
pub fn fetch_module_dynlib<'a>(
  ctx: &'a Arc<BuildContext>,
  id: ModuleId,
) -> Pin<Box<dyn Future<Output = ActiveTarget<PathBuf>> + Send + 'a>> {
  Box::pin(async move {
    let label = facet_label(ctx, id, Facet::Dynlib);
    ctx
      .store
      .rec_build(BuildKey::Module(id, Facet::Dynlib), &label, || async {
        let module = ctx.ws.module(id).clone();
        if module.pure {
          return Err(BuildError::PureModule(module.name));
        }
        let resolved = ctx.resolver.resolve(&ctx.ws, id).await?;

        let mut objects = Vec::new();
        for dep in &resolved.transitive {
          if !ctx.ws.module(*dep).pure {
            objects.push(fetch_module_obj(ctx, *dep).await);
          }
        }
        objects.push(fetch_module_obj(ctx, id).await);

        let package = ctx.ws.package(module.package);
        let mut lib_args: Vec<String> = package.ext_libs.iter().flat_map(|l| l.link_args()).collect();
        lib_args.extend(package.extra_link_args.iter().cloned());
        let output = ctx.ws.artifact_path(id, Facet::Dynlib);
        let ctx = ctx.clone();

        Ok(Target::new(async move {
          let mut trace = Trace::of_args(&lib_args);
          let mut args = lib_args;
          let mut object_paths = Vec::with_capacity(objects.len());
          for object in &objects {
            let (path, obj_trace) = object.materialize().await?;
            trace = trace.mix(obj_trace.keyed(object.label()));
            object_paths.push(path);
          }
          args.extend(object_paths.iter().map(|p| p.display().to_string()));

          let trace_file = trace_path(&output);
          if output.is_file() && trace.check_against_file(&trace_file) {
            debug!(module = %module.name, %trace, "shared library up to date");
            return Ok((output, trace));
          }
          {
            let _permit = acquire(&ctx).await?;
            ctx.toolchain.link_shared(&output, &args).await?;
          }
          trace.write_to_file(&trace_file)?;
          info!(module = %module.name, %trace, "shared library linked");
          Ok((output, trace))
        }))
      })
      .await
  })
}

/// Acquire a subprocess permit. The pool lives as long as the context, so a
/// closed semaphore means the run is being torn down.
pub(super) async fn acquire(ctx: &BuildContext) -> Result<tokio::sync::SemaphorePermit<'_>, BuildError> {
  ctx
    .permits
    .acquire()
    .await
    .map_err(|_| BuildError::Toolchain("subprocess permit pool closed".into()))
}
