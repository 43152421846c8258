//! Package-level orchestration: whole-package builds, static and shared
//! libraries, and extra-dep prerequisites.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info};

use super::BuildContext;
use super::module::{ModuleArtifacts, acquire, fetch_module_bin, fetch_module_obj};
use crate::error::BuildError;
use crate::store::BuildKey;
use crate::target::{ActiveTarget, Target};
use crate::trace::Trace;
use crate::workspace::{Library, ModuleId, PackageId, trace_path};

/// Artifacts of one fully-built package.
#[derive(Debug, Clone)]
pub struct PackageArtifact {
  pub package: PackageId,
  /// Built modules by name: the roots plus their same-package import closure.
  pub modules: HashMap<String, ModuleArtifacts>,
}

/// Root modules plus their transitive imports, restricted to the modules
/// the package itself owns. Imports from dependency packages are built as
/// part of those packages' own nodes.
async fn member_closure(
  ctx: &Arc<BuildContext>,
  id: PackageId,
  roots: &[ModuleId],
) -> Result<Vec<ModuleId>, BuildError> {
  let mut members = Vec::new();
  for root in roots {
    let resolved = ctx.resolver.resolve(&ctx.ws, *root).await?;
    for dep in &resolved.transitive {
      if ctx.ws.module(*dep).package == id && !members.contains(dep) {
        members.push(*dep);
      }
    }
    if !members.contains(root) {
      members.push(*root);
    }
  }
  Ok(members)
}

/// Fetch a whole package: dependency packages first, then the root module
/// closure and every configured library.
///
/// Boxed because registration recurses through the package graph; the graph
/// was checked acyclic at load time.
pub fn fetch_package<'a>(
  ctx: &'a Arc<BuildContext>,
  id: PackageId,
) -> Pin<Box<dyn Future<Output = ActiveTarget<PackageArtifact>> + Send + 'a>> {
  Box::pin(async move {
    let label = ctx.ws.package(id).name.clone();
    ctx
      .store
      .rec_build(BuildKey::Package(id), &label, || async {
        let mut dep_pkgs = Vec::new();
        for dep in &ctx.ws.package(id).deps {
          dep_pkgs.push(fetch_package(ctx, *dep).await);
        }

        let members = member_closure(ctx, id, &ctx.ws.root_modules(id)).await?;
        let mut modules = Vec::with_capacity(members.len());
        for member in members {
          let name = ctx.ws.module(member).name.clone();
          modules.push((name, fetch_module_bin(ctx, member).await));
        }

        let mut libs = Vec::new();
        for lib in &ctx.ws.package(id).libs {
          libs.push(fetch_static_lib(ctx, lib.clone()).await);
          libs.push(fetch_shared_lib(ctx, lib.clone()).await);
        }

        let dep_fanin = Target::collect_opaque(
          format!("{label}:deps"),
          dep_pkgs
            .iter()
            .map(|dep| dep.to_target().bind_sync(|_, trace| Ok(((), trace))))
            .collect(),
        );
        let lib_fanin = Target::collect_opaque(
          format!("{label}:libs"),
          libs.iter().map(ActiveTarget::to_target).collect(),
        );
        let deps_label = format!("{label}:deps");
        let libs_label = format!("{label}:libs");

        Ok(Target::new(async move {
          let mut trace = dep_fanin.activate(deps_label).trace().await?;
          let mut built = HashMap::with_capacity(modules.len());
          for (name, handle) in modules {
            let (artifacts, module_trace) = handle.materialize().await?;
            trace = trace.mix(module_trace.keyed(&name));
            built.insert(name, artifacts);
          }
          trace = trace.mix(lib_fanin.activate(libs_label).trace().await?);
          Ok((
            PackageArtifact {
              package: id,
              modules: built,
            },
            trace,
          ))
        }))
      })
      .await
  })
}

/// Member objects of a library: the non-pure modules reachable from its
/// roots (the package's roots when the library names none).
async fn library_objects(
  ctx: &Arc<BuildContext>,
  lib: &Library,
) -> Result<Vec<ActiveTarget<PathBuf>>, BuildError> {
  let roots = if lib.roots.is_empty() {
    ctx.ws.root_modules(lib.package)
  } else {
    lib
      .roots
      .iter()
      .map(|name| {
        ctx.ws.find_module(name).ok_or_else(|| BuildError::UnknownModule {
          module: name.clone(),
          package: ctx.ws.package(lib.package).name.clone(),
        })
      })
      .collect::<Result<Vec<_>, _>>()?
  };
  let mut objects = Vec::new();
  for member in member_closure(ctx, lib.package, &roots).await? {
    if !ctx.ws.module(member).pure {
      objects.push(fetch_module_obj(ctx, member).await);
    }
  }
  Ok(objects)
}

/// Static archive of a library's member objects.
pub async fn fetch_static_lib(ctx: &Arc<BuildContext>, lib: Library) -> ActiveTarget<()> {
  let label = format!("{}:staticlib", lib.name);
  ctx
    .store
    .rec_build(BuildKey::StaticLib(lib.package, lib.name.clone()), &label, || async {
      let output = ctx.ws.package(lib.package).out_dir.join(lib.static_file_name());
      let objects = library_objects(ctx, &lib).await?;
      let ctx = ctx.clone();
      let name = lib.name.clone();
      Ok(Target::opaque(async move {
        let mut trace = Trace::NIL;
        let mut paths = Vec::with_capacity(objects.len());
        for object in &objects {
          let (path, obj_trace) = object.materialize().await?;
          trace = trace.mix(obj_trace.keyed(object.label()));
          paths.push(path);
        }
        let trace_file = trace_path(&output);
        if output.is_file() && trace.check_against_file(&trace_file) {
          debug!(lib = %name, %trace, "static library up to date");
          return Ok(trace);
        }
        if let Some(parent) = output.parent() {
          tokio::fs::create_dir_all(parent).await?;
        }
        {
          let _permit = acquire(&ctx).await?;
          ctx.toolchain.archive_static(&output, &paths).await?;
        }
        trace.write_to_file(&trace_file)?;
        info!(lib = %name, %trace, "static library archived");
        Ok(trace)
      }))
    })
    .await
}

/// Shared library of a library's member objects, linked against the
/// package's external libraries. Library arguments precede objects.
pub async fn fetch_shared_lib(ctx: &Arc<BuildContext>, lib: Library) -> ActiveTarget<()> {
  let label = format!("{}:sharedlib", lib.name);
  ctx
    .store
    .rec_build(BuildKey::SharedLib(lib.package, lib.name.clone()), &label, || async {
      let package = ctx.ws.package(lib.package);
      let output = package.out_dir.join(lib.shared_file_name());
      let mut lib_args: Vec<String> = package.ext_libs.iter().flat_map(|l| l.link_args()).collect();
      lib_args.extend(package.extra_link_args.iter().cloned());
      let objects = library_objects(ctx, &lib).await?;
      let ctx = ctx.clone();
      let name = lib.name.clone();
      Ok(Target::opaque(async move {
        let mut trace = Trace::of_args(&lib_args);
        let mut args = lib_args;
        for object in &objects {
          let (path, obj_trace) = object.materialize().await?;
          trace = trace.mix(obj_trace.keyed(object.label()));
          args.push(path.display().to_string());
        }
        let trace_file = trace_path(&output);
        if output.is_file() && trace.check_against_file(&trace_file) {
          debug!(lib = %name, %trace, "shared library up to date");
          return Ok(trace);
        }
        if let Some(parent) = output.parent() {
          tokio::fs::create_dir_all(parent).await?;
        }
        {
          let _permit = acquire(&ctx).await?;
          ctx.toolchain.link_shared(&output, &args).await?;
        }
        trace.write_to_file(&trace_file)?;
        info!(lib = %name, %trace, "shared library linked");
        Ok(trace)
      }))
    })
    .await
}

/// A package's catch-all prerequisite node: the mixed traces of its
/// configured extra-dep files. Nil when none are configured, so the node is
/// free for the common case.
pub async fn fetch_extra_dep(ctx: &Arc<BuildContext>, id: PackageId) -> ActiveTarget<()> {
  let label = format!("{}:extra-dep", ctx.ws.package(id).name);
  ctx
    .store
    .rec_build(BuildKey::ExtraDep(id), &label, || async {
      let paths = ctx.ws.package(id).extra_dep_paths.clone();
      if paths.is_empty() {
        return Ok(Target::nil());
      }
      Ok(Target::opaque(async move {
        let mut trace = Trace::NIL;
        for path in &paths {
          trace = trace.mix(Trace::of_file(path)?.keyed(&path.to_string_lossy()));
        }
        Ok(trace)
      }))
    })
    .await
}
