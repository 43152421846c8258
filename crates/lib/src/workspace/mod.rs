//! Workspace entities: packages, modules, libraries.
//!
//! Mutually-referential entities live in arenas addressed by stable integer
//! ids; relations (owner package, dependency lists) are id lookups rather
//! than owning pointers. The whole workspace (the root package plus the
//! transitive closure of its dependency packages) is loaded once per run
//! and immutable afterwards.

pub mod config;
pub mod scan;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use tracing::{debug, warn};

use crate::error::BuildError;
use crate::store::Facet;
use config::{MANIFEST_FILE, PackageConfig, load_config};
use scan::{module_rel_path, scan_modules};

/// Stable arena index of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

/// Stable arena index of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(pub u32);

/// Shared library extension for the current platform.
#[cfg(target_os = "macos")]
pub const DYNLIB_EXT: &str = "dylib";
#[cfg(windows)]
pub const DYNLIB_EXT: &str = "dll";
#[cfg(not(any(target_os = "macos", windows)))]
pub const DYNLIB_EXT: &str = "so";

/// A single source module. Materialized when its package is scanned and
/// immutable within a build run.
#[derive(Debug, Clone)]
pub struct Module {
  pub id: ModuleId,
  /// Fully-qualified dotted name, e.g. `Data.List`.
  pub name: String,
  /// Owning package (relation only; the package owns its module list).
  pub package: PackageId,
  pub src_path: PathBuf,
  /// Compiler arguments recorded into this module's trace.
  pub args: Vec<String>,
  /// No native stage: no intermediate C, object, or dynlib facets.
  pub pure: bool,
  /// Preload the flagged import chain as shared libraries at compile time.
  pub precompile: bool,
}

/// An external, prebuilt library referenced by a package.
#[derive(Debug, Clone)]
pub struct ExtLib {
  pub name: String,
  pub path: Option<PathBuf>,
}

impl ExtLib {
  /// Linker arguments for this library. These always precede same-run
  /// module symbols on link lines.
  pub fn link_args(&self) -> Vec<String> {
    match &self.path {
      Some(path) => vec![path.display().to_string()],
      None => vec![format!("-l{}", self.name)],
    }
  }
}

/// A named grouping of modules within a package, with its own static/shared
/// output naming convention.
#[derive(Debug, Clone)]
pub struct Library {
  pub package: PackageId,
  pub name: String,
  /// Member root module names; empty means the package's own roots.
  pub roots: Vec<String>,
}

impl Library {
  pub fn static_file_name(&self) -> String {
    format!("lib{}.a", self.name)
  }

  pub fn shared_file_name(&self) -> String {
    format!("lib{}.{}", self.name, DYNLIB_EXT)
  }
}

/// A package: a directory with a manifest, a scanned module set, and zero or
/// more libraries. Constructed once per run from on-disk configuration.
#[derive(Debug, Clone)]
pub struct Package {
  pub id: PackageId,
  pub name: String,
  pub root_dir: PathBuf,
  pub src_dir: PathBuf,
  pub out_dir: PathBuf,
  /// Root module names (validated against the scanned set).
  pub roots: Vec<String>,
  /// Resolved direct dependency packages.
  pub deps: Vec<PackageId>,
  pub ext_libs: Vec<ExtLib>,
  pub libs: Vec<Library>,
  pub extra_link_args: Vec<String>,
  /// Catch-all prerequisite files whose traces gate every member module.
  pub extra_dep_paths: Vec<PathBuf>,
  /// All modules owned by this package, in scan order.
  pub modules: Vec<ModuleId>,
}

/// The loaded package set plus its module arena and name indices.
#[derive(Debug, Default)]
pub struct Workspace {
  packages: Vec<Package>,
  modules: Vec<Module>,
  pkg_by_name: HashMap<String, PackageId>,
  module_index: HashMap<String, ModuleId>,
}

impl Workspace {
  /// Load the package rooted at `root_dir` plus the transitive closure of
  /// its dependencies, solved against sibling directories of the root.
  ///
  /// Returns the workspace and the root package's id. A dependency cycle
  /// between packages is a hard failure.
  pub fn load(root_dir: &Path) -> Result<(Workspace, PackageId), BuildError> {
    let root_dir = root_dir.canonicalize().unwrap_or_else(|_| root_dir.to_path_buf());
    let packages_root = root_dir.parent().map(Path::to_path_buf).unwrap_or_else(|| root_dir.clone());
    Self::load_with_packages_root(&root_dir, &packages_root)
  }

  /// Like [`Workspace::load`], with an explicit directory to solve
  /// dependency package names against.
  pub fn load_with_packages_root(
    root_dir: &Path,
    packages_root: &Path,
  ) -> Result<(Workspace, PackageId), BuildError> {
    let mut ws = Workspace::default();

    // Phase one: discover and load every reachable package.
    let mut pending_deps: Vec<(PackageId, Vec<String>)> = Vec::new();
    let mut queue: VecDeque<PathBuf> = VecDeque::from([root_dir.to_path_buf()]);
    let mut seen_dirs: HashSet<PathBuf> = HashSet::new();
    let mut root_id = None;

    while let Some(dir) = queue.pop_front() {
      if !seen_dirs.insert(dir.clone()) {
        continue;
      }
      let config = load_config(&dir)?;
      let dep_names = config.deps.clone();
      let id = ws.add_package(&dir, config)?;
      root_id.get_or_insert(id);

      for dep in &dep_names {
        if ws.pkg_by_name.contains_key(dep) {
          continue;
        }
        let dep_dir = packages_root.join(dep);
        if !dep_dir.join(MANIFEST_FILE).is_file() {
          return Err(BuildError::UnknownPackage(dep.clone()));
        }
        queue.push_back(dep_dir);
      }
      pending_deps.push((id, dep_names));
    }

    // Phase two: resolve dependency names to ids and reject cycles.
    for (id, names) in pending_deps {
      let deps = names
        .iter()
        .map(|name| {
          ws.pkg_by_name
            .get(name)
            .copied()
            .ok_or_else(|| BuildError::UnknownPackage(name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
      ws.packages[id.0 as usize].deps = deps;
    }
    ws.check_package_graph()?;

    let root_id = root_id.ok_or_else(|| BuildError::UnknownPackage(root_dir.display().to_string()))?;
    debug!(
      packages = ws.packages.len(),
      modules = ws.modules.len(),
      "workspace loaded"
    );
    Ok((ws, root_id))
  }

  fn add_package(&mut self, dir: &Path, config: PackageConfig) -> Result<PackageId, BuildError> {
    let id = PackageId(self.packages.len() as u32);
    let src_dir = dir.join(&config.src_dir);
    let out_dir = dir.join(&config.out_dir);

    let mut module_ids = Vec::new();
    let mut names = HashSet::new();
    for (name, src_path) in scan_modules(&src_dir)? {
      let mid = ModuleId(self.modules.len() as u32);
      let mut args = config.extra_compile_args.clone();
      if let Some(extra) = config.module_args.get(&name) {
        args.extend(extra.iter().cloned());
      }
      self.modules.push(Module {
        id: mid,
        name: name.clone(),
        package: id,
        src_path,
        args,
        pure: config.pure_modules.contains(&name),
        precompile: config.precompile_modules.contains(&name),
      });
      names.insert(name.clone());
      module_ids.push(mid);
      if let Some(shadowed) = self.module_index.insert(name.clone(), mid)
        && self.modules[shadowed.0 as usize].package != id
      {
        // First loader wins for import resolution; keep the earlier owner.
        warn!(module = %name, "module name shadowed across packages");
        self.module_index.insert(name, shadowed);
      }
    }

    for root in &config.roots {
      if !names.contains(root) {
        return Err(BuildError::UnknownModule {
          module: root.clone(),
          package: config.name.clone(),
        });
      }
    }
    for lib in &config.libs {
      for root in &lib.roots {
        if !names.contains(root) {
          return Err(BuildError::UnknownModule {
            module: root.clone(),
            package: config.name.clone(),
          });
        }
      }
    }

    let package = Package {
      id,
      name: config.name.clone(),
      root_dir: dir.to_path_buf(),
      src_dir,
      out_dir,
      roots: config.roots,
      deps: Vec::new(),
      ext_libs: config
        .ext_libs
        .into_iter()
        .map(|l| ExtLib {
          name: l.name,
          path: l.path.map(|p| dir.join(p)),
        })
        .collect(),
      libs: config
        .libs
        .into_iter()
        .map(|l| Library {
          package: id,
          name: l.name,
          roots: l.roots,
        })
        .collect(),
      extra_link_args: config.extra_link_args,
      extra_dep_paths: config.extra_deps.into_iter().map(|p| dir.join(p)).collect(),
      modules: module_ids,
    };
    self.pkg_by_name.insert(package.name.clone(), id);
    self.packages.push(package);
    Ok(id)
  }

  fn check_package_graph(&self) -> Result<(), BuildError> {
    let mut graph = DiGraph::<PackageId, ()>::new();
    let nodes: Vec<_> = self.packages.iter().map(|p| graph.add_node(p.id)).collect();
    for package in &self.packages {
      for dep in &package.deps {
        graph.add_edge(nodes[dep.0 as usize], nodes[package.id.0 as usize], ());
      }
    }
    toposort(&graph, None)
      .map(|_| ())
      .map_err(|cycle| BuildError::PackageCycle(self.packages[graph[cycle.node_id()].0 as usize].name.clone()))
  }

  pub fn package(&self, id: PackageId) -> &Package {
    &self.packages[id.0 as usize]
  }

  pub fn module(&self, id: ModuleId) -> &Module {
    &self.modules[id.0 as usize]
  }

  pub fn packages(&self) -> impl Iterator<Item = &Package> {
    self.packages.iter()
  }

  pub fn find_package(&self, name: &str) -> Option<PackageId> {
    self.pkg_by_name.get(name).copied()
  }

  /// Package-qualified module lookup used by import resolution.
  pub fn find_module(&self, name: &str) -> Option<ModuleId> {
    self.module_index.get(name).copied()
  }

  /// Root modules of a package: the configured roots, or every scanned
  /// module when none are configured.
  pub fn root_modules(&self, id: PackageId) -> Vec<ModuleId> {
    let package = self.package(id);
    if package.roots.is_empty() {
      return package.modules.clone();
    }
    package
      .roots
      .iter()
      .filter_map(|name| self.find_module(name))
      .collect()
  }

  /// Transitive dependency packages of `id` (excluding `id`), breadth-first
  /// and deduplicated.
  pub fn dep_closure(&self, id: PackageId) -> Vec<PackageId> {
    let mut order = Vec::new();
    let mut seen = HashSet::from([id]);
    let mut queue: VecDeque<PackageId> = self.package(id).deps.iter().copied().collect();
    while let Some(next) = queue.pop_front() {
      if !seen.insert(next) {
        continue;
      }
      order.push(next);
      queue.extend(self.package(next).deps.iter().copied());
    }
    order
  }

  /// Compiler search directories for building `id`: its own output dir plus
  /// those of its dependency closure. Also returns the matching source dirs.
  pub fn search_dirs(&self, id: PackageId) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut outs = vec![self.package(id).out_dir.clone()];
    let mut srcs = vec![self.package(id).src_dir.clone()];
    for dep in self.dep_closure(id) {
      outs.push(self.package(dep).out_dir.clone());
      srcs.push(self.package(dep).src_dir.clone());
    }
    (outs, srcs)
  }

  /// Deterministic on-disk location of one facet of a module.
  ///
  /// Distinct keys never map to the same path, which is what lets branches
  /// build fully in parallel without file locks.
  pub fn artifact_path(&self, id: ModuleId, facet: Facet) -> PathBuf {
    let module = self.module(id);
    let out_dir = &self.package(module.package).out_dir;
    let rel = module_rel_path(&module.name);
    match facet {
      Facet::Bin => out_dir.join(&rel).with_extension("qo"),
      Facet::Iface => out_dir.join(&rel).with_extension("qi"),
      Facet::C => out_dir.join(&rel).with_extension("c"),
      Facet::Obj => out_dir.join(&rel).with_extension("o"),
      Facet::Dynlib => {
        // Keeps the source directory layout: `A.B` maps to `A/libB.<ext>`,
        // so it cannot collide with a flat module named `A_B`.
        let stem = module.name.rsplit('.').next().unwrap_or(&module.name);
        let mut path = out_dir.join(&rel);
        path.set_file_name(format!("lib{stem}.{DYNLIB_EXT}"));
        path
      }
    }
  }
}

/// Path of the persisted trace file for an artifact.
pub fn trace_path(artifact: &Path) -> PathBuf {
  let mut os = artifact.as_os_str().to_os_string();
  os.push(".trace");
  PathBuf::from(os)
}
