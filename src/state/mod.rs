//! Module graph of one configuration tree.
//!
//! [`RootState`] is built by a depth-first walk from the root module:
//! every local module call is followed once (the map of loaded modules
//! doubles as the visited set, so diamonds are loaded a single time),
//! registry and remote calls are skipped. A module that fails to load is
//! recorded and its siblings are still attempted. Historic state is
//! threaded down the walk by module call name.
//!
//! The value is immutable once built. [`RootState::rebuild`] produces a
//! fresh value from the current filesystem content.

pub mod errors;
pub mod historic;
pub mod manifest;
pub mod module;

pub use errors::StateError;
pub use historic::{StateDocument, StateModule, StateResource};
pub use manifest::{InstalledModules, ModuleManifest};
pub use module::Module;

use crate::resolver::scan::local_call_path;
use crate::resolver::{Files, ModuleSchema, Resolver};
use crate::schema::ProviderSchemas;
use crate::syntax::is_config_file;
use crate::vfs::{clean_path, MemFs};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct RootState {
    root_path: PathBuf,
    schemas: Arc<ProviderSchemas>,
    historic: Option<Arc<StateDocument>>,
    manifest: Option<ModuleManifest>,
    installed: InstalledModules,
    modules: BTreeMap<PathBuf, Module>,
}

impl RootState {
    /// Discover and load every module reachable from the filesystem root.
    ///
    /// Any module failure fails the build; see [`build_lenient`] to keep
    /// the modules that did load.
    ///
    /// [`build_lenient`]: RootState::build_lenient
    pub fn build(
        fs: &MemFs,
        resolver: &dyn Resolver,
        schemas: Arc<ProviderSchemas>,
        historic: Option<Arc<StateDocument>>,
    ) -> Result<Self, StateError> {
        let (state, error) = Self::build_lenient(fs, resolver, schemas, historic)?;
        match error {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }

    /// Like [`build`](RootState::build), but module failures are returned
    /// next to the partial state. Only an unreadable manifest is fatal.
    pub fn build_lenient(
        fs: &MemFs,
        resolver: &dyn Resolver,
        schemas: Arc<ProviderSchemas>,
        historic: Option<Arc<StateDocument>>,
    ) -> Result<(Self, Option<StateError>), StateError> {
        let root_path = fs.base().to_path_buf();
        let manifest = ModuleManifest::load_for(&root_path)?;
        let installed = manifest
            .as_ref()
            .map(InstalledModules::from_manifest)
            .unwrap_or_default();

        let mut discovery = Discovery {
            fs,
            resolver,
            visited: BTreeSet::new(),
            modules: BTreeMap::new(),
            errors: Vec::new(),
        };
        let root_historic = historic.as_deref().and_then(StateDocument::root_module);
        discovery.visit(root_path.clone(), root_historic);

        let Discovery {
            mut modules,
            errors,
            ..
        } = discovery;

        for module in modules.values_mut() {
            module.origins = resolver.collect_origins(&module.path, &module.files, &module.meta);
            module.targets = resolver.collect_targets(&module.path, &module.files, &module.meta);
        }

        debug!(
            root = %root_path.display(),
            modules = modules.len(),
            failures = errors.len(),
            "built root state"
        );

        let state = RootState {
            root_path,
            schemas,
            historic,
            manifest,
            installed,
            modules,
        };
        Ok((state, StateError::from_errors(errors)))
    }

    /// A fresh state built from the current filesystem content, sharing
    /// this state's schemas and historic state.
    pub fn rebuild(&self, fs: &MemFs, resolver: &dyn Resolver) -> Result<Self, StateError> {
        Self::build(fs, resolver, Arc::clone(&self.schemas), self.historic.clone())
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn root_module(&self) -> Option<&Module> {
        self.modules.get(&self.root_path)
    }

    pub fn module(&self, path: &Path) -> Option<&Module> {
        self.modules
            .get(path)
            .or_else(|| self.modules.get(&clean_path(path)))
    }

    /// Modules keyed by path, in path order.
    pub fn modules(&self) -> impl Iterator<Item = (&Path, &Module)> {
        self.modules.iter().map(|(path, module)| (path.as_path(), module))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn schemas(&self) -> &ProviderSchemas {
        &self.schemas
    }

    pub fn manifest(&self) -> Option<&ModuleManifest> {
        self.manifest.as_ref()
    }

    pub fn installed(&self) -> &InstalledModules {
        &self.installed
    }

    /// The module's schema, computed on first access.
    pub fn module_schema(&self, resolver: &dyn Resolver, path: &Path) -> Option<&ModuleSchema> {
        let module = self.module(path)?;
        Some(module.schema_with(|| resolver.module_schema(module.meta(), &self.schemas)))
    }
}

struct Discovery<'a> {
    fs: &'a MemFs,
    resolver: &'a dyn Resolver,
    visited: BTreeSet<PathBuf>,
    modules: BTreeMap<PathBuf, Module>,
    errors: Vec<StateError>,
}

impl Discovery<'_> {
    fn visit(&mut self, path: PathBuf, historic: Option<&StateModule>) {
        if !self.visited.insert(path.clone()) {
            return;
        }
        debug!(path = %path.display(), "loading module");

        let module = match self.load(&path, historic) {
            Ok(module) => module,
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to load module");
                self.errors.push(error);
                return;
            }
        };

        let calls: Vec<(String, PathBuf)> = module
            .meta
            .module_calls
            .values()
            .filter_map(|call| local_call_path(&path, call).map(|p| (call.local_name.clone(), p)))
            .collect();
        self.modules.insert(path.clone(), module);

        for (name, child) in calls {
            match self.fs.stat(&child) {
                Ok(info) if info.is_dir => {}
                Ok(_) => {
                    self.errors.push(StateError::NotADirectory {
                        parent: path.clone(),
                        name,
                        path: child,
                    });
                    continue;
                }
                Err(source) => {
                    self.errors.push(StateError::Vfs { path: child, source });
                    continue;
                }
            }
            if self.visited.contains(&child) {
                continue;
            }

            let child_historic = match historic.map(|h| h.child_for_call(&name)).transpose() {
                Ok(found) => found.flatten(),
                Err(error) => {
                    self.errors.push(error);
                    continue;
                }
            };
            self.visit(child, child_historic);
        }
    }

    fn load(&self, path: &Path, historic: Option<&StateModule>) -> Result<Module, StateError> {
        let vfs_error = |source| StateError::Vfs {
            path: path.to_path_buf(),
            source,
        };

        let mut files = Files::new();
        for entry in self.fs.read_dir(path).map_err(vfs_error)? {
            if entry.is_dir() || !is_config_file(entry.name()) {
                continue;
            }
            let bytes = self.fs.read_file(path.join(entry.name())).map_err(vfs_error)?;
            let parsed = self
                .resolver
                .parser()
                .parse(&bytes, entry.name())
                .map_err(|source| StateError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            files.insert(entry.name().to_string(), parsed);
        }

        let meta = self
            .resolver
            .load_meta(path, &files)
            .map_err(|source| StateError::Resolve {
                path: path.to_path_buf(),
                source,
            })?;

        let resources = match historic {
            Some(historic) => historic.resources_by_address()?,
            None => BTreeMap::new(),
        };

        Ok(Module {
            path: path.to_path_buf(),
            files,
            meta,
            resources,
            origins: Vec::new(),
            targets: Vec::new(),
            schema: OnceLock::new(),
        })
    }
}
