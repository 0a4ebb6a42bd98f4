//! Fix orchestration.
//!
//! A [`Controller`] owns the staging filesystem and the current
//! [`RootState`] and drives the two rewrite phases:
//!
//! 1. [`fix_reference_origins`](Controller::fix_reference_origins): per
//!    module, one fixer call per batch of origins pointing at the same
//!    block type, then every touched file is patched.
//! 2. [`fix_definitions`](Controller::fix_definitions): per module, one
//!    fixer call per owned resource or datasource block.
//!
//! The state must be rebuilt between the phases, since the first one
//! moves byte offsets; [`run`](Controller::run) does it. Within a phase a
//! module's files are only written once every fixer call and every patch
//! for that module succeeded.

use crate::cancel::CancelToken;
use crate::classify::{ClassifyError, Classifier};
use crate::fixer::{check_arity, Fixer, FixerError};
use crate::patch::{update_content, PatchError, Update};
use crate::resolver::Resolver;
use crate::schema::{ProviderAddr, ProviderSchema, ProviderSchemas, SchemaError};
use crate::state::{Module, RootState, StateDocument, StateError};
use crate::syntax::SourceRange;
use crate::vfs::{Materialize, MemFs, VfsError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum FixError {
    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("classifying module {}: {source}", .path.display())]
    Classify {
        path: PathBuf,
        #[source]
        source: ClassifyError,
    },

    #[error("fixer failed for {context} in module {}: {source}", .path.display())]
    Fixer {
        path: PathBuf,
        context: String,
        #[source]
        source: FixerError,
    },

    #[error("failed to update content for {}: {source}", .path.display())]
    Patch {
        path: PathBuf,
        #[source]
        source: PatchError,
    },

    #[error("{} changed since the module state was built; rebuild it first", .path.display())]
    StaleState { path: PathBuf },

    #[error("fix run cancelled")]
    Cancelled,
}

pub struct ControllerOptions {
    /// Provider whose blocks are rewritten.
    pub provider: ProviderAddr,
    pub schemas: Arc<ProviderSchemas>,
    pub historic: Option<Arc<StateDocument>>,
}

/// Counters for one phase (or a whole run).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixSummary {
    pub modules: usize,
    pub requests: usize,
    pub updates: usize,
    pub files: Vec<PathBuf>,
}

impl FixSummary {
    fn merge(&mut self, other: FixSummary) {
        self.modules = self.modules.max(other.modules);
        self.requests += other.requests;
        self.updates += other.updates;
        for file in other.files {
            if !self.files.contains(&file) {
                self.files.push(file);
            }
        }
    }
}

pub struct Controller<R, F> {
    fs: MemFs,
    resolver: R,
    fixer: F,
    provider: ProviderAddr,
    root_state: Arc<RootState>,
}

impl<R: Resolver, F: Fixer> Controller<R, F> {
    /// Build the initial state of the tree in `fs`. Fails when any module
    /// fails to load or the provider has no schema.
    pub fn new(fs: MemFs, resolver: R, fixer: F, options: ControllerOptions) -> Result<Self, FixError> {
        options.schemas.require(&options.provider)?;
        let root_state = RootState::build(&fs, &resolver, options.schemas, options.historic)?;
        info!(
            root = %fs.base().display(),
            provider = %options.provider,
            modules = root_state.len(),
            "loaded configuration"
        );
        Ok(Self {
            fs,
            resolver,
            fixer,
            provider: options.provider,
            root_state: Arc::new(root_state),
        })
    }

    pub fn fs(&self) -> &MemFs {
        &self.fs
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Snapshot of the current state. Later rebuilds never alter it.
    pub fn root_state(&self) -> Arc<RootState> {
        Arc::clone(&self.root_state)
    }

    /// Replace the state with a fresh one built from the current files.
    pub fn update_root_state(&mut self) -> Result<(), FixError> {
        let rebuilt = self.root_state.rebuild(&self.fs, &self.resolver)?;
        debug!(modules = rebuilt.len(), "rebuilt root state");
        self.root_state = Arc::new(rebuilt);
        Ok(())
    }

    fn provider_schema(&self) -> Result<&ProviderSchema, FixError> {
        Ok(self.root_state.schemas().require(&self.provider)?)
    }

    fn classifier(&self) -> Result<Classifier<'_>, FixError> {
        Ok(Classifier::new(
            &self.root_state,
            &self.resolver,
            self.provider_schema()?,
        ))
    }

    /// Rewrite every reference to a block the provider owns.
    pub fn fix_reference_origins(&self, cancel: &CancelToken) -> Result<FixSummary, FixError> {
        let classifier = self.classifier()?;
        let mut summary = FixSummary::default();

        for (path, module) in self.root_state.modules() {
            summary.modules += 1;
            if let Some(schema) = self.root_state.module_schema(&self.resolver, path) {
                debug!(
                    path = %path.display(),
                    resources = schema.resources.len(),
                    data_sources = schema.data_sources.len(),
                    "module schema"
                );
            }

            let batches = classifier
                .batch_origins(module)
                .map_err(|source| FixError::Classify {
                    path: path.to_path_buf(),
                    source,
                })?;

            let mut updates: BTreeMap<String, Vec<Update>> = BTreeMap::new();
            for batch in &batches {
                let context = format!(
                    "{} {} (version {}) references",
                    batch.key.block_type, batch.key.block_name, batch.key.version
                );
                let resp = self.call(cancel, path, &context, |fixer| {
                    let resp = fixer.fix_reference_origins(cancel, &batch.request)?;
                    check_arity(&batch.request, &resp)?;
                    Ok(resp)
                })?;
                summary.requests += 1;

                for (range, content) in batch.ranges.iter().zip(resp.raw_contents) {
                    push_update(&mut updates, range, content);
                }
            }

            summary.updates += updates.values().map(Vec::len).sum::<usize>();
            summary.files.extend(self.apply(module, updates)?);
        }

        info!(
            requests = summary.requests,
            updates = summary.updates,
            files = summary.files.len(),
            "fixed reference origins"
        );
        Ok(summary)
    }

    /// Rewrite every resource and datasource block the provider owns.
    pub fn fix_definitions(&self, cancel: &CancelToken) -> Result<FixSummary, FixError> {
        let classifier = self.classifier()?;
        let mut summary = FixSummary::default();

        for (path, module) in self.root_state.modules() {
            summary.modules += 1;
            let candidates = classifier
                .definitions(module)
                .map_err(|source| FixError::Classify {
                    path: path.to_path_buf(),
                    source,
                })?;

            let mut updates: BTreeMap<String, Vec<Update>> = BTreeMap::new();
            for candidate in &candidates {
                let context = format!("definition {}", candidate.address);
                let resp = self.call(cancel, path, &context, |fixer| {
                    fixer.fix_definition(cancel, &candidate.request)
                })?;
                summary.requests += 1;
                push_update(&mut updates, &candidate.range, resp.raw_content);
            }

            summary.updates += updates.values().map(Vec::len).sum::<usize>();
            summary.files.extend(self.apply(module, updates)?);
        }

        info!(
            requests = summary.requests,
            updates = summary.updates,
            files = summary.files.len(),
            "fixed definitions"
        );
        Ok(summary)
    }

    /// Both phases with the rebuild in between.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<FixSummary, FixError> {
        let mut summary = self.fix_reference_origins(cancel)?;
        self.update_root_state()?;
        summary.merge(self.fix_definitions(cancel)?);
        Ok(summary)
    }

    /// Materialize the staged tree, consuming the controller.
    pub fn write(self, target: Materialize<'_>) -> Result<(), FixError> {
        Ok(self.fs.materialize(target)?)
    }

    pub fn into_fs(self) -> MemFs {
        self.fs
    }

    fn call<T>(
        &self,
        cancel: &CancelToken,
        path: &Path,
        context: &str,
        f: impl FnOnce(&F) -> Result<T, FixerError>,
    ) -> Result<T, FixError> {
        if cancel.is_cancelled() {
            return Err(FixError::Cancelled);
        }
        debug!(path = %path.display(), %context, "calling fixer");
        f(&self.fixer).map_err(|source| match source {
            FixerError::Cancelled => FixError::Cancelled,
            source => FixError::Fixer {
                path: path.to_path_buf(),
                context: context.to_string(),
                source,
            },
        })
    }

    /// Patch every file of `module` with its updates. All patched contents
    /// are computed before the first write.
    fn apply(
        &self,
        module: &Module,
        updates: BTreeMap<String, Vec<Update>>,
    ) -> Result<Vec<PathBuf>, FixError> {
        let mut patched = Vec::with_capacity(updates.len());
        for (filename, updates) in updates {
            let path = module.path().join(&filename);
            let current = self.fs.read_file(&path)?;
            if module.file(&filename).map(|f| f.bytes.as_slice()) != Some(current.as_slice()) {
                return Err(FixError::StaleState { path });
            }
            let content = update_content(&current, &updates)
                .map_err(|source| FixError::Patch {
                    path: path.clone(),
                    source,
                })?;
            patched.push((path, content));
        }

        let mut written = Vec::with_capacity(patched.len());
        for (path, content) in patched {
            debug!(path = %path.display(), bytes = content.len(), "writing patched file");
            self.fs.write_file(&path, content)?;
            written.push(path);
        }
        Ok(written)
    }
}

fn push_update(updates: &mut BTreeMap<String, Vec<Update>>, range: &SourceRange, content: Vec<u8>) {
    updates
        .entry(range.filename.clone())
        .or_default()
        .push(Update::new(range.range, content));
}
