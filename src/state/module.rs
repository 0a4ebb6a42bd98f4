use crate::resolver::{Files, ModuleMeta, ModuleSchema, ReferenceOrigin, ReferenceTarget};
use crate::state::historic::StateResource;
use crate::syntax::ParsedFile;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// One loaded configuration module.
#[derive(Debug)]
pub struct Module {
    pub(crate) path: PathBuf,
    pub(crate) files: Files,
    pub(crate) meta: ModuleMeta,
    /// Historic state keyed by relative, non-indexed address.
    pub(crate) resources: BTreeMap<String, StateResource>,
    pub(crate) origins: Vec<ReferenceOrigin>,
    pub(crate) targets: Vec<ReferenceTarget>,
    pub(crate) schema: OnceLock<ModuleSchema>,
}

impl Module {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn files(&self) -> &Files {
        &self.files
    }

    pub fn file(&self, name: &str) -> Option<&ParsedFile> {
        self.files.get(name)
    }

    pub fn meta(&self) -> &ModuleMeta {
        &self.meta
    }

    pub fn state_resources(&self) -> &BTreeMap<String, StateResource> {
        &self.resources
    }

    pub fn state_resource(&self, address: &str) -> Option<&StateResource> {
        self.resources.get(address)
    }

    pub fn origins(&self) -> &[ReferenceOrigin] {
        &self.origins
    }

    pub fn targets(&self) -> &[ReferenceTarget] {
        &self.targets
    }

    /// The module schema, computed by `init` on first access.
    pub fn schema_with(&self, init: impl FnOnce() -> ModuleSchema) -> &ModuleSchema {
        self.schema.get_or_init(init)
    }

    pub fn schema_computed(&self) -> bool {
        self.schema.get().is_some()
    }
}
