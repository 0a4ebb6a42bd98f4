//! Module metadata and reference resolution.
//!
//! A [`Resolver`] turns the parsed files of one module into its
//! [`ModuleMeta`], collects the reference origins and targets it declares,
//! and answers "what does the reference at this position point to".
//! [`ScanResolver`] implements it over the scan parser's output.

pub mod errors;
pub mod scan;

pub use errors::ResolveError;
pub use scan::ScanResolver;

use crate::schema::{BlockType, ProviderAddr, ProviderSchemas};
use crate::state::RootState;
use crate::syntax::{ParsedFile, Parser, SourceRange};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Parsed files of one module, keyed by file name.
pub type Files = BTreeMap<String, ParsedFile>;

/// A reference address such as `data.widget.x.tags["k"]`.
///
/// Index segments are stored with their brackets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub Vec<String>);

impl Address {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn starts_with(&self, prefix: &Address) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 && !segment.starts_with('[') {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

/// Where a module call's code comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// Relative path, starting with `./` or `../`.
    Local(String),
    /// Registry address: `[host/]namespace/name/system[//subdir]`.
    Registry(String),
    /// Anything else (git, http, s3, ...).
    Remote(String),
}

impl ModuleSource {
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("./") || raw.starts_with("../") {
            return ModuleSource::Local(raw.to_string());
        }

        let package = raw.split("//").next().unwrap_or(raw);
        let segments: Vec<&str> = package.split('/').collect();
        let plain = |s: &&str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        };
        let registry = !raw.contains("::")
            && !raw.contains("://")
            && matches!(segments.len(), 3 | 4)
            && segments.iter().all(plain);

        if registry {
            ModuleSource::Registry(raw.to_string())
        } else {
            ModuleSource::Remote(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ModuleSource::Local(s) | ModuleSource::Registry(s) | ModuleSource::Remote(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCall {
    pub local_name: String,
    pub raw_source: String,
    pub source: ModuleSource,
    pub version: Option<String>,
    /// Input variables assigned in the call, sorted.
    pub input_names: Vec<String>,
    pub range: SourceRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequirement {
    pub local_name: String,
    pub addr: ProviderAddr,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub range: SourceRange,
}

/// A `resource` or `data` block declared by a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredBlock {
    pub block_type: BlockType,
    pub type_name: String,
    pub name: String,
    /// Local provider name from the `provider` meta-argument, if set.
    pub provider: Option<String>,
    pub range: SourceRange,
}

impl DeclaredBlock {
    /// Local name of the provider this block belongs to: the explicit
    /// meta-argument, else the type name's prefix (`azurerm_x` -> `azurerm`).
    pub fn provider_local_name(&self) -> &str {
        match &self.provider {
            Some(name) => name,
            None => self
                .type_name
                .split_once('_')
                .map_or(self.type_name.as_str(), |(prefix, _)| prefix),
        }
    }
}

/// Lightweight metadata decoded from a module's files without schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleMeta {
    pub path: PathBuf,
    pub filenames: Vec<String>,
    pub module_calls: BTreeMap<String, ModuleCall>,
    pub provider_requirements: BTreeMap<String, ProviderRequirement>,
    pub variables: BTreeMap<String, Variable>,
    pub blocks: Vec<DeclaredBlock>,
}

impl ModuleMeta {
    /// Provider address for a local provider name, falling back to the
    /// implied `hashicorp` address when not declared.
    pub fn provider_addr(&self, local_name: &str) -> ProviderAddr {
        self.provider_requirements
            .get(local_name)
            .map_or_else(|| ProviderAddr::implied(local_name), |r| r.addr.clone())
    }
}

/// Which provider owns each resource and datasource type used by a module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleSchema {
    pub resources: BTreeMap<String, ProviderAddr>,
    pub data_sources: BTreeMap<String, ProviderAddr>,
}

impl ModuleSchema {
    pub fn owner(&self, block_type: BlockType, type_name: &str) -> Option<&ProviderAddr> {
        match block_type {
            BlockType::Resource => self.resources.get(type_name),
            BlockType::DataSource => self.data_sources.get(type_name),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.data_sources.is_empty()
    }
}

/// A reference to something declared in the same module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalOrigin {
    pub addr: Address,
    pub range: SourceRange,
}

/// A reference to a provider configuration (`provider = azurerm.west`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectOrigin {
    pub range: SourceRange,
    pub target_path: PathBuf,
    pub target_addr: Address,
}

/// A module-call input pointing at a variable of the called module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathOrigin {
    pub range: SourceRange,
    pub target_path: PathBuf,
    pub target_addr: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceOrigin {
    Local(LocalOrigin),
    Direct(DirectOrigin),
    Path(PathOrigin),
}

impl ReferenceOrigin {
    pub fn range(&self) -> &SourceRange {
        match self {
            ReferenceOrigin::Local(o) => &o.range,
            ReferenceOrigin::Direct(o) => &o.range,
            ReferenceOrigin::Path(o) => &o.range,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReferenceOrigin::Local(_) => "local",
            ReferenceOrigin::Direct(_) => "direct",
            ReferenceOrigin::Path(_) => "path",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Resource,
    DataSource,
    Variable,
    Local,
    ModuleCall,
    Attribute,
    Block,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetKind::Resource => "resource",
            TargetKind::DataSource => "data source",
            TargetKind::Variable => "variable",
            TargetKind::Local => "local value",
            TargetKind::ModuleCall => "module call",
            TargetKind::Attribute => "attribute",
            TargetKind::Block => "block",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
    pub addr: Address,
    /// Module the target is declared in.
    pub path: PathBuf,
    pub range: Option<SourceRange>,
    pub kind: TargetKind,
    pub nested: Vec<ReferenceTarget>,
}

impl ReferenceTarget {
    /// This target followed by every nested target, depth first.
    pub fn flatten(&self) -> Vec<&ReferenceTarget> {
        let mut out = vec![self];
        for nested in &self.nested {
            out.extend(nested.flatten());
        }
        out
    }
}

pub trait Resolver {
    fn parser(&self) -> &dyn Parser;

    fn load_meta(&self, path: &Path, files: &Files) -> Result<ModuleMeta, ResolveError>;

    fn module_schema(&self, meta: &ModuleMeta, schemas: &ProviderSchemas) -> ModuleSchema;

    /// Reference origins of a module, ordered by file name then offset.
    fn collect_origins(&self, path: &Path, files: &Files, meta: &ModuleMeta) -> Vec<ReferenceOrigin>;

    fn collect_targets(&self, path: &Path, files: &Files, meta: &ModuleMeta) -> Vec<ReferenceTarget>;

    /// Targets of the reference origin at `pos` in `filename` of the module
    /// at `module_path`. More than one target means the configuration
    /// declares the same address twice.
    fn resolve_origin(
        &self,
        root: &RootState,
        module_path: &Path,
        filename: &str,
        pos: usize,
    ) -> Result<Vec<ReferenceTarget>, ResolveError>;
}
