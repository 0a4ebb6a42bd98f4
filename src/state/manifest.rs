//! Module manifest written by `terraform init`.

use crate::schema::addr::DEFAULT_HOSTNAME;
use crate::state::errors::StateError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Location of the manifest relative to a root module.
pub const MANIFEST_PATH: &[&str] = &[".terraform", "modules", "modules.json"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModuleManifest {
    #[serde(rename = "Modules", default)]
    pub records: Vec<ModuleRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModuleRecord {
    /// Dotted module call path (`net.inner`); empty for the root.
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Source", default)]
    pub source: String,
    #[serde(rename = "Version", default)]
    pub version: Option<String>,
    /// Installation directory, relative to the root module.
    #[serde(rename = "Dir")]
    pub dir: String,
}

impl ModuleManifest {
    pub fn path_for(root: &Path) -> PathBuf {
        MANIFEST_PATH.iter().fold(root.to_path_buf(), |p, s| p.join(s))
    }

    /// Read the manifest of the root module at `root`. A missing manifest
    /// (module never initialized) is `Ok(None)`.
    pub fn load_for(root: &Path) -> Result<Option<Self>, StateError> {
        let path = Self::path_for(root);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StateError::Io { path, source }),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| StateError::Json { path, source })
    }

    pub fn record(&self, key: &str) -> Option<&ModuleRecord> {
        self.records.iter().find(|r| r.key == key)
    }
}

/// Installed module directories keyed by normalized source address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledModules(BTreeMap<String, PathBuf>);

impl InstalledModules {
    pub fn from_manifest(manifest: &ModuleManifest) -> Self {
        let map = manifest
            .records
            .iter()
            .filter(|r| !r.key.is_empty() && !r.source.is_empty())
            .map(|r| (normalize_source(&r.source), PathBuf::from(&r.dir)))
            .collect();
        Self(map)
    }

    /// Installation directory for a module source, as written in a module
    /// call.
    pub fn path_for(&self, source: &str) -> Option<&Path> {
        self.0.get(&normalize_source(source)).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Registry sources without a hostname get the default one; registry
/// addresses compare case-insensitively.
pub fn normalize_source(source: &str) -> String {
    let (package, subdir) = match source.split_once("//") {
        Some((package, subdir)) if !package.ends_with(':') => (package, Some(subdir)),
        _ => (source, None),
    };
    let segments: Vec<&str> = package.split('/').collect();
    let registry = !package.contains("::") && matches!(segments.len(), 3 | 4);
    if !registry || source.starts_with('.') {
        return source.to_string();
    }

    let mut normalized = if segments.len() == 3 {
        format!("{DEFAULT_HOSTNAME}/{package}")
    } else {
        package.to_string()
    };
    normalized.make_ascii_lowercase();
    if let Some(subdir) = subdir {
        normalized.push_str("//");
        normalized.push_str(subdir);
    }
    normalized
}
