//! Provider schema registry.
//!
//! Holds, per provider, the resource and datasource block types it owns and
//! the schema version of each. Loaded from the JSON document produced by
//! `terraform providers schema -json`; only the parts the patch engine needs
//! are decoded, the block bodies are kept as raw JSON.

pub mod addr;
pub mod errors;

pub use addr::ProviderAddr;
pub use errors::SchemaError;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Kind of a provider-owned top-level block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockType {
    #[serde(rename = "resource")]
    Resource,
    #[serde(rename = "datasource")]
    DataSource,
}

impl BlockType {
    /// Map a configuration block keyword (`resource`, `data`).
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "resource" => Some(BlockType::Resource),
            "data" => Some(BlockType::DataSource),
            _ => None,
        }
    }

    /// The configuration block keyword.
    pub fn keyword(&self) -> &'static str {
        match self {
            BlockType::Resource => "resource",
            BlockType::DataSource => "data",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Resource => "resource",
            BlockType::DataSource => "datasource",
        }
    }

    /// Relative address of an instance, e.g. `data.azurerm_client_config.this`.
    pub fn address(&self, type_name: &str, name: &str) -> String {
        match self {
            BlockType::Resource => format!("{type_name}.{name}"),
            BlockType::DataSource => format!("data.{type_name}.{name}"),
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema of one resource or datasource type.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BlockSchema {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub block: serde_json::Value,
}

impl BlockSchema {
    pub fn with_version(version: i64) -> Self {
        Self {
            version,
            block: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSchema {
    pub addr: ProviderAddr,
    pub resources: BTreeMap<String, BlockSchema>,
    pub data_sources: BTreeMap<String, BlockSchema>,
}

impl ProviderSchema {
    pub fn new(addr: ProviderAddr) -> Self {
        Self {
            addr,
            resources: BTreeMap::new(),
            data_sources: BTreeMap::new(),
        }
    }

    pub fn with_resource(mut self, name: impl Into<String>, version: i64) -> Self {
        self.resources
            .insert(name.into(), BlockSchema::with_version(version));
        self
    }

    pub fn with_data_source(mut self, name: impl Into<String>, version: i64) -> Self {
        self.data_sources
            .insert(name.into(), BlockSchema::with_version(version));
        self
    }

    pub fn block(&self, block_type: BlockType, name: &str) -> Option<&BlockSchema> {
        match block_type {
            BlockType::Resource => self.resources.get(name),
            BlockType::DataSource => self.data_sources.get(name),
        }
    }

    /// Whether this provider defines `name` for the given block type.
    pub fn owns(&self, block_type: BlockType, name: &str) -> bool {
        self.block(block_type, name).is_some()
    }

    /// Schema version of a block type, 0 when unknown.
    pub fn version_of(&self, block_type: BlockType, name: &str) -> i64 {
        self.block(block_type, name).map_or(0, |b| b.version)
    }
}

#[derive(Debug, Deserialize)]
struct SchemasDocument {
    #[serde(default)]
    provider_schemas: BTreeMap<String, ProviderDocument>,
}

#[derive(Debug, Deserialize)]
struct ProviderDocument {
    #[serde(default)]
    resource_schemas: BTreeMap<String, BlockSchema>,
    #[serde(default)]
    data_source_schemas: BTreeMap<String, BlockSchema>,
}

/// Every provider schema known to a run, keyed by address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderSchemas {
    providers: BTreeMap<ProviderAddr, ProviderSchema>,
}

impl ProviderSchemas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: ProviderSchema) {
        self.providers.insert(schema.addr.clone(), schema);
    }

    pub fn with_provider(mut self, schema: ProviderSchema) -> Self {
        self.insert(schema);
        self
    }

    pub fn from_json_str(input: &str) -> Result<Self, SchemaError> {
        let document: SchemasDocument = serde_json::from_str(input)
            .map_err(|source| SchemaError::Json { path: None, source })?;

        let mut schemas = ProviderSchemas::new();
        for (raw_addr, provider) in document.provider_schemas {
            let addr: ProviderAddr = raw_addr.parse()?;
            schemas.insert(ProviderSchema {
                addr,
                resources: provider.resource_schemas,
                data_sources: provider.data_source_schemas,
            });
        }
        Ok(schemas)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents).map_err(|error| match error {
            SchemaError::Json { path: None, source } => SchemaError::Json {
                path: Some(path.to_path_buf()),
                source,
            },
            other => other,
        })
    }

    pub fn get(&self, addr: &ProviderAddr) -> Option<&ProviderSchema> {
        self.providers.get(addr)
    }

    /// Like [`get`](Self::get), but an unknown address is an error that lists
    /// the known providers and the closest match.
    pub fn require(&self, addr: &ProviderAddr) -> Result<&ProviderSchema, SchemaError> {
        if let Some(schema) = self.providers.get(addr) {
            return Ok(schema);
        }

        let known: Vec<String> = self.providers.keys().map(ToString::to_string).collect();
        let suggestion = self
            .providers
            .keys()
            .map(|k| (strsim::jaro_winkler(&addr.name, &k.name), k))
            .filter(|(score, _)| *score > 0.8)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, k)| k.to_string());

        Err(SchemaError::UnknownProvider {
            addr: addr.to_string(),
            known,
            suggestion,
        })
    }

    /// Provider owning a block type, among `candidates`.
    pub fn owner_of<'a>(
        &'a self,
        candidates: impl IntoIterator<Item = &'a ProviderAddr>,
        block_type: BlockType,
        name: &str,
    ) -> Option<&'a ProviderAddr> {
        candidates.into_iter().find(|addr| {
            self.providers
                .get(*addr)
                .is_some_and(|schema| schema.owns(block_type, name))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderSchema> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
