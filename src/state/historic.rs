//! Historic infrastructure state, in the `terraform show -json` layout.
//!
//! Only the `values.root_module` tree is read. Each module node lists its
//! resources with absolute addresses and nests its child modules.

use crate::schema::BlockType;
use crate::state::errors::StateError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub format_version: Option<String>,
    #[serde(default)]
    pub values: Option<StateValues>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StateValues {
    #[serde(default)]
    pub root_module: StateModule,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StateModule {
    /// Empty for the root module, `module.a.module.b` below it.
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub resources: Vec<StateResource>,
    #[serde(default)]
    pub child_modules: Vec<StateModule>,
}

/// One recorded resource instance. Serialized back to JSON as the prior
/// state attached to definition rewrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateResource {
    pub address: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub schema_version: i64,
    #[serde(default)]
    pub values: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitive_values: Option<serde_json::Value>,
}

impl StateResource {
    pub fn block_type(&self) -> Option<BlockType> {
        match self.mode.as_str() {
            "managed" => Some(BlockType::Resource),
            "data" => Some(BlockType::DataSource),
            _ => None,
        }
    }

    /// Address relative to the owning module, without index.
    pub fn relative_address(&self) -> Option<String> {
        Some(self.block_type()?.address(&self.type_name, &self.name))
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }
}

impl StateDocument {
    pub fn from_json_str(input: &str, path: &Path) -> Result<Self, StateError> {
        serde_json::from_str(input).map_err(|source| StateError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents, path)
    }

    /// The root module node; empty when the state records nothing.
    pub fn root_module(&self) -> Option<&StateModule> {
        self.values.as_ref().map(|v| &v.root_module)
    }
}

impl StateModule {
    /// Non-indexed resources keyed by relative address (`type.name`,
    /// `data.type.name`). Instances created by `count` or `for_each` are
    /// skipped.
    pub fn resources_by_address(&self) -> Result<BTreeMap<String, StateResource>, StateError> {
        let mut out = BTreeMap::new();
        for resource in &self.resources {
            if resource.is_indexed() {
                continue;
            }
            let Some(address) = resource.relative_address() else {
                continue;
            };
            if out.insert(address.clone(), resource.clone()).is_some() {
                return Err(StateError::DuplicateResource {
                    module: self.display_address().to_string(),
                    address,
                });
            }
        }
        Ok(out)
    }

    /// The child node recorded for module call `name`.
    ///
    /// Indexed module instances (`module.x[0]`, `module.x["k"]`) cannot be
    /// mapped onto a single configuration directory and are rejected.
    pub fn child_for_call(&self, name: &str) -> Result<Option<&StateModule>, StateError> {
        let expected = format!("module.{name}");
        for child in &self.child_modules {
            let relative = if self.address.is_empty() {
                child.address.as_str()
            } else {
                child
                    .address
                    .strip_prefix(self.address.as_str())
                    .and_then(|rest| rest.strip_prefix('.'))
                    .unwrap_or(child.address.as_str())
            };
            if relative == expected {
                return Ok(Some(child));
            }
            if relative.starts_with(&format!("{expected}[")) {
                return Err(StateError::IndexedModule {
                    address: child.address.clone(),
                });
            }
        }
        Ok(None)
    }

    fn display_address(&self) -> &str {
        if self.address.is_empty() {
            "root module"
        } else {
            &self.address
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATE_JSON: &str = r#"{
        "format_version": "1.0",
        "terraform_version": "1.9.0",
        "values": {
            "root_module": {
                "resources": [
                    {
                        "address": "widget.x",
                        "mode": "managed",
                        "type": "widget",
                        "name": "x",
                        "provider_name": "registry.terraform.io/hashicorp/widget",
                        "schema_version": 1,
                        "values": {"id": "w-1"}
                    },
                    {
                        "address": "widget.many[0]",
                        "mode": "managed",
                        "type": "widget",
                        "name": "many",
                        "index": 0,
                        "values": {}
                    },
                    {
                        "address": "data.widget.lookup",
                        "mode": "data",
                        "type": "widget",
                        "name": "lookup",
                        "values": {"name": "a"}
                    }
                ],
                "child_modules": [
                    {
                        "address": "module.net",
                        "resources": [],
                        "child_modules": [
                            {"address": "module.net.module.inner", "resources": []}
                        ]
                    },
                    {"address": "module.fleet[0]", "resources": []}
                ]
            }
        }
    }"#;

    fn document() -> StateDocument {
        StateDocument::from_json_str(STATE_JSON, Path::new("state.json")).unwrap()
    }

    #[test]
    fn test_resources_by_address_skips_indexed() {
        let doc = document();
        let resources = doc.root_module().unwrap().resources_by_address().unwrap();
        let keys: Vec<&str> = resources.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["data.widget.lookup", "widget.x"]);
        assert_eq!(resources["widget.x"].schema_version, 1);
    }

    #[test]
    fn test_child_for_call() {
        let doc = document();
        let root = doc.root_module().unwrap();

        let net = root.child_for_call("net").unwrap().unwrap();
        assert_eq!(net.address, "module.net");
        let inner = net.child_for_call("inner").unwrap().unwrap();
        assert_eq!(inner.address, "module.net.module.inner");
        assert!(root.child_for_call("missing").unwrap().is_none());
    }

    #[test]
    fn test_indexed_module_rejected() {
        let doc = document();
        let err = doc.root_module().unwrap().child_for_call("fleet").unwrap_err();
        assert!(matches!(err, StateError::IndexedModule { ref address } if address == "module.fleet[0]"));
    }

    #[test]
    fn test_duplicate_resource() {
        let module = StateModule {
            address: String::new(),
            resources: vec![
                serde_json::from_str(r#"{"address":"widget.x","mode":"managed","type":"widget","name":"x"}"#).unwrap(),
                serde_json::from_str(r#"{"address":"widget.x","mode":"managed","type":"widget","name":"x"}"#).unwrap(),
            ],
            child_modules: vec![],
        };
        assert!(matches!(
            module.resources_by_address(),
            Err(StateError::DuplicateResource { .. })
        ));
    }

    #[test]
    fn test_serialize_omits_absent_fields() {
        let doc = document();
        let resources = doc.root_module().unwrap().resources_by_address().unwrap();
        let json = serde_json::to_value(&resources["data.widget.lookup"]).unwrap();
        assert_eq!(json["type"], "widget");
        assert!(json.get("index").is_none());
    }

    #[test]
    fn test_empty_state() {
        let doc = StateDocument::from_json_str(r#"{"format_version":"1.0"}"#, Path::new("s.json")).unwrap();
        assert!(doc.root_module().is_none());
    }
}
