//! Resolver over [`HclParser`] output.
//!
//! Origins are the variable traversals found in attribute expressions.
//! Targets are the addressable declarations of a module: resources, data
//! sources, variables, locals and module calls, with their attributes and
//! nested block types as nested targets. An origin resolves to the targets
//! sharing the longest address prefix with it.

use crate::resolver::errors::ResolveError;
use crate::resolver::{
    Address, DeclaredBlock, DirectOrigin, Files, LocalOrigin, ModuleCall, ModuleMeta,
    ModuleSchema, ModuleSource, PathOrigin, ProviderRequirement, ReferenceOrigin,
    ReferenceTarget, Resolver, TargetKind, Variable,
};
use crate::schema::{BlockType, ProviderAddr, ProviderSchemas};
use crate::state::RootState;
use crate::syntax::{Block, Body, HclParser, ParsedFile, Parser, Traversal, TraversalStep};
use crate::vfs::clean_path;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Module block arguments that are not input variables.
const MODULE_META_ARGS: &[&str] = &["source", "version", "count", "for_each", "providers", "depends_on"];

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanResolver {
    parser: HclParser,
}

impl ScanResolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Resolver for ScanResolver {
    fn parser(&self) -> &dyn Parser {
        &self.parser
    }

    fn load_meta(&self, path: &Path, files: &Files) -> Result<ModuleMeta, ResolveError> {
        let mut meta = ModuleMeta {
            path: path.to_path_buf(),
            filenames: files.keys().cloned().collect(),
            ..ModuleMeta::default()
        };

        for file in files.values() {
            for block in file.blocks() {
                match (block.block_type.as_str(), block.labels.as_slice()) {
                    ("module", [name]) => {
                        let call = module_call(name, block)?;
                        if let Some(existing) = meta.module_calls.get(name) {
                            return Err(ResolveError::DuplicateModuleCall {
                                name: name.clone(),
                                first: existing.range.clone(),
                                second: call.range,
                            });
                        }
                        meta.module_calls.insert(name.clone(), call);
                    }
                    ("terraform", []) => {
                        for required in block.body.blocks_of_type("required_providers") {
                            for attr in &required.body.attributes {
                                let requirement = provider_requirement(file, &attr.name, attr)?;
                                meta.provider_requirements
                                    .insert(attr.name.clone(), requirement);
                            }
                        }
                    }
                    ("variable", [name]) => {
                        meta.variables.insert(
                            name.clone(),
                            Variable {
                                name: name.clone(),
                                range: block.range.clone(),
                            },
                        );
                    }
                    (keyword, [type_name, name]) => {
                        if let Some(block_type) = BlockType::from_keyword(keyword) {
                            let provider = block
                                .body
                                .attribute("provider")
                                .and_then(|a| a.expr.traversals.first())
                                .map(|t| t.root().to_string());
                            meta.blocks.push(DeclaredBlock {
                                block_type,
                                type_name: type_name.clone(),
                                name: name.clone(),
                                provider,
                                range: block.range.clone(),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(meta)
    }

    fn module_schema(&self, meta: &ModuleMeta, schemas: &ProviderSchemas) -> ModuleSchema {
        let mut schema = ModuleSchema::default();
        for block in &meta.blocks {
            let addr = meta.provider_addr(block.provider_local_name());
            let owned = schemas
                .get(&addr)
                .is_some_and(|p| p.owns(block.block_type, &block.type_name));
            if !owned {
                continue;
            }
            let map = match block.block_type {
                BlockType::Resource => &mut schema.resources,
                BlockType::DataSource => &mut schema.data_sources,
            };
            map.insert(block.type_name.clone(), addr);
        }
        schema
    }

    fn collect_origins(&self, path: &Path, files: &Files, meta: &ModuleMeta) -> Vec<ReferenceOrigin> {
        let mut origins = Vec::new();
        for file in files.values() {
            for attr in &file.body.attributes {
                origins.extend(local_origins(&attr.expr.traversals));
            }
            for block in file.blocks() {
                block_origins(path, meta, block, &mut origins);
            }
        }
        origins.sort_by(|a, b| {
            let (a, b) = (a.range(), b.range());
            (&a.filename, a.start()).cmp(&(&b.filename, b.start()))
        });
        trace!(path = %path.display(), count = origins.len(), "collected reference origins");
        origins
    }

    fn collect_targets(&self, path: &Path, files: &Files, _meta: &ModuleMeta) -> Vec<ReferenceTarget> {
        let mut targets = Vec::new();
        for file in files.values() {
            for block in file.blocks() {
                targets.extend(block_targets(path, file, block));
            }
        }
        trace!(path = %path.display(), count = targets.len(), "collected reference targets");
        targets
    }

    fn resolve_origin(
        &self,
        root: &RootState,
        module_path: &Path,
        filename: &str,
        pos: usize,
    ) -> Result<Vec<ReferenceTarget>, ResolveError> {
        let module = root
            .module(module_path)
            .ok_or_else(|| ResolveError::UnknownModule(module_path.to_path_buf()))?;

        let origin = module
            .origins()
            .iter()
            .find_map(|origin| match origin {
                ReferenceOrigin::Local(local)
                    if local.range.filename == filename
                        && (local.range.range.contains(pos) || local.range.start() == pos) =>
                {
                    Some(local)
                }
                _ => None,
            })
            .ok_or_else(|| ResolveError::NoOriginAt {
                path: module_path.to_path_buf(),
                filename: filename.to_string(),
                pos,
            })?;

        let mut longest = 0;
        let mut matched: Vec<ReferenceTarget> = Vec::new();
        for target in module.targets().iter().flat_map(ReferenceTarget::flatten) {
            if target.addr.is_empty() || !origin.addr.starts_with(&target.addr) {
                continue;
            }
            let len = target.addr.len();
            if len > longest {
                longest = len;
                matched.clear();
            }
            if len == longest {
                matched.push(target.clone());
            }
        }
        Ok(matched)
    }
}

fn module_call(name: &str, block: &Block) -> Result<ModuleCall, ResolveError> {
    let raw_source = block
        .body
        .attribute("source")
        .and_then(|a| a.expr.literal.clone())
        .ok_or_else(|| ResolveError::MissingSource {
            name: name.to_string(),
            range: block.def_range.clone(),
        })?;

    let mut input_names: Vec<String> = block
        .body
        .attributes
        .iter()
        .filter(|a| !MODULE_META_ARGS.contains(&a.name.as_str()))
        .map(|a| a.name.clone())
        .collect();
    input_names.sort();

    Ok(ModuleCall {
        local_name: name.to_string(),
        source: ModuleSource::parse(&raw_source),
        raw_source,
        version: block.body.attribute("version").and_then(|a| a.expr.literal.clone()),
        input_names,
        range: block.range.clone(),
    })
}

/// Decode one `required_providers` entry, either the object form
/// `{ source = "...", version = "..." }` or a legacy version string.
fn provider_requirement(
    file: &ParsedFile,
    local_name: &str,
    attr: &crate::syntax::Attribute,
) -> Result<ProviderRequirement, ResolveError> {
    if let Some(version) = &attr.expr.literal {
        return Ok(ProviderRequirement {
            local_name: local_name.to_string(),
            addr: ProviderAddr::implied(local_name),
            version: Some(version.clone()),
        });
    }

    let text = file
        .slice(&attr.expr.range)
        .map(String::from_utf8_lossy)
        .unwrap_or_default();
    let addr = match string_field(&text, "source") {
        Some(source) => source
            .parse()
            .map_err(|source| ResolveError::InvalidProviderSource {
                local_name: local_name.to_string(),
                source,
            })?,
        None => ProviderAddr::implied(local_name),
    };

    Ok(ProviderRequirement {
        local_name: local_name.to_string(),
        addr,
        version: string_field(&text, "version"),
    })
}

/// Find `key = "value"` (or `key: "value"`) inside an object expression.
fn string_field(text: &str, key: &str) -> Option<String> {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    let mut search = 0;
    while let Some(found) = text[search..].find(key) {
        let start = search + found;
        let end = start + key.len();
        search = end;

        if text[..start].chars().next_back().is_some_and(is_ident) {
            continue;
        }
        let rest = text[end..].trim_start_matches([' ', '\t']);
        let Some(rest) = rest.strip_prefix(['=', ':']) else {
            continue;
        };
        let rest = rest.trim_start_matches([' ', '\t']);
        let Some(rest) = rest.strip_prefix('"') else {
            continue;
        };
        if let Some(close) = rest.find('"') {
            return Some(rest[..close].to_string());
        }
    }
    None
}

fn address_of(traversal: &Traversal) -> Address {
    Address(
        traversal
            .steps
            .iter()
            .map(|step| match step {
                TraversalStep::Attr(name) => name.clone(),
                TraversalStep::Index(index) => format!("[{index}]"),
            })
            .collect(),
    )
}

fn local_origins(traversals: &[Traversal]) -> impl Iterator<Item = ReferenceOrigin> + '_ {
    traversals.iter().map(|traversal| {
        ReferenceOrigin::Local(LocalOrigin {
            addr: address_of(traversal),
            range: traversal.range.clone(),
        })
    })
}

fn block_origins(path: &Path, meta: &ModuleMeta, block: &Block, out: &mut Vec<ReferenceOrigin>) {
    let provider_owned = BlockType::from_keyword(&block.block_type).is_some();

    if let ("module", [name]) = (block.block_type.as_str(), block.labels.as_slice()) {
        if let Some(ModuleSource::Local(source)) = meta.module_calls.get(name).map(|c| &c.source) {
            let target_path = clean_path(&path.join(source));
            for attr in &block.body.attributes {
                if MODULE_META_ARGS.contains(&attr.name.as_str()) {
                    continue;
                }
                out.push(ReferenceOrigin::Path(PathOrigin {
                    range: attr.name_range.clone(),
                    target_path: target_path.clone(),
                    target_addr: Address::new(["var", attr.name.as_str()]),
                }));
            }
        }
    }

    for attr in &block.body.attributes {
        if provider_owned && attr.name == "provider" {
            out.extend(attr.expr.traversals.iter().map(|traversal| {
                ReferenceOrigin::Direct(DirectOrigin {
                    range: traversal.range.clone(),
                    target_path: path.to_path_buf(),
                    target_addr: Address::new(["provider"]).child(address_of(traversal).to_string()),
                })
            }));
            continue;
        }
        out.extend(local_origins(&attr.expr.traversals));
    }

    for nested in &block.body.blocks {
        nested_origins(nested, out);
    }
}

fn nested_origins(block: &Block, out: &mut Vec<ReferenceOrigin>) {
    for attr in &block.body.attributes {
        out.extend(local_origins(&attr.expr.traversals));
    }
    for nested in &block.body.blocks {
        nested_origins(nested, out);
    }
}

fn block_targets(path: &Path, file: &ParsedFile, block: &Block) -> Vec<ReferenceTarget> {
    let target = |addr: Address, kind, range, nested| ReferenceTarget {
        addr,
        path: path.to_path_buf(),
        range: Some(range),
        kind,
        nested,
    };

    match (block.block_type.as_str(), block.labels.as_slice()) {
        ("resource", [type_name, name]) => {
            let addr = Address::new([type_name.as_str(), name.as_str()]);
            let nested = nested_targets(path, &addr, &block.body);
            vec![target(addr, TargetKind::Resource, block.range.clone(), nested)]
        }
        ("data", [type_name, name]) => {
            let addr = Address::new(["data", type_name.as_str(), name.as_str()]);
            let nested = nested_targets(path, &addr, &block.body);
            vec![target(addr, TargetKind::DataSource, block.range.clone(), nested)]
        }
        ("variable", [name]) => {
            let addr = Address::new(["var", name.as_str()]);
            vec![target(addr, TargetKind::Variable, block.range.clone(), Vec::new())]
        }
        ("module", [name]) => {
            let addr = Address::new(["module", name.as_str()]);
            vec![target(addr, TargetKind::ModuleCall, block.range.clone(), Vec::new())]
        }
        ("locals", []) => block
            .body
            .attributes
            .iter()
            .map(|attr| {
                let addr = Address::new(["local", attr.name.as_str()]);
                target(addr, TargetKind::Local, attr.range.clone(), Vec::new())
            })
            .collect(),
        _ => {
            trace!(file = %file.name, block = %block.block_type, "block declares no targets");
            Vec::new()
        }
    }
}

fn nested_targets(path: &Path, parent: &Address, body: &Body) -> Vec<ReferenceTarget> {
    let mut nested: Vec<ReferenceTarget> = body
        .attributes
        .iter()
        .map(|attr| ReferenceTarget {
            addr: parent.child(attr.name.as_str()),
            path: path.to_path_buf(),
            range: Some(attr.range.clone()),
            kind: TargetKind::Attribute,
            nested: Vec::new(),
        })
        .collect();

    // Repeated nested blocks are addressed by index; the first one stands
    // in for the block type.
    let mut seen: Vec<&str> = Vec::new();
    for block in &body.blocks {
        if seen.contains(&block.block_type.as_str()) {
            continue;
        }
        seen.push(&block.block_type);
        let addr = parent.child(block.block_type.as_str());
        nested.push(ReferenceTarget {
            nested: nested_targets(path, &addr, &block.body),
            addr,
            path: path.to_path_buf(),
            range: Some(block.range.clone()),
            kind: TargetKind::Block,
        });
    }
    nested
}

/// Child module path for a local module call.
pub fn local_call_path(parent: &Path, call: &ModuleCall) -> Option<PathBuf> {
    match &call.source {
        ModuleSource::Local(source) => Some(clean_path(&parent.join(source))),
        ModuleSource::Registry(_) | ModuleSource::Remote(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ProviderSchema;

    fn files(sources: &[(&str, &str)]) -> Files {
        sources
            .iter()
            .map(|(name, src)| {
                let parsed = HclParser.parse(src.as_bytes(), name).unwrap();
                (name.to_string(), parsed)
            })
            .collect()
    }

    const MAIN_TF: &str = r#"terraform {
  required_providers {
    azurerm = {
      source  = "hashicorp/azurerm"
      version = "~> 3.0"
    }
    random = "~> 3.1"
  }
}

variable "location" {}

resource "azurerm_resource_group" "rg" {
  name     = "rg"
  location = var.location
}

module "net" {
  source   = "./modules/net"
  rg_name  = azurerm_resource_group.rg.name
  count    = 1
}

module "remote" {
  source  = "Azure/network/azurerm"
  version = "5.0.0"
}
"#;

    #[test]
    fn test_load_meta() {
        let files = files(&[("main.tf", MAIN_TF)]);
        let meta = ScanResolver::new().load_meta(Path::new("root"), &files).unwrap();

        assert_eq!(meta.filenames, vec!["main.tf"]);
        assert_eq!(meta.module_calls.len(), 2);
        let net = &meta.module_calls["net"];
        assert_eq!(net.source, ModuleSource::Local("./modules/net".to_string()));
        assert_eq!(net.input_names, vec!["rg_name"]);
        let remote = &meta.module_calls["remote"];
        assert!(matches!(remote.source, ModuleSource::Registry(_)));
        assert_eq!(remote.version.as_deref(), Some("5.0.0"));

        let azurerm = &meta.provider_requirements["azurerm"];
        assert_eq!(azurerm.addr.to_string(), "registry.terraform.io/hashicorp/azurerm");
        assert_eq!(azurerm.version.as_deref(), Some("~> 3.0"));
        assert_eq!(meta.provider_requirements["random"].version.as_deref(), Some("~> 3.1"));

        assert!(meta.variables.contains_key("location"));
        assert_eq!(meta.blocks.len(), 1);
        assert_eq!(meta.blocks[0].type_name, "azurerm_resource_group");
    }

    #[test]
    fn test_missing_source_is_error() {
        let files = files(&[("main.tf", "module \"m\" {\n  source = var.x\n}\n")]);
        let err = ScanResolver::new().load_meta(Path::new("."), &files).unwrap_err();
        assert!(matches!(err, ResolveError::MissingSource { ref name, .. } if name == "m"));
    }

    #[test]
    fn test_duplicate_module_call() {
        let files = files(&[
            ("a.tf", "module \"m\" {\n  source = \"./a\"\n}\n"),
            ("b.tf", "module \"m\" {\n  source = \"./b\"\n}\n"),
        ]);
        let err = ScanResolver::new().load_meta(Path::new("."), &files).unwrap_err();
        assert!(matches!(err, ResolveError::DuplicateModuleCall { .. }));
    }

    #[test]
    fn test_collect_origins() {
        let files = files(&[
            ("b.tf", "resource \"widget\" \"b\" {\n  provider = widget.west\n  id = widget.a.id\n}\n"),
            ("a.tf", MAIN_TF),
        ]);
        let resolver = ScanResolver::new();
        let path = Path::new("root");
        let meta = resolver.load_meta(path, &files).unwrap();
        let origins = resolver.collect_origins(path, &files, &meta);

        let summary: Vec<(String, &str, String)> = origins
            .iter()
            .map(|o| {
                let addr = match o {
                    ReferenceOrigin::Local(l) => l.addr.to_string(),
                    ReferenceOrigin::Direct(d) => d.target_addr.to_string(),
                    ReferenceOrigin::Path(p) => {
                        format!("{}:{}", p.target_path.display(), p.target_addr)
                    }
                };
                (o.range().filename.clone(), o.kind(), addr)
            })
            .collect();

        assert_eq!(
            summary,
            vec![
                ("a.tf".to_string(), "local", "var.location".to_string()),
                ("a.tf".to_string(), "path", "root/modules/net:var.rg_name".to_string()),
                ("a.tf".to_string(), "local", "azurerm_resource_group.rg.name".to_string()),
                ("b.tf".to_string(), "direct", "provider.widget.west".to_string()),
                ("b.tf".to_string(), "local", "widget.a.id".to_string()),
            ]
        );
    }

    #[test]
    fn test_collect_targets() {
        let src = "resource \"widget\" \"a\" {\n  id = 1\n  rule {}\n  rule {}\n}\ndata \"widget\" \"d\" {}\nlocals {\n  x = 1\n  y = 2\n}\n";
        let files = files(&[("main.tf", src)]);
        let resolver = ScanResolver::new();
        let path = Path::new(".");
        let meta = resolver.load_meta(path, &files).unwrap();
        let targets = resolver.collect_targets(path, &files, &meta);

        let addrs: Vec<String> = targets
            .iter()
            .flat_map(ReferenceTarget::flatten)
            .map(|t| t.addr.to_string())
            .collect();
        assert_eq!(
            addrs,
            vec!["widget.a", "widget.a.id", "widget.a.rule", "data.widget.d", "local.x", "local.y"]
        );
        assert_eq!(targets[0].kind, TargetKind::Resource);
        assert_eq!(targets[1].kind, TargetKind::DataSource);
    }

    #[test]
    fn test_module_schema() {
        let files = files(&[("main.tf", MAIN_TF)]);
        let resolver = ScanResolver::new();
        let meta = resolver.load_meta(Path::new("."), &files).unwrap();

        let azurerm: ProviderAddr = "hashicorp/azurerm".parse().unwrap();
        let schemas = ProviderSchemas::new().with_provider(
            ProviderSchema::new(azurerm.clone()).with_resource("azurerm_resource_group", 0),
        );
        let schema = resolver.module_schema(&meta, &schemas);
        assert_eq!(
            schema.owner(BlockType::Resource, "azurerm_resource_group"),
            Some(&azurerm)
        );

        let empty = resolver.module_schema(&meta, &ProviderSchemas::new());
        assert!(empty.is_empty());
    }

    #[test]
    fn test_string_field() {
        let text = r#"{ source = "hashicorp/azurerm", version = ">= 3" }"#;
        assert_eq!(string_field(text, "source").as_deref(), Some("hashicorp/azurerm"));
        assert_eq!(string_field(text, "version").as_deref(), Some(">= 3"));
        assert_eq!(string_field(text, "alias"), None);
        assert_eq!(string_field("{ xsource = \"a\" }", "source"), None);
    }
}
