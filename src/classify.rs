//! Selection and grouping of rewrite candidates.
//!
//! For the provider under fix, the [`Classifier`] picks out of each module
//! (a) the local reference origins whose target lives in a resource or
//! datasource block that provider owns, grouped into one batch per block
//! type, and (b) the owned block definitions themselves.

use crate::fixer::{FixDefinitionRequest, FixReferenceOriginsRequest};
use crate::resolver::{LocalOrigin, ReferenceOrigin, ResolveError, Resolver};
use crate::schema::{BlockType, ProviderSchema};
use crate::state::{Module, RootState};
use crate::syntax::{Block, SourceRange};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("resolving reference origin at {range}: {source}")]
    Resolve {
        range: SourceRange,
        #[source]
        source: ResolveError,
    },

    #[error("resolution inconsistency: unexpected multiple targets ({count}) for origin {addr} ({range})")]
    AmbiguousTarget {
        addr: String,
        range: SourceRange,
        count: usize,
    },

    #[error("resolution inconsistency: target of {addr} ({range}) is in {}, expected {}", .found.display(), .expected.display())]
    ForeignTarget {
        addr: String,
        range: SourceRange,
        expected: PathBuf,
        found: PathBuf,
    },

    #[error("invalid {keyword} definition at {range}: label length is not 2")]
    InvalidBlock {
        keyword: String,
        range: SourceRange,
    },

    #[error("encoding prior state of {address}: {source}")]
    StateJson {
        address: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Identity of a batch: every origin sharing it goes to the fixer together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey {
    pub block_type: BlockType,
    pub block_name: String,
    pub version: i64,
}

/// One fixer request plus the source range of each of its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginBatch {
    pub key: BatchKey,
    pub request: FixReferenceOriginsRequest,
    /// `ranges[i]` is where `request.raw_contents[i]` came from.
    pub ranges: Vec<SourceRange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionCandidate {
    /// Relative address (`type.name` or `data.type.name`).
    pub address: String,
    pub range: SourceRange,
    pub request: FixDefinitionRequest,
}

/// A local origin whose target block the provider owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedOrigin {
    pub origin: LocalOrigin,
    pub block_type: BlockType,
    pub block_name: String,
}

pub struct Classifier<'a> {
    root: &'a RootState,
    resolver: &'a dyn Resolver,
    provider: &'a ProviderSchema,
}

impl<'a> Classifier<'a> {
    pub fn new(root: &'a RootState, resolver: &'a dyn Resolver, provider: &'a ProviderSchema) -> Self {
        Self {
            root,
            resolver,
            provider,
        }
    }

    /// Classify a top-level block: `Some((kind, type))` when it is a
    /// resource or datasource owned by the provider.
    ///
    /// A `resource` or `data` block without exactly two labels is an error.
    pub fn owned_block<'b>(&self, block: &'b Block) -> Result<Option<(BlockType, &'b str)>, ClassifyError> {
        let Some(block_type) = BlockType::from_keyword(&block.block_type) else {
            return Ok(None);
        };
        let [type_name, _name] = block.labels.as_slice() else {
            return Err(ClassifyError::InvalidBlock {
                keyword: block.block_type.clone(),
                range: block.def_range.clone(),
            });
        };
        Ok(self
            .provider
            .owns(block_type, type_name)
            .then_some((block_type, type_name.as_str())))
    }

    /// Local origins of `module` targeting a block the provider owns, in
    /// source order.
    pub fn filter_origins(&self, module: &Module) -> Result<Vec<OwnedOrigin>, ClassifyError> {
        let mut out = Vec::new();
        for origin in module.origins() {
            let origin = match origin {
                ReferenceOrigin::Local(origin) => origin,
                ReferenceOrigin::Direct(_) | ReferenceOrigin::Path(_) => continue,
            };
            let range = &origin.range;

            let targets = self
                .resolver
                .resolve_origin(self.root, module.path(), &range.filename, range.start())
                .map_err(|source| ClassifyError::Resolve {
                    range: range.clone(),
                    source,
                })?;
            let target = match targets.as_slice() {
                [] => continue,
                [target] => target,
                _ => {
                    return Err(ClassifyError::AmbiguousTarget {
                        addr: origin.addr.to_string(),
                        range: range.clone(),
                        count: targets.len(),
                    })
                }
            };

            if target.path != module.path() {
                return Err(ClassifyError::ForeignTarget {
                    addr: origin.addr.to_string(),
                    range: range.clone(),
                    expected: module.path().to_path_buf(),
                    found: target.path.clone(),
                });
            }

            let Some(target_range) = &target.range else {
                continue;
            };
            let Some(block) = module
                .file(&target_range.filename)
                .and_then(|f| f.outermost_block_at(target_range.start()))
            else {
                trace!(addr = %origin.addr, "target outside any top-level block");
                continue;
            };

            if let Some((block_type, block_name)) = self.owned_block(block)? {
                out.push(OwnedOrigin {
                    origin: origin.clone(),
                    block_type,
                    block_name: block_name.to_string(),
                });
            }
        }
        Ok(out)
    }

    /// Group the module's owned origins into one fixer request per
    /// (block type, block name, version), ordered by key.
    pub fn batch_origins(&self, module: &Module) -> Result<Vec<OriginBatch>, ClassifyError> {
        let mut batches: BTreeMap<BatchKey, OriginBatch> = BTreeMap::new();

        for owned in self.filter_origins(module)? {
            let key = BatchKey {
                block_type: owned.block_type,
                version: self.provider.version_of(owned.block_type, &owned.block_name),
                block_name: owned.block_name,
            };
            let range = owned.origin.range;
            let raw = module
                .file(&range.filename)
                .and_then(|f| f.slice(&range))
                .unwrap_or_default()
                .to_vec();

            let batch = batches.entry(key.clone()).or_insert_with(|| OriginBatch {
                request: FixReferenceOriginsRequest {
                    block_type: key.block_type,
                    block_name: key.block_name.clone(),
                    version: key.version,
                    raw_contents: Vec::new(),
                },
                key,
                ranges: Vec::new(),
            });
            batch.request.raw_contents.push(raw);
            batch.ranges.push(range);
        }

        debug!(
            path = %module.path().display(),
            batches = batches.len(),
            "batched reference origins"
        );
        Ok(batches.into_values().collect())
    }

    /// One definition request per owned block, files in name order.
    pub fn definitions(&self, module: &Module) -> Result<Vec<DefinitionCandidate>, ClassifyError> {
        let mut out = Vec::new();
        for file in module.files().values() {
            for block in file.blocks() {
                let Some((block_type, block_name)) = self.owned_block(block)? else {
                    continue;
                };
                let address = block_type.address(block_name, &block.labels[1]);

                let raw_state = module
                    .state_resource(&address)
                    .map(serde_json::to_vec)
                    .transpose()
                    .map_err(|source| ClassifyError::StateJson {
                        address: address.clone(),
                        source,
                    })?;

                out.push(DefinitionCandidate {
                    request: FixDefinitionRequest {
                        block_type,
                        block_name: block_name.to_string(),
                        version: self.provider.version_of(block_type, block_name),
                        raw_content: file.slice(&block.range).unwrap_or_default().to_vec(),
                        raw_state,
                    },
                    address,
                    range: block.range.clone(),
                });
            }
        }
        Ok(out)
    }
}
