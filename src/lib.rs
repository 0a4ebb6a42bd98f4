//! terrafix: rewrite Terraform configuration for newer provider schemas.
//!
//! Given a root module, a provider and that provider's schemas, terrafix
//! asks a [`Fixer`] (usually the provider executable) to rewrite two kinds
//! of configuration:
//!
//! - reference origins: expressions like `azurerm_foo.bar.attr` that
//!   point into a block the provider owns, batched per block type;
//! - definitions: the `resource` and `data` blocks themselves.
//!
//! # Architecture
//!
//! All work happens on a [`MemFs`] staged copy of the tree. Modules are
//! discovered from the root through local module calls into a
//! [`RootState`]; the [`Classifier`](classify::Classifier) selects and
//! batches what belongs to the provider, and every rewrite compiles down to
//! a byte-range [`Update`] applied by [`update_content`]. Nothing touches
//! disk until the caller materializes the filesystem.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use terrafix::{CancelToken, Controller, ControllerOptions, DummyFixer, Materialize, MemFs};
//! use terrafix::resolver::ScanResolver;
//! use terrafix::schema::ProviderSchemas;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schemas = Arc::new(ProviderSchemas::load("schema.json")?);
//! let mut ctrl = Controller::new(
//!     MemFs::new("infra")?,
//!     ScanResolver::new(),
//!     DummyFixer::new(),
//!     ControllerOptions {
//!         provider: "hashicorp/azurerm".parse()?,
//!         schemas,
//!         historic: None,
//!     },
//! )?;
//! ctrl.run(&CancelToken::new())?;
//! ctrl.write(Materialize::Dir(Path::new("fixed")))?;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod classify;
pub mod config;
pub mod ctrl;
pub mod fixer;
pub mod logging;
pub mod patch;
pub mod resolver;
pub mod schema;
pub mod state;
pub mod syntax;
pub mod vfs;

// Re-exports
pub use cancel::CancelToken;
pub use config::{load_from_path, load_from_str, ConfigError, RunConfig};
pub use ctrl::{Controller, ControllerOptions, FixError, FixSummary};
pub use fixer::{CommandFixer, DummyFixer, Fixer, FixerError};
pub use patch::{update_content, ByteRange, PatchError, Update};
pub use schema::{BlockType, ProviderAddr, ProviderSchemas, SchemaError};
pub use state::{RootState, StateError};
pub use vfs::{Materialize, MemFs, VfsError};
