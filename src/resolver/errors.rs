use crate::schema::SchemaError;
use crate::syntax::SourceRange;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("module path {} not found", .0.display())]
    UnknownModule(PathBuf),

    #[error("no reference origin at {filename}:{pos} in module {}", .path.display())]
    NoOriginAt {
        path: PathBuf,
        filename: String,
        pos: usize,
    },

    #[error("module call '{name}' at {range} has no literal source")]
    MissingSource { name: String, range: SourceRange },

    #[error("module call '{name}' declared twice, at {first} and {second}")]
    DuplicateModuleCall {
        name: String,
        first: SourceRange,
        second: SourceRange,
    },

    #[error("invalid source for provider '{local_name}': {source}")]
    InvalidProviderSource {
        local_name: String,
        #[source]
        source: SchemaError,
    },
}
