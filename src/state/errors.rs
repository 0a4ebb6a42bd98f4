use crate::resolver::ResolveError;
use crate::syntax::ParseError;
use crate::vfs::VfsError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("reading module {}: {source}", .path.display())]
    Vfs {
        path: PathBuf,
        #[source]
        source: VfsError,
    },

    #[error("parsing module {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("decoding module {}: {source}", .path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: ResolveError,
    },

    #[error("module call '{name}' in {} points to {}, which is not a directory", .parent.display(), .path.display())]
    NotADirectory {
        parent: PathBuf,
        name: String,
        path: PathBuf,
    },

    #[error("indexed module instance {address} is not supported")]
    IndexedModule { address: String },

    #[error("duplicate historic state resource {address} in {module}")]
    DuplicateResource { module: String, address: String },

    #[error("I/O error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}", MultiDisplay(.0))]
    Multi(Vec<StateError>),
}

impl StateError {
    /// Collapse a list of failures: `None` when empty, the error itself
    /// when alone, [`StateError::Multi`] otherwise.
    pub fn from_errors(mut errors: Vec<StateError>) -> Option<StateError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(StateError::Multi(errors)),
        }
    }

    /// Number of leaf failures.
    pub fn count(&self) -> usize {
        match self {
            StateError::Multi(errors) => errors.iter().map(StateError::count).sum(),
            _ => 1,
        }
    }
}

struct MultiDisplay<'a>(&'a [StateError]);

impl fmt::Display for MultiDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.0.len())?;
        for error in self.0 {
            write!(f, "\n  * {error}")?;
        }
        Ok(())
    }
}
