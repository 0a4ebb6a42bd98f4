use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VfsError {
    #[error("{0}: no such file or directory")]
    NotFound(PathBuf),

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),

    #[error("{path} is outside of the filesystem root {base}")]
    OutsideRoot { path: PathBuf, base: PathBuf },

    #[error("initial path {0} can't be a file")]
    RootNotDir(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("walking {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

impl VfsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VfsError::Io {
            path: path.into(),
            source,
        }
    }
}
