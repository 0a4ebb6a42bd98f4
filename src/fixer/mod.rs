//! Content rewrite policy.
//!
//! A [`Fixer`] receives raw configuration text and returns its rewritten
//! form. It never sees byte offsets: the caller owns placement and patches
//! the returned bytes back into the files. Two implementations ship with
//! the crate: [`DummyFixer`] for dry runs and tests, and [`CommandFixer`],
//! which delegates each request to an external executable.

pub mod command;
pub mod dummy;

pub use command::CommandFixer;
pub use dummy::DummyFixer;

use crate::cancel::CancelToken;
use crate::schema::BlockType;
use std::path::PathBuf;
use thiserror::Error;

/// Every reference origin pointing at one block type, rewritten together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixReferenceOriginsRequest {
    pub block_type: BlockType,
    pub block_name: String,
    pub version: i64,
    /// Raw text of each origin, in source order.
    pub raw_contents: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixReferenceOriginsResponse {
    /// Rewritten text, one entry per request entry, same order.
    pub raw_contents: Vec<Vec<u8>>,
}

/// One resource or datasource block definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixDefinitionRequest {
    pub block_type: BlockType,
    pub block_name: String,
    pub version: i64,
    /// The whole block, from the type keyword through the closing brace.
    pub raw_content: Vec<u8>,
    /// Recorded state of the instance as JSON, when known.
    pub raw_state: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixDefinitionResponse {
    pub raw_content: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum FixerError {
    #[error("fixer response length doesn't match the request length {expected}, got={got}")]
    ArityMismatch { expected: usize, got: usize },

    #[error("fixer call cancelled")]
    Cancelled,

    #[error("fixer reported an error: {0}")]
    Failed(String),

    #[error("failed to spawn fixer {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fixer {} exited with {status}: {stderr}", .program.display())]
    Exit {
        program: PathBuf,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("I/O error talking to fixer: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid fixer response: {0}")]
    Protocol(String),
}

pub trait Fixer {
    fn fix_reference_origins(
        &self,
        cancel: &CancelToken,
        req: &FixReferenceOriginsRequest,
    ) -> Result<FixReferenceOriginsResponse, FixerError>;

    fn fix_definition(
        &self,
        cancel: &CancelToken,
        req: &FixDefinitionRequest,
    ) -> Result<FixDefinitionResponse, FixerError>;
}

impl<F: Fixer + ?Sized> Fixer for Box<F> {
    fn fix_reference_origins(
        &self,
        cancel: &CancelToken,
        req: &FixReferenceOriginsRequest,
    ) -> Result<FixReferenceOriginsResponse, FixerError> {
        (**self).fix_reference_origins(cancel, req)
    }

    fn fix_definition(
        &self,
        cancel: &CancelToken,
        req: &FixDefinitionRequest,
    ) -> Result<FixDefinitionResponse, FixerError> {
        (**self).fix_definition(cancel, req)
    }
}

impl<F: Fixer + ?Sized> Fixer for &F {
    fn fix_reference_origins(
        &self,
        cancel: &CancelToken,
        req: &FixReferenceOriginsRequest,
    ) -> Result<FixReferenceOriginsResponse, FixerError> {
        (**self).fix_reference_origins(cancel, req)
    }

    fn fix_definition(
        &self,
        cancel: &CancelToken,
        req: &FixDefinitionRequest,
    ) -> Result<FixDefinitionResponse, FixerError> {
        (**self).fix_definition(cancel, req)
    }
}

/// A response must carry exactly one entry per request entry.
pub fn check_arity(
    req: &FixReferenceOriginsRequest,
    resp: &FixReferenceOriginsResponse,
) -> Result<(), FixerError> {
    if req.raw_contents.len() != resp.raw_contents.len() {
        return Err(FixerError::ArityMismatch {
            expected: req.raw_contents.len(),
            got: resp.raw_contents.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(n: usize) -> FixReferenceOriginsRequest {
        FixReferenceOriginsRequest {
            block_type: BlockType::Resource,
            block_name: "widget".to_string(),
            version: 0,
            raw_contents: vec![b"widget.x.id".to_vec(); n],
        }
    }

    #[test]
    fn test_check_arity() {
        let resp = FixReferenceOriginsResponse {
            raw_contents: vec![b"a".to_vec()],
        };
        assert!(check_arity(&request(1), &resp).is_ok());
        let err = check_arity(&request(2), &resp).unwrap_err();
        assert!(matches!(err, FixerError::ArityMismatch { expected: 2, got: 1 }));
        assert!(err.to_string().contains("request length 2, got=1"));
    }

    #[test]
    fn test_boxed_fixer_delegates() {
        let fixer: Box<dyn Fixer> = Box::new(DummyFixer::new());
        let resp = fixer
            .fix_reference_origins(&CancelToken::new(), &request(2))
            .unwrap();
        assert_eq!(resp.raw_contents.len(), 2);
    }
}
