use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("failed to set the configuration grammar on the parser")]
    LanguageSet,

    #[error("{filename}: failed to parse")]
    ParseFailed { filename: String },

    #[error("{filename}: invalid UTF-8 at byte {offset}")]
    InvalidUtf8 { filename: String, offset: usize },

    /// First ERROR or MISSING node in the tree.
    #[error("{filename}:{line}:{column}: syntax error at byte {offset}: {message}")]
    Syntax {
        filename: String,
        offset: usize,
        line: usize,
        column: usize,
        message: String,
    },
}
