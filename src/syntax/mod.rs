//! Structural view of configuration files.
//!
//! The patch engine only needs a shallow picture of each file: its
//! top-level blocks with their byte ranges, the attributes inside them, and
//! the variable traversals (`widget.x.id`) appearing in expressions. That
//! picture is produced by a [`Parser`]; [`HclParser`] builds it from the
//! tree-sitter HCL grammar.

pub mod errors;
pub mod hcl;

pub use crate::vfs::is_config_file;
pub use errors::ParseError;
pub use hcl::HclParser;

use crate::patch::ByteRange;
use std::fmt;

/// A byte range inside a named file of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceRange {
    pub filename: String,
    pub range: ByteRange,
}

impl SourceRange {
    pub fn new(filename: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            filename: filename.into(),
            range: ByteRange::new(start, end),
        }
    }

    pub fn start(&self) -> usize {
        self.range.start
    }

    pub fn end(&self) -> usize {
        self.range.end
    }

    /// The bytes this range covers, if it lies inside `bytes`.
    pub fn slice<'a>(&self, bytes: &'a [u8]) -> Option<&'a [u8]> {
        bytes.get(self.range.start..self.range.end)
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.range)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalStep {
    Attr(String),
    /// Literal index, kept as written (`0`, `"key"`).
    Index(String),
}

/// A variable reference such as `data.widget.x.tags["env"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traversal {
    pub steps: Vec<TraversalStep>,
    pub range: SourceRange,
}

impl Traversal {
    pub fn root(&self) -> &str {
        match self.steps.first() {
            Some(TraversalStep::Attr(name)) => name,
            _ => "",
        }
    }

    /// Leading attribute names, stopping at the first index step.
    pub fn attr_names(&self) -> Vec<&str> {
        self.steps
            .iter()
            .map_while(|step| match step {
                TraversalStep::Attr(name) => Some(name.as_str()),
                TraversalStep::Index(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub range: SourceRange,
    pub traversals: Vec<Traversal>,
    /// Set when the expression is a single string literal without templates.
    pub literal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub name_range: SourceRange,
    /// From the attribute name to the end of its expression.
    pub range: SourceRange,
    pub expr: Expression,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub block_type: String,
    pub labels: Vec<String>,
    pub type_range: SourceRange,
    /// Block header, from the type keyword through the opening brace.
    pub def_range: SourceRange,
    /// Whole block, from the type keyword through the closing brace.
    pub range: SourceRange,
    pub body: Body,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    pub attributes: Vec<Attribute>,
    pub blocks: Vec<Block>,
}

impl Body {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn blocks_of_type<'a>(&'a self, block_type: &'a str) -> impl Iterator<Item = &'a Block> {
        self.blocks.iter().filter(move |b| b.block_type == block_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub body: Body,
}

impl ParsedFile {
    /// Top-level blocks in source order.
    pub fn blocks(&self) -> &[Block] {
        &self.body.blocks
    }

    /// The top-level block whose range contains `pos`.
    pub fn outermost_block_at(&self, pos: usize) -> Option<&Block> {
        self.body
            .blocks
            .iter()
            .find(|block| block.range.range.contains(pos))
    }

    pub fn slice(&self, range: &SourceRange) -> Option<&[u8]> {
        range.slice(&self.bytes)
    }
}

/// Turns raw file bytes into a [`ParsedFile`].
pub trait Parser {
    fn parse(&self, bytes: &[u8], filename: &str) -> Result<ParsedFile, ParseError>;
}
