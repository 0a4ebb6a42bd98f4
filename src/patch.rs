//! Range patcher: byte-span replacement over an in-memory buffer.
//!
//! Every rewrite the engine performs compiles down to a set of [`Update`]s
//! against one file's original bytes. [`update_content`] is the only place
//! those updates are applied, and it is a pure function: the same buffer and
//! the same update set always produce the same output, in whatever order the
//! updates were collected.

use std::fmt;
use thiserror::Error;

/// A half-open byte range `[start, end)` into a source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteRange {
    /// Starting byte offset (inclusive)
    pub start: usize,
    /// Ending byte offset (exclusive)
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// True intersection test.
    ///
    /// Ranges that merely touch (`a.end == b.start`) do not overlap, and a
    /// zero-width range only overlaps a range that strictly surrounds it.
    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether `pos` falls inside the range.
    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos < self.end
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A single replacement: the bytes in `range` become `content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub range: ByteRange,
    pub content: Vec<u8>,
}

impl Update {
    pub fn new(range: ByteRange, content: impl Into<Vec<u8>>) -> Self {
        Self {
            range,
            content: content.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("overlapping ranges of updates found: {first} vs {second}")]
    Overlap { first: ByteRange, second: ByteRange },

    #[error("update {range} exceeds the content length {len}")]
    OutOfBounds { range: ByteRange, len: usize },

    #[error("invalid update range {range}: start is past end")]
    InvertedRange { range: ByteRange },
}

/// Apply `updates` to `original`, returning the patched buffer.
///
/// Updates are sorted by `(start, end)` first, so input order never affects
/// the result. Bytes outside every update are copied verbatim.
///
/// Fails when two updates intersect, when an update ends past the buffer, or
/// when an update range is inverted. Two zero-width insertions at the same
/// offset are rejected as overlapping since their relative order would be
/// arbitrary.
pub fn update_content(original: &[u8], updates: &[Update]) -> Result<Vec<u8>, PatchError> {
    if updates.is_empty() {
        return Ok(original.to_vec());
    }

    let mut sorted: Vec<&Update> = updates.iter().collect();
    sorted.sort_by_key(|u| u.range);

    // Validate everything before producing any output.
    let mut widest: Option<ByteRange> = None;
    for update in &sorted {
        let range = update.range;
        if range.start > range.end {
            return Err(PatchError::InvertedRange { range });
        }
        if range.end > original.len() {
            return Err(PatchError::OutOfBounds {
                range,
                len: original.len(),
            });
        }
        if let Some(prev) = widest {
            let same_insertion = prev.is_empty() && range.is_empty() && prev.start == range.start;
            if prev.overlaps(&range) || same_insertion {
                return Err(PatchError::Overlap {
                    first: prev,
                    second: range,
                });
            }
        }
        // Track the update reaching furthest right; any later intersection
        // must intersect this one.
        if widest.map_or(true, |prev| range.end >= prev.end) {
            widest = Some(range);
        }
    }

    let removed: usize = sorted.iter().map(|u| u.range.len()).sum();
    let added: usize = sorted.iter().map(|u| u.content.len()).sum();
    let mut patched = Vec::with_capacity(original.len() + added - removed.min(added));

    let mut cursor = 0;
    for update in sorted {
        patched.extend_from_slice(&original[cursor..update.range.start]);
        patched.extend_from_slice(&update.content);
        cursor = update.range.end;
    }
    patched.extend_from_slice(&original[cursor..]);

    Ok(patched)
}
