//! Fixed-size overlapping window chunker.
//!
//! Splits document text into windows of `size` units that advance by
//! `size - overlap` units per step. A unit is a line (the default, which
//! suits extracted PDF/DOCX text) or a character.
//!
//! # Algorithm
//!
//! 1. Split the text into units (`\n`-separated lines, or chars).
//! 2. Emit the window `units[i .. i + size]` for every
//!    `i = 0, stride, 2·stride, …` while `i < len`.
//! 3. Drop windows that are empty or whitespace-only.
//!
//! Chunking is deterministic and side-effect free: the same
//! `(text, size, overlap)` always yields the same sequence.
//!
//! # Example
//!
//! ```rust
//! use docrag_core::chunk::{ChunkMode, Chunker};
//!
//! let chunker = Chunker::new(ChunkMode::Lines, 2, 1).unwrap();
//! let chunks = chunker.chunk("a\nb\nc");
//! assert_eq!(chunks, vec!["a\nb", "b\nc", "c"]);
//! ```

use serde::Deserialize;

use crate::error::{RagError, Result};

/// The unit a [`Chunker`] counts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    #[default]
    Lines,
    Chars,
}

/// A validated chunking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    mode: ChunkMode,
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// Build a chunker, rejecting configurations whose stride would be
    /// zero or negative.
    pub fn new(mode: ChunkMode, size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk size must be > 0".to_string(),
            ));
        }
        if overlap >= size {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, size
            )));
        }
        Ok(Self {
            mode,
            size,
            overlap,
        })
    }

    pub fn mode(&self) -> ChunkMode {
        self.mode
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn stride(&self) -> usize {
        self.size - self.overlap
    }

    /// Lazily iterate over the non-blank windows of `text`.
    ///
    /// The iterator borrows `text`; calling `iter` again restarts from
    /// the beginning.
    pub fn iter<'a>(&self, text: &'a str) -> Chunks<'a> {
        let boundaries = match self.mode {
            ChunkMode::Lines => line_boundaries(text),
            ChunkMode::Chars => char_boundaries(text),
        };
        Chunks {
            text,
            boundaries,
            mode: self.mode,
            size: self.size,
            stride: self.stride(),
            pos: 0,
        }
    }

    /// Collect all non-blank windows of `text`.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        self.iter(text).map(str::to_string).collect()
    }
}

/// Iterator returned by [`Chunker::iter`].
pub struct Chunks<'a> {
    text: &'a str,
    /// Byte offset where each unit starts, plus a final sentinel.
    boundaries: Vec<usize>,
    mode: ChunkMode,
    size: usize,
    stride: usize,
    pos: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let units = self.boundaries.len().saturating_sub(1);
        while self.pos < units {
            let start_unit = self.pos;
            let end_unit = (start_unit + self.size).min(units);
            self.pos += self.stride;

            let start = self.boundaries[start_unit];
            let end = match self.mode {
                // Line boundaries sit one past the '\n' that ends the line.
                ChunkMode::Lines => self.boundaries[end_unit] - 1,
                ChunkMode::Chars => self.boundaries[end_unit],
            };
            let window = &self.text[start..end];
            if !window.trim().is_empty() {
                return Some(window);
            }
        }
        None
    }
}

/// Start offset of every line, plus a sentinel one past the end of text
/// (as if the text ended with a newline).
fn line_boundaries(text: &str) -> Vec<usize> {
    let mut out = vec![0];
    out.extend(
        text.bytes()
            .enumerate()
            .filter(|(_, b)| *b == b'\n')
            .map(|(i, _)| i + 1),
    );
    out.push(text.len() + 1);
    out
}

fn char_boundaries(text: &str) -> Vec<usize> {
    let mut out: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    out.push(text.len());
    out
}
