//! This module splits document text into overlapping child passages for the
//! parent-document retrieval pipeline.
//!
//! The splitter works in two phases:
//!
//! 1. **Recursive segmentation**: the text is broken into "atomic" byte ranges
//!    using an ordered list of regex delimiters (most significant first). A
//!    piece that is still longer than the window size is split again with the
//!    next delimiter, and once every delimiter is exhausted it is cut on
//!    character boundaries.
//! 2. **Window merging**: segments are packed greedily into windows of at most
//!    `chunk_size` characters. When a window is emitted, trailing segments
//!    worth at most `chunk_overlap` characters are carried into the next one,
//!    so consecutive windows share context.
//!
//! Every [`ChunkWindow`] records its character offsets into the source text,
//! so a passage can always be traced back to the document it came from.
//!
//! Lengths are measured in characters, never bytes, and no window ever splits
//! a UTF-8 code point.
//!
//! # Example
//!
//! ```
//! use finrag_context::text::TextSplitter;
//!
//! let splitter = TextSplitter::new(&[r"\n\n", r"\n", r" "], 40, 10).unwrap();
//! let text = "Value at Risk quantifies potential losses.\n\nIt is reported daily by the risk desk.";
//! let windows = splitter.split(text);
//!
//! assert!(windows.len() >= 2);
//! for window in &windows {
//!     let from_offsets: String = text
//!         .chars()
//!         .skip(window.char_start)
//!         .take(window.char_end - window.char_start)
//!         .collect();
//!     assert_eq!(from_offsets, window.text);
//! }
//! ```
use regex::Regex;
use serde::Serialize;
use std::collections::VecDeque;
use std::ops::Range;

/// Default delimiters for plain-text documents.
///
/// Ordered from most to least significant:
///
/// - `\n\n`: paragraph breaks
/// - `\n`: line breaks
/// - ` `: word boundaries
///
/// After the last delimiter the splitter falls back to cutting on characters.
pub const DEFAULT_TEXT_DELIMITERS: &[&str] = &[r"\n\n", r"\n", r" "];

/// Default window size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default overlap between consecutive windows in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Errors raised while configuring a [`TextSplitter`].
#[derive(Debug, thiserror::Error)]
pub enum SplitterError {
    #[error("invalid delimiter pattern {pattern:?}: {source}")]
    InvalidDelimiter {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { overlap: usize, size: usize },
}

/// A single window of text cut from a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkWindow {
    /// Position of this window within the document (0-indexed).
    pub sequence: usize,
    /// Character offset of the first character of the window.
    pub char_start: usize,
    /// Character offset one past the last character of the window.
    pub char_end: usize,
    /// Byte range of the window in the source text.
    #[serde(skip)]
    pub byte_range: Range<usize>,
    /// The window text, trimmed of surrounding whitespace.
    pub text: String,
}

impl ChunkWindow {
    /// Number of characters in this window.
    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }

    /// The window text with an optional context prefix prepended.
    pub fn contextualized(&self, prefix: Option<&str>) -> String {
        contextualize(prefix, &self.text)
    }
}

/// Recursive, overlap-aware text splitter.
///
/// Holds compiled delimiters plus the window geometry. Cheap to clone and
/// safe to share between ingestion workers.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    delimiters: Vec<Regex>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self {
            delimiters: DEFAULT_TEXT_DELIMITERS
                .iter()
                .map(|pattern| Regex::new(pattern).expect("default delimiters are valid"))
                .collect(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl TextSplitter {
    /// Creates a splitter from regex delimiter patterns and window geometry.
    ///
    /// # Arguments
    ///
    /// * `delimiter_patterns` - Regex patterns applied in order, most significant first.
    /// * `chunk_size` - Maximum window length in characters.
    /// * `chunk_overlap` - Maximum number of characters shared by consecutive windows.
    ///
    /// # Errors
    ///
    /// Returns [`SplitterError`] if a pattern does not compile, the size is zero,
    /// or the overlap is not smaller than the size.
    pub fn new(
        delimiter_patterns: &[&str],
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Self, SplitterError> {
        if chunk_size == 0 {
            return Err(SplitterError::ZeroChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(SplitterError::OverlapTooLarge {
                overlap: chunk_overlap,
                size: chunk_size,
            });
        }

        let delimiters = delimiter_patterns
            .iter()
            .map(|&pattern| {
                Regex::new(pattern).map_err(|source| SplitterError::InvalidDelimiter {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            delimiters,
            chunk_size,
            chunk_overlap,
        })
    }

    /// Creates a splitter with the plain-text delimiters and the given geometry.
    pub fn with_geometry(chunk_size: usize, chunk_overlap: usize) -> Result<Self, SplitterError> {
        Self::new(DEFAULT_TEXT_DELIMITERS, chunk_size, chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Splits `text` into overlapping windows.
    ///
    /// Windows are returned in document order with sequential `sequence`
    /// numbers. Whitespace-only windows are dropped, so empty or blank input
    /// yields an empty vector.
    pub fn split(&self, text: &str) -> Vec<ChunkWindow> {
        let segments = self.split_recursively_into_segments(text, 0, 0);

        let mut windows: Vec<ChunkWindow> = Vec::new();
        let mut current: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut current_len = 0;

        for segment in segments {
            let segment_len = text[segment.clone()].chars().count();

            if current_len + segment_len > self.chunk_size && !current.is_empty() {
                self.push_window(text, &current, &mut windows);

                // Keep at most `chunk_overlap` characters of trailing context,
                // and always make room for the incoming segment.
                while let Some(front_len) = current.front().map(|(_, len)| *len) {
                    if current_len > self.chunk_overlap
                        || current_len + segment_len > self.chunk_size
                    {
                        current.pop_front();
                        current_len -= front_len;
                    } else {
                        break;
                    }
                }
            }

            current_len += segment_len;
            current.push_back((segment, segment_len));
        }

        if !current.is_empty() {
            self.push_window(text, &current, &mut windows);
        }

        windows
    }

    fn push_window(
        &self,
        text: &str,
        current: &VecDeque<(Range<usize>, usize)>,
        windows: &mut Vec<ChunkWindow>,
    ) {
        let (Some((first, _)), Some((last, _))) = (current.front(), current.back()) else {
            return;
        };

        let raw = &text[first.start..last.end];
        let start = first.start + (raw.len() - raw.trim_start().len());
        let end = last.end - (raw.len() - raw.trim_end().len());
        if start >= end {
            return;
        }

        // Overlap carry-over can reproduce the previous window when the
        // incoming segment is dropped entirely; never emit the same span twice.
        if windows.last().is_some_and(|w| w.byte_range == (start..end)) {
            return;
        }

        let chunk_text = text[start..end].to_string();
        let char_start = text[..start].chars().count();
        let char_end = char_start + chunk_text.chars().count();

        windows.push(ChunkWindow {
            sequence: windows.len(),
            char_start,
            char_end,
            byte_range: start..end,
            text: chunk_text,
        });
    }

    // Recursively splits the text into byte ranges no longer than the window
    // size. Delimiter matches become their own segments so the ranges stay
    // contiguous and cover the whole input.
    fn split_recursively_into_segments(
        &self,
        text: &str,
        delimiter_idx: usize,
        current_offset: usize,
    ) -> Vec<Range<usize>> {
        let mut result_segments: Vec<Range<usize>> = Vec::new();

        if text.is_empty() {
            return result_segments;
        }

        if text.chars().count() <= self.chunk_size {
            result_segments.push(current_offset..current_offset + text.len());
            return result_segments;
        }

        // Delimiters exhausted: cut on character boundaries. Pieces no longer
        // than the overlap let the merge in `split` carry context across cuts.
        if delimiter_idx >= self.delimiters.len() {
            let piece_len = match self.chunk_overlap {
                0 => self.chunk_size,
                overlap => overlap.min(self.chunk_size - overlap),
            };
            let mut local_start = 0;
            let mut chars_in_piece = 0;
            for (idx, _) in text.char_indices() {
                if chars_in_piece == piece_len {
                    result_segments.push(current_offset + local_start..current_offset + idx);
                    local_start = idx;
                    chars_in_piece = 0;
                }
                chars_in_piece += 1;
            }
            if local_start < text.len() {
                result_segments.push(current_offset + local_start..current_offset + text.len());
            }
            return result_segments;
        }

        let current_delimiter = &self.delimiters[delimiter_idx];
        let mut local_byte_start = 0;

        for mat in current_delimiter.find_iter(text) {
            if mat.start() == mat.end() {
                continue;
            }
            if mat.start() > local_byte_start {
                result_segments.extend(self.split_recursively_into_segments(
                    &text[local_byte_start..mat.start()],
                    delimiter_idx + 1,
                    current_offset + local_byte_start,
                ));
            }
            result_segments.push(current_offset + mat.start()..current_offset + mat.end());
            local_byte_start = mat.end();
        }

        if local_byte_start < text.len() {
            result_segments.extend(self.split_recursively_into_segments(
                &text[local_byte_start..],
                delimiter_idx + 1,
                current_offset + local_byte_start,
            ));
        }

        result_segments
    }
}

/// Returns the first `max_chars` characters of the first line of `summary`.
pub fn summary_excerpt(summary: &str, max_chars: usize) -> String {
    let first_line = summary.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    first_line.trim().chars().take(max_chars).collect()
}

/// Builds the metadata prefix prepended to every child passage.
///
/// Produces `[File: <name>] [Context: <excerpt>]`, or `None` when there is no
/// summary to draw an excerpt from.
pub fn build_context_prefix(file_name: &str, summary: &str, excerpt_chars: usize) -> Option<String> {
    let excerpt = summary_excerpt(summary, excerpt_chars);
    if excerpt.is_empty() {
        return None;
    }
    Some(format!("[File: {file_name}] [Context: {excerpt}]"))
}

/// Joins an optional prefix and a passage the way stored child text is laid out.
pub fn contextualize(prefix: Option<&str>, text: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}\n{text}"),
        None => text.to_string(),
    }
}
