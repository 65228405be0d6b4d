//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`RecursiveChunker`], which
//! splits text on the most semantic boundary available (paragraph break, line
//! break, sentence end, whitespace) before falling back to a hard cut.
//!
//! All lengths are measured in `char`s.

use std::collections::VecDeque;

use crate::document::{Passage, SourceDocument};
use crate::error::{RagError, Result};

/// Boundaries tried in priority order before a hard cut.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " "];

/// A strategy for splitting documents into passages.
pub trait Chunker: Send + Sync {
    /// Split a single document into passages.
    ///
    /// Returns an empty `Vec` if the document text is empty or whitespace.
    fn chunk(&self, document: &SourceDocument) -> Vec<Passage>;

    /// Split many documents, keeping document order and passage order.
    fn split(&self, documents: &[SourceDocument]) -> Vec<Passage> {
        documents.iter().flat_map(|document| self.chunk(document)).collect()
    }
}

/// Splits text hierarchically: paragraphs → lines → sentences → words → characters.
///
/// Adjacent pieces are merged greedily up to `chunk_size`. When a passage is
/// emitted, its trailing pieces totalling at most `chunk_overlap` characters
/// open the next passage.
///
/// # Example
///
/// ```rust
/// use cvscreen_rag::{Chunker, RecursiveChunker, SourceDocument};
///
/// let chunker = RecursiveChunker::new(1000, 200).unwrap();
/// let passages = chunker.chunk(&SourceDocument::new("a.pdf", "Alice writes Go."));
/// assert_eq!(passages.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size` - maximum number of characters per passage
    /// * `chunk_overlap` - number of characters repeated between consecutive passages
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `chunk_size == 0` or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidArgument("chunk size must be greater than zero".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::InvalidArgument(format!(
                "chunk overlap ({chunk_overlap}) must be less than chunk size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split raw text into trimmed, non-empty pieces of at most `chunk_size` chars.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.split_recursive(text, SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let Some(level) = separators.iter().position(|sep| text.contains(sep)) else {
            return self.hard_split(text);
        };
        let separator = separators[level];
        let finer = &separators[level + 1..];

        let mut passages = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) <= self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                passages.extend(self.merge(&pending));
                pending.clear();
            }
            passages.extend(self.split_recursive(piece, finer));
        }

        if !pending.is_empty() {
            passages.extend(self.merge(&pending));
        }

        passages
    }

    /// Merge pieces no longer than `chunk_size` into passages, carrying overlap.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut passages = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut passages, window.iter().copied().collect::<String>());
                while total > self.chunk_overlap || (total > 0 && total + len > self.chunk_size)
                {
                    let Some(front) = window.pop_front() else { break };
                    total -= char_len(front);
                }
            }
            window.push_back(piece);
            total += len;
        }

        if !window.is_empty() {
            push_trimmed(&mut passages, window.iter().copied().collect::<String>());
        }

        passages
    }

    /// Cut text into windows of `chunk_size` chars stepping by `chunk_size - chunk_overlap`.
    fn hard_split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = self.chunk_size - self.chunk_overlap;
        let mut passages = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            push_trimmed(&mut passages, chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }

        passages
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &SourceDocument) -> Vec<Passage> {
        self.split_text(&document.text)
            .into_iter()
            .map(|content| Passage { content, source_identifier: document.identifier.clone() })
            .collect()
    }
}

/// Split `documents` into passages of at most `max_size` chars with `overlap`
/// chars repeated between neighbours.
///
/// # Errors
///
/// Returns [`RagError::InvalidArgument`] for `max_size == 0` or `overlap >= max_size`.
pub fn split(
    documents: &[SourceDocument],
    max_size: usize,
    overlap: usize,
) -> Result<Vec<Passage>> {
    Ok(RecursiveChunker::new(max_size, overlap)?.split(documents))
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn push_trimmed(passages: &mut Vec<String>, text: String) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        passages.push(trimmed.to_string());
    }
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(passages: &[Passage]) -> Vec<&str> {
        passages.iter().map(|p| p.content.as_str()).collect()
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(matches!(RecursiveChunker::new(0, 0), Err(RagError::InvalidArgument(_))));
        assert!(matches!(RecursiveChunker::new(10, 10), Err(RagError::InvalidArgument(_))));
    }

    #[test]
    fn whitespace_document_yields_no_passages() {
        let chunker = RecursiveChunker::new(100, 10).unwrap();
        assert!(chunker.chunk(&SourceDocument::new("blank.pdf", "  \n\t ")).is_empty());
        assert!(chunker.chunk(&SourceDocument::new("empty.pdf", "")).is_empty());
    }

    #[test]
    fn short_document_is_one_passage() {
        let chunker = RecursiveChunker::new(1000, 200).unwrap();
        let passages = chunker.chunk(&SourceDocument::new("a.pdf", "  Alice writes Go.  "));
        assert_eq!(texts(&passages), vec!["Alice writes Go."]);
        assert_eq!(passages[0].source_identifier, "a.pdf");
    }

    #[test]
    fn paragraph_breaks_are_preferred() {
        let chunker = RecursiveChunker::new(12, 0).unwrap();
        let passages = chunker.split_text("aaaa bbbb\n\ncccc dddd");
        assert_eq!(passages, vec!["aaaa bbbb", "cccc dddd"]);
    }

    #[test]
    fn overlap_repeats_trailing_words() {
        let chunker = RecursiveChunker::new(10, 4).unwrap();
        let passages = chunker.split_text("one two three four five");
        assert_eq!(passages, vec!["one two", "two three", "four five"]);
    }

    #[test]
    fn hard_cut_when_no_boundary_exists() {
        let chunker = RecursiveChunker::new(4, 1).unwrap();
        assert_eq!(chunker.split_text("abcdefghij"), vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let chunker = RecursiveChunker::new(2, 0).unwrap();
        assert_eq!(chunker.split_text("ééééé"), vec!["éé", "éé", "é"]);
    }

    #[test]
    fn sentence_punctuation_stays_with_its_sentence() {
        let chunker = RecursiveChunker::new(30, 0).unwrap();
        let passages =
            chunker.split_text("Alice writes Go services. Bob designs brand identities.");
        assert_eq!(passages, vec!["Alice writes Go services.", "Bob designs brand identities."]);
    }

    #[test]
    fn split_keeps_document_order() {
        let docs = vec![
            SourceDocument::new("a.pdf", "Alice is a backend engineer."),
            SourceDocument::new("blank.pdf", "   "),
            SourceDocument::new("b.pdf", "Bob is a designer."),
        ];
        let passages = split(&docs, 1000, 200).unwrap();
        let sources: Vec<&str> = passages.iter().map(|p| p.source_identifier.as_str()).collect();
        assert_eq!(sources, vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn splitting_is_deterministic() {
        let text =
            "Summary\n\nSenior engineer. Ten years of Rust! Loves parsers?\nLine two ".repeat(40);
        let docs = vec![SourceDocument::new("cv.pdf", text)];
        assert_eq!(split(&docs, 1000, 200).unwrap(), split(&docs, 1000, 200).unwrap());
    }
}
