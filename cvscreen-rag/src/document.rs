//! Data types for documents, passages, and retrieval results.

use serde::{Deserialize, Serialize};

/// A source document produced by a [`CorpusReader`](crate::corpus::CorpusReader).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDocument {
    /// Unique identifier for the document, e.g. its file name.
    pub identifier: String,
    /// The plain text content of the document.
    pub text: String,
}

impl SourceDocument {
    /// Create a new source document.
    pub fn new(identifier: impl Into<String>, text: impl Into<String>) -> Self {
        Self { identifier: identifier.into(), text: text.into() }
    }
}

/// A bounded-length slice of a [`SourceDocument`], the unit of embedding and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Passage {
    /// The text content of the passage.
    pub content: String,
    /// The identifier of the parent [`SourceDocument`].
    pub source_identifier: String,
}

/// A [`Passage`] paired with its vector embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddedPassage {
    /// The vector embedding of the passage content.
    pub vector: Vec<f32>,
    /// The embedded passage.
    pub passage: Passage,
}

/// A retrieved [`Passage`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved passage.
    pub passage: Passage,
    /// The cosine similarity score (higher is more relevant).
    pub score: f32,
}

/// The ordered passages retrieved for one question, most relevant first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrievedContext {
    passages: Vec<Passage>,
}

impl RetrievedContext {
    /// Create a context from passages already in relevance order.
    pub fn new(passages: Vec<Passage>) -> Self {
        Self { passages }
    }

    /// The passages in relevance order.
    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    /// Distinct source identifiers in first-seen order.
    pub fn sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = Vec::new();
        for passage in &self.passages {
            if !sources.contains(&passage.source_identifier.as_str()) {
                sources.push(&passage.source_identifier);
            }
        }
        sources
    }
}

impl From<Vec<SearchResult>> for RetrievedContext {
    fn from(results: Vec<SearchResult>) -> Self {
        Self::new(results.into_iter().map(|r| r.passage).collect())
    }
}

/// A grounded answer together with the context it was composed from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Answer {
    /// The trimmed answer text.
    pub text: String,
    /// The passages supplied to the answer composer.
    pub context: RetrievedContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(source: &str, content: &str) -> Passage {
        Passage { content: content.into(), source_identifier: source.into() }
    }

    #[test]
    fn sources_are_deduplicated_in_order() {
        let context = RetrievedContext::new(vec![
            passage("b.pdf", "one"),
            passage("a.pdf", "two"),
            passage("b.pdf", "three"),
        ]);
        assert_eq!(context.sources(), vec!["b.pdf", "a.pdf"]);
        assert_eq!(context.len(), 3);
    }

    #[test]
    fn context_from_results_keeps_rank_order() {
        let results = vec![
            SearchResult { passage: passage("a.pdf", "first"), score: 0.9 },
            SearchResult { passage: passage("b.pdf", "second"), score: 0.1 },
        ];
        let context = RetrievedContext::from(results);
        assert_eq!(context.passages()[0].content, "first");
        assert_eq!(context.passages()[1].content, "second");
    }
}
