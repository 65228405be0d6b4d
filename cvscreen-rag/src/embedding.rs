//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::Result;

/// A provider that generates vector embeddings from text input.
///
/// Two entry points exist because some backends embed documents and queries
/// asymmetrically. Symmetric backends only implement
/// [`embed_query`](EmbeddingProvider::embed_query); the default
/// [`embed_documents`](EmbeddingProvider::embed_documents) routes every text
/// through it sequentially.
///
/// Implementations must fail eagerly with
/// [`RagError::EmbeddingUnavailable`](crate::RagError::EmbeddingUnavailable)
/// rather than return placeholder vectors.
///
/// # Example
///
/// ```rust,ignore
/// use cvscreen_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let vectors = provider.embed_documents(&["Alice writes Go."]).await?;
/// let query = provider.embed_query("Who writes Go?").await?;
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed passages for indexing. Returns one vector per input, in order.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed_query(text).await?);
        }
        Ok(results)
    }

    /// Embed a question for retrieval.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// The model identifier, recorded in the index manifest.
    fn model(&self) -> &str;
}

/// A deterministic, credential-free [`EmbeddingProvider`].
///
/// Lowercased alphanumeric tokens are hashed (FNV-1a) into a fixed number of
/// buckets and the resulting count vector is L2-normalised, so texts sharing
/// words have a positive cosine similarity. Suitable for development, demos,
/// and tests.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
    model: String,
}

impl MockEmbeddingProvider {
    /// Default number of hash buckets.
    pub const DEFAULT_DIMENSIONS: usize = 512;

    /// Create a provider with [`DEFAULT_DIMENSIONS`](Self::DEFAULT_DIMENSIONS) buckets.
    pub fn new() -> Self {
        Self::with_dimensions(Self::DEFAULT_DIMENSIONS)
    }

    /// Create a provider with the given number of buckets (at least one).
    pub fn with_dimensions(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self { dimensions, model: format!("mock-hash-{dimensions}") }
    }

    /// Set the model identifier reported by [`EmbeddingProvider::model`].
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(str::to_lowercase)
        {
            let bucket = (fnv1a(token.as_bytes()) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn mock_vectors_are_normalised_and_sized() {
        let provider = MockEmbeddingProvider::with_dimensions(64);
        let vector = provider.embed_query("Alice writes Go").await.unwrap();
        assert_eq!(vector.len(), 64);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn mock_is_deterministic_and_case_insensitive() {
        let provider = MockEmbeddingProvider::new();
        let a = provider.embed_query("Backend Engineer").await.unwrap();
        let b = provider.embed_query("backend engineer").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn shared_words_increase_similarity() {
        let provider = MockEmbeddingProvider::new();
        let query = provider.embed_query("golang engineer").await.unwrap();
        let related = provider.embed_query("senior golang engineer").await.unwrap();
        assert!(dot(&query, &related) > 0.5);
    }

    #[tokio::test]
    async fn empty_text_yields_zero_vector() {
        let provider = MockEmbeddingProvider::with_dimensions(8);
        let vector = provider.embed_query("   ").await.unwrap();
        assert!(vector.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn default_batch_routes_through_query() {
        let provider = MockEmbeddingProvider::new();
        let batch = provider.embed_documents(&["one", "two"]).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], provider.embed_query("one").await.unwrap());
    }
}
