//! The RAG engine: corpus ingestion and grounded question answering.
//!
//! [`RagEngine`] composes a [`CorpusReader`], a [`Chunker`], an
//! [`EmbeddingProvider`] and an [`AnswerComposer`] around a persisted
//! [`VectorIndex`].
//!
//! # Example
//!
//! ```rust,ignore
//! use cvscreen_rag::{RagConfig, RagEngine, StaticCorpus};
//!
//! let corpus = StaticCorpus::new().with_document("a.pdf", "Alice writes Go.");
//! let engine = RagEngine::from_config(RagConfig::from_env()?, Arc::new(corpus))?;
//!
//! let ingested = engine.ingest().await?;
//! let answer = engine.answer("Who writes Go?").await?;
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::chunking::{Chunker, RecursiveChunker};
use crate::compose::{AnswerComposer, MockAnswerComposer};
use crate::config::{Backend, RagConfig};
use crate::corpus::CorpusReader;
use crate::document::{Answer, EmbeddedPassage, Passage, RetrievedContext, SourceDocument};
use crate::embedding::{EmbeddingProvider, MockEmbeddingProvider};
use crate::error::{RagError, Result};
use crate::index::VectorIndex;

/// Observable lifecycle state of a [`RagEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// The index directory holds no loadable index.
    NoIndex,
    /// A loadable index is persisted but no query chain is cached.
    IndexReady,
    /// A query chain over the current index is cached in memory.
    ChainReady,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::NoIndex => write!(f, "no index"),
            EngineState::IndexReady => write!(f, "index ready"),
            EngineState::ChainReady => write!(f, "chain ready"),
        }
    }
}

/// A loaded index bound to the providers that answer questions over it.
struct QueryChain {
    generation: u64,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    composer: Arc<dyn AnswerComposer>,
    k: usize,
}

impl QueryChain {
    async fn run(&self, question: &str) -> Result<Answer> {
        let query = self.embedder.embed_query(question).await.map_err(|e| {
            error!(error = %e, "query embedding failed");
            e
        })?;

        let results = self.index.search(&query, self.k)?;
        let context = RetrievedContext::from(results);
        debug!(passages = context.len(), sources = ?context.sources(), "retrieved context");

        let text = self.composer.compose(question, &context).await.map_err(|e| {
            error!(model = self.composer.model(), error = %e, "answer composition failed");
            e
        })?;

        Ok(Answer { text: text.trim().to_string(), context })
    }
}

/// Orchestrates `ingest()` and `answer()` and owns the index lifecycle.
///
/// The engine is `Send + Sync` and meant to be shared behind an [`Arc`].
/// Ingestion runs one at a time per engine; the query chain is built at most
/// once per index generation, however many callers ask concurrently.
pub struct RagEngine {
    config: RagConfig,
    corpus: Arc<dyn CorpusReader>,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn EmbeddingProvider>,
    composer: Arc<dyn AnswerComposer>,
    generation: AtomicU64,
    chain: Mutex<Option<Arc<QueryChain>>>,
    ingest_lock: Mutex<()>,
}

impl fmt::Debug for RagEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RagEngine")
            .field("config", &self.config)
            .field("embedding_model", &self.embedder.model())
            .field("chat_model", &self.composer.model())
            .field("generation", &self.generation.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl RagEngine {
    /// Create a new [`RagEngineBuilder`].
    pub fn builder() -> RagEngineBuilder {
        RagEngineBuilder::default()
    }

    /// Build an engine whose providers are selected by `config.backend`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if the backend needs an API key
    /// that is not set, or if the crate was built without support for it.
    pub fn from_config(config: RagConfig, corpus: Arc<dyn CorpusReader>) -> Result<Self> {
        let (embedder, composer) = match config.backend {
            Backend::Mock => mock_providers(),
            Backend::Gemini => gemini_providers(&config)?,
        };

        info!(
            backend = %config.backend,
            embedding_model = embedder.model(),
            chat_model = composer.model(),
            index_dir = %config.index_dir.display(),
            "created RAG engine"
        );

        Self::builder()
            .config(config)
            .corpus_reader(corpus)
            .embedding_provider(embedder)
            .answer_composer(composer)
            .build()
    }

    /// Return a reference to the engine configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The directory holding the persisted index.
    pub fn index_dir(&self) -> &Path {
        &self.config.index_dir
    }

    /// Report the current lifecycle state.
    ///
    /// Without a current chain this loads the persisted index; a manifest
    /// that cannot be loaded reports [`EngineState::NoIndex`].
    pub async fn state(&self) -> EngineState {
        let current = self.generation.load(Ordering::Acquire);
        if let Some(chain) = self.chain.lock().await.as_ref() {
            if chain.generation == current {
                return EngineState::ChainReady;
            }
        }
        match VectorIndex::load(self.index_dir()).await {
            Ok(_) => EngineState::IndexReady,
            Err(RagError::IndexNotFound { .. }) => EngineState::NoIndex,
            Err(e) => {
                warn!(
                    index_dir = %self.index_dir().display(),
                    error = %e,
                    "index could not be read"
                );
                EngineState::NoIndex
            }
        }
    }

    /// Rebuild the persisted index from the full corpus.
    ///
    /// Extraction, chunking, embedding and saving run in that order; the
    /// previous index stays in place until the new one is fully written, and
    /// any cached query chain is discarded once it is. Returns the number of
    /// source documents ingested.
    ///
    /// # Errors
    ///
    /// - [`RagError::Configuration`] if credentials are missing; nothing else
    ///   has happened at that point.
    /// - [`RagError::EmptyCorpus`] if no document has text or no passage is
    ///   produced. The prior index is untouched.
    /// - [`RagError::EmbeddingUnavailable`], [`RagError::Io`] and friends from
    ///   the stage that failed.
    pub async fn ingest(&self) -> Result<usize> {
        self.config.require_credentials()?;
        let _guard = self.ingest_lock.lock().await;

        let documents = self.read_corpus().await?;
        if documents.is_empty() {
            warn!("corpus has no documents with extractable text");
            return Err(RagError::EmptyCorpus("no document produced any text".into()));
        }

        let passages = self.chunker.split(&documents);
        if passages.is_empty() {
            warn!(documents = documents.len(), "chunking produced no passages");
            return Err(RagError::EmptyCorpus("chunking produced no passages".into()));
        }

        let entries = self.embed_passages(passages).await?;
        let passage_count = entries.len();
        let index = VectorIndex::build(entries, self.embedder.model())?;
        index.save(self.index_dir()).await.map_err(|e| {
            error!(index_dir = %self.index_dir().display(), error = %e, "failed to save index");
            e
        })?;

        self.generation.fetch_add(1, Ordering::AcqRel);
        self.chain.lock().await.take();

        info!(
            documents = documents.len(),
            passages = passage_count,
            index_dir = %self.index_dir().display(),
            "ingested corpus"
        );
        Ok(documents.len())
    }

    /// Answer `question` from the indexed corpus.
    ///
    /// # Errors
    ///
    /// See [`answer_with_context`](Self::answer_with_context).
    pub async fn answer(&self, question: &str) -> Result<String> {
        Ok(self.answer_with_context(question).await?.text)
    }

    /// Answer `question` and return the passages the answer was grounded on.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidArgument`] if `question` is blank, whatever the
    ///   index state.
    /// - [`RagError::Configuration`] if credentials are missing.
    /// - [`RagError::IndexNotFound`] if no index has been built.
    /// - [`RagError::StaleIndex`] if the index was built with another
    ///   embedding model.
    /// - [`RagError::EmbeddingUnavailable`] or [`RagError::Generation`] from
    ///   the backends.
    pub async fn answer_with_context(&self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidArgument("question must not be empty".into()));
        }
        self.config.require_credentials()?;

        let chain = self.query_chain().await?;
        let answer = chain.run(question).await?;
        info!(passages = answer.context.len(), "answered question");
        Ok(answer)
    }

    /// Return the cached chain, building it first if the index changed.
    ///
    /// The lock is held across the index load so concurrent first callers
    /// share one load. Only a fully built chain is cached.
    async fn query_chain(&self) -> Result<Arc<QueryChain>> {
        let mut cached = self.chain.lock().await;
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(chain) = cached.as_ref() {
            if chain.generation == generation {
                return Ok(Arc::clone(chain));
            }
        }
        cached.take();

        let index = VectorIndex::load(self.index_dir()).await?;
        if index.embedding_model() != self.embedder.model() {
            warn!(
                expected = self.embedder.model(),
                found = index.embedding_model(),
                "index was built with a different embedding model"
            );
            return Err(RagError::StaleIndex {
                expected: self.embedder.model().to_string(),
                found: index.embedding_model().to_string(),
            });
        }

        debug!(generation, passages = index.len(), "built query chain");
        let chain = Arc::new(QueryChain {
            generation,
            index: Arc::new(index),
            embedder: Arc::clone(&self.embedder),
            composer: Arc::clone(&self.composer),
            k: self.config.retrieval_k,
        });
        *cached = Some(Arc::clone(&chain));
        Ok(chain)
    }

    async fn read_corpus(&self) -> Result<Vec<SourceDocument>> {
        let texts = self.corpus.extract_all().await.map_err(|e| {
            error!(error = %e, "corpus extraction failed");
            e
        })?;

        let mut documents = Vec::with_capacity(texts.len());
        for (identifier, text) in texts {
            let text = text.trim();
            if text.is_empty() {
                debug!(document = %identifier, "skipping document without text");
                continue;
            }
            documents.push(SourceDocument::new(identifier, text));
        }
        Ok(documents)
    }

    async fn embed_passages(&self, passages: Vec<Passage>) -> Result<Vec<EmbeddedPassage>> {
        let batch_size = self.config.embedding_batch_size.max(1);
        let mut entries = Vec::with_capacity(passages.len());

        for batch in passages.chunks(batch_size) {
            let texts: Vec<&str> = batch.iter().map(|p| p.content.as_str()).collect();
            let vectors = self.embedder.embed_documents(&texts).await.map_err(|e| {
                error!(
                    model = self.embedder.model(),
                    error = %e,
                    "embedding failed during ingestion"
                );
                e
            })?;

            if vectors.len() != batch.len() {
                error!(
                    expected = batch.len(),
                    received = vectors.len(),
                    "embedding count mismatch"
                );
                return Err(RagError::EmbeddingUnavailable {
                    provider: self.embedder.model().to_string(),
                    message: format!(
                        "expected {} embeddings, received {}",
                        batch.len(),
                        vectors.len()
                    ),
                });
            }

            entries.extend(
                vectors
                    .into_iter()
                    .zip(batch)
                    .map(|(vector, passage)| EmbeddedPassage { vector, passage: passage.clone() }),
            );
        }
        Ok(entries)
    }
}

type Providers = (Arc<dyn EmbeddingProvider>, Arc<dyn AnswerComposer>);

fn mock_providers() -> Providers {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new());
    let composer: Arc<dyn AnswerComposer> = Arc::new(MockAnswerComposer::new());
    (embedder, composer)
}

#[cfg(feature = "gemini")]
fn gemini_providers(config: &RagConfig) -> Result<Providers> {
    use crate::gemini::{GeminiAnswerComposer, GeminiEmbeddingProvider};

    let api_key = config.require_credentials()?.unwrap_or_default();
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(GeminiEmbeddingProvider::new(
        api_key,
        &config.embedding_model,
        config.request_timeout,
    )?);
    let composer: Arc<dyn AnswerComposer> = Arc::new(
        GeminiAnswerComposer::new(api_key, &config.chat_model, config.request_timeout)?
            .with_temperature(config.temperature),
    );
    Ok((embedder, composer))
}

#[cfg(not(feature = "gemini"))]
fn gemini_providers(_config: &RagConfig) -> Result<Providers> {
    Err(RagError::Configuration("built without the 'gemini' feature".into()))
}

/// Builder for constructing a [`RagEngine`].
///
/// `config`, `corpus_reader`, `embedding_provider` and `answer_composer` are
/// required. The chunker defaults to a [`RecursiveChunker`] sized from the
/// configuration.
#[derive(Default)]
pub struct RagEngineBuilder {
    config: Option<RagConfig>,
    corpus: Option<Arc<dyn CorpusReader>>,
    chunker: Option<Arc<dyn Chunker>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    composer: Option<Arc<dyn AnswerComposer>>,
}

impl RagEngineBuilder {
    /// Set the engine configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the corpus reader.
    pub fn corpus_reader(mut self, corpus: Arc<dyn CorpusReader>) -> Self {
        self.corpus = Some(corpus);
        self
    }

    /// Override the default chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(provider);
        self
    }

    /// Set the answer composer.
    pub fn answer_composer(mut self, composer: Arc<dyn AnswerComposer>) -> Self {
        self.composer = Some(composer);
        self
    }

    /// Build the [`RagEngine`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if a required field is missing.
    pub fn build(self) -> Result<RagEngine> {
        let config = self.config.ok_or_else(|| missing("config"))?;
        let corpus = self.corpus.ok_or_else(|| missing("corpus_reader"))?;
        let embedder = self.embedder.ok_or_else(|| missing("embedding_provider"))?;
        let composer = self.composer.ok_or_else(|| missing("answer_composer"))?;
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(
                RecursiveChunker::new(config.chunk_size, config.chunk_overlap)
                    .map_err(|e| RagError::Configuration(e.to_string()))?,
            ),
        };

        Ok(RagEngine {
            config,
            corpus,
            chunker,
            embedder,
            composer,
            generation: AtomicU64::new(0),
            chain: Mutex::new(None),
            ingest_lock: Mutex::new(()),
        })
    }
}

fn missing(field: &str) -> RagError {
    RagError::Configuration(format!("{field} is required"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::StaticCorpus;

    fn engine(dir: &Path, corpus: StaticCorpus) -> RagEngine {
        let config = RagConfig::builder().backend(Backend::Mock).index_dir(dir).build().unwrap();
        RagEngine::from_config(config, Arc::new(corpus)).unwrap()
    }

    fn cvs() -> StaticCorpus {
        StaticCorpus::new()
            .with_document("a.pdf", "Alice is a backend engineer with 5 years of Go experience.")
            .with_document("b.pdf", "Bob is a designer.")
    }

    #[tokio::test]
    async fn state_follows_the_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir.path().join("index"), cvs());
        assert_eq!(engine.state().await, EngineState::NoIndex);

        assert_eq!(engine.ingest().await.unwrap(), 2);
        assert_eq!(engine.state().await, EngineState::IndexReady);

        engine.answer("Who uses Go?").await.unwrap();
        assert_eq!(engine.state().await, EngineState::ChainReady);

        engine.ingest().await.unwrap();
        assert_eq!(engine.state().await, EngineState::IndexReady);
    }

    #[tokio::test]
    async fn chain_is_reused_until_the_next_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), cvs());
        engine.ingest().await.unwrap();

        let first = engine.query_chain().await.unwrap();
        let second = engine.query_chain().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        engine.ingest().await.unwrap();
        let third = engine.query_chain().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.generation, first.generation + 1);
    }

    #[tokio::test]
    async fn blank_documents_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = cvs().with_document("c.pdf", "  \n\t ");
        assert_eq!(engine(dir.path(), corpus).ingest().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let config = RagConfig::builder().index_dir(dir.path().join("index")).build().unwrap();
        let engine = RagEngine::builder()
            .config(config)
            .corpus_reader(Arc::new(cvs()))
            .embedding_provider(Arc::new(MockEmbeddingProvider::new()))
            .answer_composer(Arc::new(MockAnswerComposer::new()))
            .build()
            .unwrap();

        assert!(matches!(engine.ingest().await, Err(RagError::Configuration(_))));
        assert!(!dir.path().join("index").exists());
        assert!(matches!(engine.answer("Who?").await, Err(RagError::Configuration(_))));
        assert!(matches!(engine.answer("  ").await, Err(RagError::InvalidArgument(_))));
    }

    #[test]
    fn from_config_requires_a_key_for_gemini() {
        let config = RagConfig::builder().backend(Backend::Gemini).build().unwrap();
        let err = RagEngine::from_config(config, Arc::new(cvs())).unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn builder_reports_missing_fields() {
        let err = RagEngine::builder().config(RagConfig::default()).build().unwrap_err();
        assert!(err.to_string().contains("corpus_reader is required"));
    }

    #[tokio::test]
    async fn stale_index_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        engine(dir.path(), cvs()).ingest().await.unwrap();

        let config =
            RagConfig::builder().backend(Backend::Mock).index_dir(dir.path()).build().unwrap();
        let other = RagEngine::builder()
            .config(config)
            .corpus_reader(Arc::new(cvs()))
            .embedding_provider(Arc::new(MockEmbeddingProvider::with_dimensions(64)))
            .answer_composer(Arc::new(MockAnswerComposer::new()))
            .build()
            .unwrap();

        let err = other.answer("Who uses Go?").await.unwrap_err();
        assert!(matches!(err, RagError::StaleIndex { .. }));
        assert_eq!(other.state().await, EngineState::IndexReady);
    }

    #[tokio::test]
    async fn unreadable_manifest_reports_no_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(crate::index::MANIFEST_FILE), b"not json").unwrap();
        let engine = engine(dir.path(), cvs());

        let err = engine.answer("Who uses Go?").await.unwrap_err();
        assert!(matches!(err, RagError::IndexNotFound { .. }));
        assert_eq!(engine.state().await, EngineState::NoIndex);

        engine.ingest().await.unwrap();
        assert_eq!(engine.state().await, EngineState::IndexReady);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_answers_share_one_chain() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine(dir.path(), cvs()));
        engine.ingest().await.unwrap();
        assert_eq!(engine.state().await, EngineState::IndexReady);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.query_chain().await.unwrap() })
            })
            .collect();

        let mut chains = Vec::with_capacity(handles.len());
        for handle in handles {
            chains.push(handle.await.unwrap());
        }

        let first = &chains[0];
        for chain in &chains {
            assert!(Arc::ptr_eq(first, chain));
            assert_eq!(chain.generation, first.generation);
        }
        assert_eq!(first.generation, engine.generation.load(Ordering::Acquire));
        assert_eq!(engine.state().await, EngineState::ChainReady);
    }
}
