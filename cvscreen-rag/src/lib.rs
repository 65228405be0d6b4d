//! # cvscreen-rag
//!
//! Retrieval-Augmented Generation over a corpus of candidate CVs.
//!
//! ## Overview
//!
//! [`RagEngine`] exposes two operations:
//!
//! - [`ingest`](RagEngine::ingest) reads every document from a
//!   [`CorpusReader`], splits it into passages, embeds them and persists a
//!   [`VectorIndex`], replacing the previous one.
//! - [`answer`](RagEngine::answer) embeds a question, retrieves the closest
//!   passages and has an [`AnswerComposer`] answer from them alone.
//!
//! Backends:
//!
//! - [`MockEmbeddingProvider`] / [`MockAnswerComposer`] - deterministic and
//!   credential-free, for development and tests
//! - [`gemini::GeminiEmbeddingProvider`] / [`gemini::GeminiAnswerComposer`] -
//!   Google Generative Language API (feature `gemini`, on by default)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cvscreen_rag::{Backend, RagConfig, RagEngine, StaticCorpus};
//!
//! # async fn run() -> cvscreen_rag::Result<()> {
//! let config = RagConfig::builder().backend(Backend::Mock).index_dir("cv_index").build()?;
//! let corpus = StaticCorpus::new()
//!     .with_document("a.pdf", "Alice is a backend engineer with 5 years of Go experience.")
//!     .with_document("b.pdf", "Bob is a designer.");
//!
//! let engine = RagEngine::from_config(config, Arc::new(corpus))?;
//! assert_eq!(engine.ingest().await?, 2);
//! println!("{}", engine.answer("What language does Alice use?").await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! [`RagConfig::from_env`] reads `GOOGLE_GENAI_API_KEY`,
//! `GOOGLE_RAG_EMBEDDING_MODEL`, `GOOGLE_RAG_CHAT_MODEL`, `RAG_CHUNK_SIZE`,
//! `RAG_CHUNK_OVERLAP`, `RAG_RETRIEVER_K`, `RAG_INDEX_DIR`, `RAG_BACKEND` and
//! `USE_MOCK_GENERATORS`.

pub mod chunking;
pub mod compose;
pub mod config;
pub mod corpus;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
#[cfg(feature = "gemini")]
pub mod gemini;
pub mod index;

pub use chunking::{Chunker, RecursiveChunker, split};
pub use compose::{AnswerComposer, MockAnswerComposer, build_prompt};
pub use config::{Backend, RagConfig, RagConfigBuilder};
pub use corpus::{CorpusReader, DirectoryCorpusReader, StaticCorpus};
pub use document::{
    Answer, EmbeddedPassage, Passage, RetrievedContext, SearchResult, SourceDocument,
};
pub use embedding::{EmbeddingProvider, MockEmbeddingProvider};
pub use engine::{EngineState, RagEngine, RagEngineBuilder};
pub use error::{RagError, Result};
#[cfg(feature = "gemini")]
pub use gemini::{GeminiAnswerComposer, GeminiEmbeddingProvider};
pub use index::VectorIndex;
