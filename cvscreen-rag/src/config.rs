//! Configuration for the RAG engine.
//!
//! [`RagConfig`] enumerates every option the engine recognises. It is validated
//! once, in [`RagConfigBuilder::build`], and never re-read mid-operation.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Default embedding model identifier.
pub const DEFAULT_EMBEDDING_MODEL: &str = "models/text-embedding-004";
/// Default chat model identifier.
pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.0-flash";
/// Default maximum passage length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap between consecutive passages in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
/// Default number of passages retrieved per question.
pub const DEFAULT_RETRIEVAL_K: usize = 4;
/// Default index directory, relative to the working directory.
pub const DEFAULT_INDEX_DIR: &str = "cv_index";

/// The family of backends used for embedding and generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Deterministic, credential-free providers.
    Mock,
    /// Google Generative Language API.
    #[default]
    Gemini,
}

impl Backend {
    /// Whether this backend needs an API key.
    pub fn requires_api_key(self) -> bool {
        matches!(self, Backend::Gemini)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Mock => write!(f, "mock"),
            Backend::Gemini => write!(f, "gemini"),
        }
    }
}

impl FromStr for Backend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Backend::Mock),
            "gemini" | "google" => Ok(Backend::Gemini),
            other => Err(RagError::Configuration(format!("unknown backend '{other}'"))),
        }
    }
}

/// Configuration parameters for the RAG engine.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Chat (generation) model identifier.
    pub chat_model: String,
    /// API credential for the live backend.
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    /// Maximum passage length in characters.
    pub chunk_size: usize,
    /// Number of characters repeated between consecutive passages.
    pub chunk_overlap: usize,
    /// Number of passages retrieved per question.
    pub retrieval_k: usize,
    /// Directory holding the persisted vector index.
    pub index_dir: PathBuf,
    /// Which backend family to use.
    pub backend: Backend,
    /// Sampling temperature for answer generation.
    pub temperature: f32,
    /// Number of passages sent per embedding request during ingestion.
    pub embedding_batch_size: usize,
    /// Timeout applied to each backend HTTP request.
    pub request_timeout: Duration,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            api_key: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            retrieval_k: DEFAULT_RETRIEVAL_K,
            index_dir: PathBuf::from(DEFAULT_INDEX_DIR),
            backend: Backend::default(),
            temperature: 0.1,
            embedding_batch_size: 100,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl fmt::Debug for RagConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RagConfig")
            .field("embedding_model", &self.embedding_model)
            .field("chat_model", &self.chat_model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("retrieval_k", &self.retrieval_k)
            .field("index_dir", &self.index_dir)
            .field("backend", &self.backend)
            .field("temperature", &self.temperature)
            .field("embedding_batch_size", &self.embedding_batch_size)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Build a validated configuration from process environment variables.
    ///
    /// | Variable | Field | Default |
    /// |----------|-------|---------|
    /// | `GOOGLE_GENAI_API_KEY` | `api_key` | unset |
    /// | `GOOGLE_RAG_EMBEDDING_MODEL` | `embedding_model` | `models/text-embedding-004` |
    /// | `GOOGLE_RAG_CHAT_MODEL` | `chat_model` | `gemini-2.0-flash` |
    /// | `RAG_CHUNK_SIZE` | `chunk_size` | `1000` |
    /// | `RAG_CHUNK_OVERLAP` | `chunk_overlap` | `200` |
    /// | `RAG_RETRIEVER_K` | `retrieval_k` | `4` |
    /// | `RAG_INDEX_DIR` | `index_dir` | `cv_index` |
    /// | `RAG_BACKEND` | `backend` | `gemini` |
    /// | `USE_MOCK_GENERATORS` | forces `backend = mock` when truthy | `false` |
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if a value cannot be parsed or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut builder = RagConfig::builder();
        if let Some(key) = get("GOOGLE_GENAI_API_KEY") {
            builder = builder.api_key(key);
        }
        if let Some(model) = get("GOOGLE_RAG_EMBEDDING_MODEL") {
            builder = builder.embedding_model(model);
        }
        if let Some(model) = get("GOOGLE_RAG_CHAT_MODEL") {
            builder = builder.chat_model(model);
        }
        if let Some(size) = get("RAG_CHUNK_SIZE") {
            builder = builder.chunk_size(parse_var("RAG_CHUNK_SIZE", &size)?);
        }
        if let Some(overlap) = get("RAG_CHUNK_OVERLAP") {
            builder = builder.chunk_overlap(parse_var("RAG_CHUNK_OVERLAP", &overlap)?);
        }
        if let Some(k) = get("RAG_RETRIEVER_K") {
            builder = builder.retrieval_k(parse_var("RAG_RETRIEVER_K", &k)?);
        }
        if let Some(dir) = get("RAG_INDEX_DIR") {
            builder = builder.index_dir(dir);
        }
        if let Some(backend) = get("RAG_BACKEND") {
            builder = builder.backend(backend.parse()?);
        }
        if let Some(flag) = get("USE_MOCK_GENERATORS") {
            if parse_flag("USE_MOCK_GENERATORS", &flag)? {
                builder = builder.backend(Backend::Mock);
            }
        }
        builder.build()
    }

    /// Return the API key, or a [`RagError::Configuration`] when the configured
    /// backend needs one and none is set.
    ///
    /// Backends that need no credentials return `Ok(None)`.
    pub fn require_credentials(&self) -> Result<Option<&str>> {
        if !self.backend.requires_api_key() {
            return Ok(None);
        }
        match self.api_key.as_deref() {
            Some(key) => Ok(Some(key)),
            None => Err(RagError::Configuration(format!(
                "an API key is required for the '{}' backend",
                self.backend
            ))),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| RagError::Configuration(format!("{name} has an invalid value '{value}'")))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RagError::Configuration(format!("{name} has an invalid value '{value}'"))),
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the embedding model identifier.
    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.config.embedding_model = model.into();
        self
    }

    /// Set the chat model identifier.
    pub fn chat_model(mut self, model: impl Into<String>) -> Self {
        self.config.chat_model = model.into();
        self
    }

    /// Set the API key. Blank keys are treated as unset.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.config.api_key = if key.trim().is_empty() { None } else { Some(key) };
        self
    }

    /// Set the maximum passage length in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive passages in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of passages retrieved per question.
    pub fn retrieval_k(mut self, k: usize) -> Self {
        self.config.retrieval_k = k;
        self
    }

    /// Set the directory holding the persisted index.
    pub fn index_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.index_dir = dir.into();
        self
    }

    /// Set the backend family.
    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set the generation temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    /// Set how many passages are embedded per request during ingestion.
    pub fn embedding_batch_size(mut self, size: usize) -> Self {
        self.config.embedding_batch_size = size;
        self
    }

    /// Set the per-request timeout for backend calls.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// The API key is not required here: its absence is reported by
    /// [`RagConfig::require_credentials`] when an operation needs it.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if:
    /// - `embedding_model` or `chat_model` is blank
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `retrieval_k == 0` or `embedding_batch_size == 0`
    /// - `temperature` is outside `0.0..=2.0`
    pub fn build(self) -> Result<RagConfig> {
        let config = self.config;
        if config.embedding_model.trim().is_empty() {
            return Err(RagError::Configuration("embedding_model must not be empty".into()));
        }
        if config.chat_model.trim().is_empty() {
            return Err(RagError::Configuration("chat_model must not be empty".into()));
        }
        if config.chunk_size == 0 {
            return Err(RagError::Configuration("chunk_size must be greater than zero".into()));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.retrieval_k == 0 {
            return Err(RagError::Configuration("retrieval_k must be greater than zero".into()));
        }
        if config.embedding_batch_size == 0 {
            return Err(RagError::Configuration(
                "embedding_batch_size must be greater than zero".into(),
            ));
        }
        if !(0.0..=2.0).contains(&config.temperature) {
            return Err(RagError::Configuration(format!(
                "temperature ({}) must be within 0.0..=2.0",
                config.temperature
            )));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = RagConfig::builder().build().unwrap();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.retrieval_k, 4);
        assert_eq!(config.backend, Backend::Gemini);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = RagConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn zero_k_is_rejected() {
        let err = RagConfig::builder().retrieval_k(0).build().unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn blank_model_is_rejected() {
        let err = RagConfig::builder().chat_model("  ").build().unwrap_err();
        assert!(err.to_string().contains("chat_model"));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let config = RagConfig::builder().api_key("   ").build().unwrap();
        assert!(config.api_key.is_none());
        assert!(matches!(config.require_credentials(), Err(RagError::Configuration(_))));
    }

    #[test]
    fn mock_backend_needs_no_credentials() {
        let config = RagConfig::builder().backend(Backend::Mock).build().unwrap();
        assert_eq!(config.require_credentials().unwrap(), None);
    }

    #[test]
    fn env_values_are_applied() {
        let config = RagConfig::from_lookup(lookup(&[
            ("GOOGLE_GENAI_API_KEY", "secret"),
            ("GOOGLE_RAG_CHAT_MODEL", "gemini-2.5-flash"),
            ("RAG_CHUNK_SIZE", "500"),
            ("RAG_CHUNK_OVERLAP", "50"),
            ("RAG_RETRIEVER_K", "6"),
            ("RAG_INDEX_DIR", "/tmp/cv-index"),
        ]))
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.chat_model, "gemini-2.5-flash");
        assert_eq!(config.embedding_model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.retrieval_k, 6);
        assert_eq!(config.index_dir, PathBuf::from("/tmp/cv-index"));
    }

    #[test]
    fn mock_flag_overrides_backend() {
        let config = RagConfig::from_lookup(lookup(&[
            ("RAG_BACKEND", "gemini"),
            ("USE_MOCK_GENERATORS", "true"),
        ]))
        .unwrap();
        assert_eq!(config.backend, Backend::Mock);
    }

    #[test]
    fn unparsable_number_is_a_configuration_error() {
        let err = RagConfig::from_lookup(lookup(&[("RAG_RETRIEVER_K", "four")])).unwrap_err();
        assert!(matches!(err, RagError::Configuration(msg) if msg.contains("RAG_RETRIEVER_K")));
    }

    #[test]
    fn debug_output_redacts_the_api_key() {
        let config = RagConfig::builder().api_key("super-secret").build().unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
