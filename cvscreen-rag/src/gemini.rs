//! Gemini embedding and generation backends over the Generative Language REST API.
//!
//! This module is only available when the `gemini` feature is enabled.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::compose::{AnswerComposer, build_prompt, validate_answer};
use crate::document::RetrievedContext;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// The default Generative Language API base URL.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Maximum number of inputs accepted by one `batchEmbedContents` call.
const MAX_BATCH_SIZE: usize = 100;

const PROVIDER: &str = "Gemini";

// ── Shared HTTP plumbing ────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum CallError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API returned {status}: {detail}")]
    Status { status: reqwest::StatusCode, detail: String },
    #[error("failed to parse response: {0}")]
    Decode(reqwest::Error),
}

#[derive(Clone)]
struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    fn new(api_key: &str, timeout: Duration) -> std::result::Result<Self, String> {
        if api_key.trim().is_empty() {
            return Err("API key must not be empty".into());
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("failed to create HTTP client: {e}"))?;
        Ok(Self { http, api_key: api_key.to_string(), base_url: DEFAULT_BASE_URL.to_string() })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{method}", self.base_url.trim_end_matches('/'), model_path(model))
    }

    async fn post<Req, Resp>(
        &self,
        model: &str,
        method: &str,
        body: &Req,
    ) -> std::result::Result<Resp, CallError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.endpoint(model, method))
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(CallError::Status { status, detail });
        }

        response.json().await.map_err(CallError::Decode)
    }
}

/// Normalise `text-embedding-004` and `models/text-embedding-004` to the latter.
fn model_path(model: &str) -> String {
    let model = model.trim();
    if model.starts_with("models/") || model.starts_with("tunedModels/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

// ── Gemini API request/response types ──────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: TaskType,
}

#[derive(Serialize)]
struct BatchEmbedContentsRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchEmbedContentsResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

fn embed_request<'a>(model: &str, text: &'a str, task_type: TaskType) -> EmbedContentRequest<'a> {
    EmbedContentRequest {
        model: model_path(model),
        content: Content { role: None, parts: vec![Part { text }] },
        task_type,
    }
}

/// Concatenate the text parts of the first candidate.
fn candidate_text(response: GenerateContentResponse) -> std::result::Result<String, String> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates returned".into());
        return Err(format!("response contained no answer: {reason}"));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "empty content".into());
        return Err(format!("candidate contained no text: {reason}"));
    }
    Ok(text)
}

// ── EmbeddingProvider implementation ───────────────────────────────

/// An [`EmbeddingProvider`] backed by the Gemini embedding API.
///
/// Passages are embedded with task type `RETRIEVAL_DOCUMENT` through
/// `batchEmbedContents` (at most 100 inputs per request); questions use
/// `RETRIEVAL_QUERY` through `embedContent`.
///
/// # Example
///
/// ```rust,ignore
/// use cvscreen_rag::gemini::GeminiEmbeddingProvider;
///
/// let provider = GeminiEmbeddingProvider::new("api-key", "models/text-embedding-004", timeout)?;
/// let vectors = provider.embed_documents(&["Alice writes Go."]).await?;
/// ```
#[derive(Debug, Clone)]
pub struct GeminiEmbeddingProvider {
    client: GeminiClient,
    model: String,
}

impl GeminiEmbeddingProvider {
    /// Create a provider for `model`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingUnavailable`] if `api_key` is blank or the
    /// HTTP client cannot be created.
    pub fn new(api_key: &str, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = GeminiClient::new(api_key, timeout).map_err(unavailable)?;
        Ok(Self { client, model: model.into() })
    }

    /// Point the provider at a different API base URL (e.g. a proxy).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.client.base_url = base_url.into();
        self
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let request = BatchEmbedContentsRequest {
            requests: texts
                .iter()
                .map(|text| embed_request(&self.model, text, TaskType::RetrievalDocument))
                .collect(),
        };

        let response: BatchEmbedContentsResponse = self
            .client
            .post(&self.model, "batchEmbedContents", &request)
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "batch embedding request failed");
                unavailable(e.to_string())
            })?;

        if response.embeddings.len() != texts.len() {
            error!(
                provider = PROVIDER,
                expected = texts.len(),
                received = response.embeddings.len(),
                "embedding count mismatch"
            );
            return Err(unavailable(format!(
                "expected {} embeddings, received {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }
}

fn unavailable(message: impl Into<String>) -> RagError {
    RagError::EmbeddingUnavailable { provider: PROVIDER.into(), message: message.into() }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.model,
            "embedding documents"
        );

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH_SIZE) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding query");

        let request = embed_request(&self.model, text, TaskType::RetrievalQuery);
        let response: EmbedContentResponse =
            self.client.post(&self.model, "embedContent", &request).await.map_err(|e| {
                error!(provider = PROVIDER, error = %e, "query embedding request failed");
                unavailable(e.to_string())
            })?;

        if response.embedding.values.is_empty() {
            return Err(unavailable("API returned an empty embedding"));
        }
        Ok(response.embedding.values)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ── AnswerComposer implementation ──────────────────────────────────

/// An [`AnswerComposer`] backed by Gemini `generateContent`.
#[derive(Debug, Clone)]
pub struct GeminiAnswerComposer {
    client: GeminiClient,
    model: String,
    temperature: f32,
}

impl GeminiAnswerComposer {
    /// Create a composer for `model`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Generation`] if `api_key` is blank or the HTTP
    /// client cannot be created.
    pub fn new(api_key: &str, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = GeminiClient::new(api_key, timeout).map_err(generation_error)?;
        Ok(Self { client, model: model.into(), temperature: 0.1 })
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Point the composer at a different API base URL (e.g. a proxy).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.client.base_url = base_url.into();
        self
    }
}

fn generation_error(message: impl Into<String>) -> RagError {
    RagError::Generation { provider: PROVIDER.into(), message: message.into() }
}

#[async_trait]
impl AnswerComposer for GeminiAnswerComposer {
    async fn compose(&self, question: &str, context: &RetrievedContext) -> Result<String> {
        let prompt = build_prompt(question, context);
        debug!(
            provider = PROVIDER,
            model = %self.model,
            passages = context.len(),
            "generating answer"
        );

        let request = GenerateContentRequest {
            contents: vec![Content { role: Some("user"), parts: vec![Part { text: &prompt }] }],
            generation_config: GenerationConfig { temperature: self.temperature },
        };

        let response: GenerateContentResponse =
            self.client.post(&self.model, "generateContent", &request).await.map_err(|e| {
                error!(provider = PROVIDER, error = %e, "generation request failed");
                generation_error(e.to_string())
            })?;

        let text = candidate_text(response).map_err(|message| {
            error!(provider = PROVIDER, %message, "malformed generation response");
            generation_error(message)
        })?;
        validate_answer(PROVIDER, &text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn model_path_adds_prefix_once() {
        assert_eq!(model_path("text-embedding-004"), "models/text-embedding-004");
        assert_eq!(model_path("models/text-embedding-004"), "models/text-embedding-004");
        assert_eq!(model_path("tunedModels/cv-ranker"), "tunedModels/cv-ranker");
    }

    #[test]
    fn endpoint_joins_model_and_method() {
        let client = GeminiClient::new("key", TIMEOUT).unwrap();
        assert_eq!(
            client.endpoint("gemini-2.0-flash", "generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn blank_key_fails_eagerly() {
        let err =
            GeminiEmbeddingProvider::new("  ", "models/text-embedding-004", TIMEOUT).unwrap_err();
        assert!(matches!(err, RagError::EmbeddingUnavailable { .. }));
        let err = GeminiAnswerComposer::new("", "gemini-2.0-flash", TIMEOUT).unwrap_err();
        assert!(matches!(err, RagError::Generation { .. }));
    }

    #[test]
    fn batch_request_uses_document_task_type() {
        let request = BatchEmbedContentsRequest {
            requests: vec![embed_request(
                "text-embedding-004",
                "Alice",
                TaskType::RetrievalDocument,
            )],
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "requests": [{
                    "model": "models/text-embedding-004",
                    "content": { "parts": [{ "text": "Alice" }] },
                    "taskType": "RETRIEVAL_DOCUMENT"
                }]
            })
        );
    }

    #[test]
    fn generate_request_carries_temperature() {
        let request = GenerateContentRequest {
            contents: vec![Content { role: Some("user"), parts: vec![Part { text: "hi" }] }],
            generation_config: GenerationConfig { temperature: 0.5 },
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "contents": [{ "role": "user", "parts": [{ "text": "hi" }] }],
                "generationConfig": { "temperature": 0.5 }
            })
        );
    }

    #[test]
    fn candidate_text_joins_parts() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Alice " }, { "text": "uses Go." }] },
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(candidate_text(response).unwrap(), "Alice uses Go.");
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        }))
        .unwrap();
        assert!(candidate_text(response).unwrap_err().contains("SAFETY"));
    }

    #[test]
    fn empty_candidate_is_an_error() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "finishReason": "MAX_TOKENS" }]
        }))
        .unwrap();
        assert!(candidate_text(response).unwrap_err().contains("MAX_TOKENS"));
    }

    #[test]
    fn embedding_responses_parse() {
        let batch: BatchEmbedContentsResponse = serde_json::from_value(json!({
            "embeddings": [{ "values": [0.1, 0.2] }, { "values": [0.3, 0.4] }]
        }))
        .unwrap();
        assert_eq!(batch.embeddings.len(), 2);
        let single: EmbedContentResponse =
            serde_json::from_value(json!({ "embedding": { "values": [1.0] } })).unwrap();
        assert_eq!(single.embedding.values, vec![1.0]);
    }
}
