//! Answer composition from retrieved context.
//!
//! [`build_prompt`] renders the grounding prompt shared by every generative
//! backend; [`AnswerComposer`] implementations turn it into an answer.

use async_trait::async_trait;

use crate::document::RetrievedContext;
use crate::error::{RagError, Result};

/// Rendered inside the context block when retrieval returned nothing.
pub const EMPTY_CONTEXT_NOTICE: &str = "No CV context retrieved.";

const INSTRUCTIONS: &str = "\
You are an AI assistant helping with CV screening and candidate analysis.

Use ONLY the information provided inside <context>. If the CVs do not mention
something, explicitly state that it is not present in the available CVs.";

/// Produces a natural-language answer constrained to the supplied context.
#[async_trait]
pub trait AnswerComposer: Send + Sync {
    /// Compose an answer to `question` using only `context`.
    ///
    /// Implementations return [`RagError::Generation`] on any backend failure
    /// and never return a partial or empty answer.
    async fn compose(&self, question: &str, context: &RetrievedContext) -> Result<String>;

    /// The generation model identifier, for logging.
    fn model(&self) -> &str;
}

/// Render the grounding prompt for `question` over `context`.
///
/// Every passage is tagged with its source file. An empty context is stated
/// explicitly rather than omitted.
pub fn build_prompt(question: &str, context: &RetrievedContext) -> String {
    format!(
        "{INSTRUCTIONS}\n\n<context>\n{}\n</context>\n\nUser question:\n{}",
        format_context(context),
        question.trim()
    )
}

fn format_context(context: &RetrievedContext) -> String {
    if context.is_empty() {
        return EMPTY_CONTEXT_NOTICE.to_string();
    }
    context
        .passages()
        .iter()
        .map(|p| format!("File: {}\n{}", p.source_identifier, p.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Trim a backend answer and reject blank output.
pub(crate) fn validate_answer(provider: &str, text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(RagError::Generation {
            provider: provider.to_string(),
            message: "backend returned an empty answer".into(),
        });
    }
    Ok(trimmed.to_string())
}

/// A deterministic, credential-free [`AnswerComposer`].
///
/// Answers from the top-ranked passage only and names its source file, so it
/// never mixes facts from different candidates.
#[derive(Debug, Clone, Default)]
pub struct MockAnswerComposer;

impl MockAnswerComposer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnswerComposer for MockAnswerComposer {
    async fn compose(&self, question: &str, context: &RetrievedContext) -> Result<String> {
        let answer = match context.passages().first() {
            Some(top) => format!("According to {}: {}", top.source_identifier, top.content),
            None => format!(
                "The available CVs do not contain information about: {}",
                question.trim()
            ),
        };
        validate_answer("Mock", &answer)
    }

    fn model(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Passage;

    fn context() -> RetrievedContext {
        RetrievedContext::new(vec![
            Passage { content: "Alice writes Go.".into(), source_identifier: "a.pdf".into() },
            Passage { content: "Bob is a designer.".into(), source_identifier: "b.pdf".into() },
        ])
    }

    #[test]
    fn prompt_tags_passages_with_their_source() {
        let prompt = build_prompt("Who writes Go?", &context());
        assert!(prompt.contains("File: a.pdf\nAlice writes Go."));
        assert!(prompt.contains("File: b.pdf\nBob is a designer."));
        assert!(prompt.contains("Use ONLY the information provided inside <context>"));
        assert!(prompt.contains("not present in the available CVs"));
        assert!(prompt.ends_with("User question:\nWho writes Go?"));
    }

    #[test]
    fn prompt_states_missing_context() {
        let prompt = build_prompt("Who writes Go?", &RetrievedContext::default());
        assert!(prompt.contains("<context>\nNo CV context retrieved.\n</context>"));
    }

    #[test]
    fn blank_answers_are_rejected() {
        assert!(matches!(validate_answer("Gemini", "  \n"), Err(RagError::Generation { .. })));
        assert_eq!(validate_answer("Gemini", " ok \n").unwrap(), "ok");
    }

    #[tokio::test]
    async fn mock_answers_from_the_top_passage_only() {
        let answer = MockAnswerComposer.compose("Who writes Go?", &context()).await.unwrap();
        assert_eq!(answer, "According to a.pdf: Alice writes Go.");
        assert!(!answer.contains("Bob"));
    }

    #[tokio::test]
    async fn mock_admits_missing_context() {
        let answer = MockAnswerComposer
            .compose("Who knows COBOL?", &RetrievedContext::default())
            .await
            .unwrap();
        assert!(answer.contains("do not contain information"));
    }
}
