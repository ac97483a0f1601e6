//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! Provider instances are shared immutable capabilities: clone them freely.
//! Every backend offers a buffered [`LlmProvider::complete`] and an
//! incremental [`LlmProvider::complete_stream`].

pub mod providers;
pub mod sse;

use std::pin::Pin;

use futures_util::Stream;
use serde::Serialize;
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed provider response: {0}")]
    Decode(String),
    #[error("provider timed out: {0}")]
    Timeout(String),
    #[error("{0}")]
    Failed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Request(e.to_string())
        }
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// One conversation turn as sent to the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

/// Everything a backend needs for one completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
    /// `None` leaves the limit to the provider.
    pub max_tokens: Option<u32>,
    /// `None` omits the flag from the wire request entirely.
    pub web_search: Option<bool>,
}

impl CompletionRequest {
    /// The reduced request used by the fallback attempt: same model, history
    /// and temperature, no token limit or web-search flag.
    pub fn simplified(&self) -> Self {
        Self {
            model: self.model.clone(),
            messages: self.messages.clone(),
            temperature: self.temperature,
            max_tokens: None,
            web_search: None,
        }
    }

    /// Content of the most recent user turn, if any.
    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
    }
}

/// Incrementally delivered text fragments. Finite; not restartable.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch keeps the call sites free of trait objects.
/// Adding a backend = new module + new variant + new match arms.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
}

impl LlmProvider {
    /// Short backend name for logs and the health endpoint.
    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Dummy(_) => "dummy",
            LlmProvider::OpenAiCompatible(_) => "openai",
        }
    }

    /// Run `request` and return the full reply text.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.complete(request).await,
            LlmProvider::OpenAiCompatible(p) => p.complete(request).await,
        }
    }

    /// Run `request` and return its reply as a stream of text fragments.
    pub async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<TextStream, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.complete_stream(request).await,
            LlmProvider::OpenAiCompatible(p) => p.complete_stream(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![
                PromptMessage { role: "user".into(), content: "first".into() },
                PromptMessage { role: "assistant".into(), content: "reply".into() },
                PromptMessage { role: "user".into(), content: "second".into() },
            ],
            temperature: 0.7,
            max_tokens: Some(1000),
            web_search: Some(true),
        }
    }

    #[test]
    fn simplified_drops_optional_parameters() {
        let full = request();
        let simple = full.simplified();
        assert_eq!(simple.model, full.model);
        assert_eq!(simple.messages, full.messages);
        assert_eq!(simple.temperature, full.temperature);
        assert!(simple.max_tokens.is_none());
        assert!(simple.web_search.is_none());
    }

    #[test]
    fn last_user_content_skips_assistant_turns() {
        assert_eq!(request().last_user_content(), Some("second"));
    }
}
