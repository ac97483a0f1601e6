//! Dummy LLM provider: echoes the latest user turn back prefixed with `[echo]`.
//! Used for keyless runs and for exercising the full request path in tests.
//! Failing instances simulate an unreachable or flaky backend.

use futures_util::stream;

use crate::llm::{CompletionRequest, ProviderError, TextStream};

#[derive(Debug, Clone)]
struct Failure {
    message: String,
    /// Streamed fragments delivered before the error; 0 fails at open.
    after_chunks: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DummyProvider {
    failure: Option<Failure>,
}

impl DummyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self { failure: Some(Failure { message: message.into(), after_chunks: 0 }) }
    }

    /// A provider whose streams break after `after_chunks` fragments.
    /// Buffered calls fail outright.
    pub fn interrupted(after_chunks: usize, message: impl Into<String>) -> Self {
        Self { failure: Some(Failure { message: message.into(), after_chunks }) }
    }

    fn echo(request: &CompletionRequest) -> String {
        format!("[echo] {}", request.last_user_content().unwrap_or_default())
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        match &self.failure {
            Some(f) => Err(ProviderError::Failed(f.message.clone())),
            None => Ok(Self::echo(request)),
        }
    }

    /// Streams the echo reply one word at a time (whitespace kept attached).
    pub async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<TextStream, ProviderError> {
        let text = Self::echo(request);
        let mut chunks: Vec<Result<String, ProviderError>> =
            text.split_inclusive(' ').map(|w| Ok(w.to_string())).collect();

        if let Some(f) = &self.failure {
            if f.after_chunks == 0 {
                return Err(ProviderError::Failed(f.message.clone()));
            }
            chunks.truncate(f.after_chunks);
            chunks.push(Err(ProviderError::Failed(f.message.clone())));
        }

        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::PromptMessage;
    use futures_util::StreamExt;

    fn request(content: &str) -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![PromptMessage { role: "user".into(), content: content.into() }],
            temperature: 0.7,
            max_tokens: None,
            web_search: None,
        }
    }

    #[tokio::test]
    async fn complete_prefixes_echo() {
        let p = DummyProvider::new();
        assert_eq!(p.complete(&request("hello")).await.unwrap(), "[echo] hello");
    }

    #[tokio::test]
    async fn stream_concatenates_to_complete() {
        let p = DummyProvider::new();
        let chunks: Vec<String> = p
            .complete_stream(&request("hello there world"))
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.concat(), "[echo] hello there world");
    }

    #[tokio::test]
    async fn failing_provider_errors_in_both_modes() {
        let p = DummyProvider::failing("offline");
        let err = p.complete(&request("hi")).await.unwrap_err();
        assert_eq!(err.to_string(), "offline");
        assert!(p.complete_stream(&request("hi")).await.is_err());
    }

    #[tokio::test]
    async fn interrupted_stream_errors_after_prefix() {
        let p = DummyProvider::interrupted(2, "connection reset");
        let items: Vec<Result<String, ProviderError>> =
            p.complete_stream(&request("a b c")).await.unwrap().collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), "[echo] ");
        assert_eq!(items[1].as_ref().unwrap(), "a ");
        assert!(items[2].is_err());
    }
}
