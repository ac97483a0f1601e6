//! OpenAI-compatible chat completion provider (`/v1/chat/completions`).
//!
//! Works against OpenAI itself and any server speaking the same wire format
//! (g4f, Ollama, LM Studio, ...). The session's model travels with every
//! request, so one provider instance serves every catalog model. All wire
//! types are private to this module.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{Stream, StreamExt, TryStreamExt, stream};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::llm::sse::SseDecoder;
use crate::llm::{CompletionRequest, PromptMessage, ProviderError, TextStream};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ── Public provider ───────────────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions`.
///
/// Constructed once at startup, then cheaply cloned because
/// `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    timeout: Duration,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// `api_key` is `None` for keyless endpoints. When present it is sent as
    /// `Authorization: Bearer <key>` on every request.
    pub fn new(
        api_base_url: String,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        // No client-wide timeout: it would also cut long streamed bodies.
        // Buffered calls set a per-request timeout instead.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base_url,
            timeout: Duration::from_secs(timeout_seconds),
            api_key,
        })
    }

    fn post(&self, payload: &ChatCompletionRequest<'_>) -> reqwest::RequestBuilder {
        let mut req = self.client.post(&self.api_base_url).json(payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let payload = ChatCompletionRequest::from_request(request, false);

        debug!(
            model = %payload.model,
            messages = payload.messages.len(),
            max_tokens = ?payload.max_tokens,
            web_search = ?payload.web_search,
            "sending LLM request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full LLM request payload");
        }

        let response = self.post(&payload).timeout(self.timeout).send().await?;
        let response = check_status(response).await?;
        let parsed: ChatCompletionResponse = response.json().await?;

        debug!(choices = parsed.choices.len(), "received LLM response");

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ProviderError::Decode("empty or missing content in response".into()))
    }

    pub async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<TextStream, ProviderError> {
        let payload = ChatCompletionRequest::from_request(request, true);

        debug!(
            model = %payload.model,
            messages = payload.messages.len(),
            web_search = ?payload.web_search,
            "opening LLM stream"
        );

        let response = self.post(&payload).send().await?;
        let response = check_status(response).await?;
        let bytes = Box::pin(response.bytes_stream().map_err(ProviderError::from));
        Ok(text_stream(bytes))
    }
}

// ── Streaming body → text fragments ──────────────────────────────────────────

struct StreamState<S> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

/// Turn an SSE byte stream of `chat.completion.chunk` objects into text
/// fragments. Ends at `[DONE]`, at end of body, or after the first error.
pub(crate) fn text_stream<S, B>(bytes: S) -> TextStream
where
    S: Stream<Item = Result<B, ProviderError>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = StreamState {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(data) = st.pending.pop_front() {
                if data.trim() == "[DONE]" {
                    return None;
                }
                match parse_chunk(&data) {
                    Ok(Some(text)) => return Some((Ok(text), st)),
                    Ok(None) => continue,
                    Err(e) => {
                        st.finished = true;
                        st.pending.clear();
                        return Some((Err(e), st));
                    }
                }
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = st.decoder.push(chunk.as_ref());
                    st.pending.extend(events);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.pending.clear();
                    return Some((Err(e), st));
                }
                None => {
                    st.finished = true;
                    let events = st.decoder.finish();
                    st.pending.extend(events);
                }
            }
        }
    }))
}

/// Extract the delta text of one streamed chunk. `Ok(None)` for chunks
/// without textual content (role headers, finish markers).
fn parse_chunk(data: &str) -> Result<Option<String>, ProviderError> {
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::Decode(format!("bad stream chunk: {e}")))?;

    if let Some(err) = chunk.error {
        return Err(ProviderError::Failed(err.message));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty()))
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    web_search: Option<bool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl<'a> ChatCompletionRequest<'a> {
    fn from_request(request: &'a CompletionRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            web_search: request.web_search,
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Pass a successful response through, or turn it into a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(env) => env.error.message,
        Err(_) => body,
    };

    error!(%status, %message, "LLM request returned HTTP error");
    Err(ProviderError::Status { status: status.as_u16(), message })
}
