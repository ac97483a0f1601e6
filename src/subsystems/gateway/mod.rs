//! Completion gateway: turns a chat turn on a session into provider calls.
//!
//! Each call appends the user message, tries the primary provider with the
//! session's full settings, and on any failure retries once against the
//! fallback provider with a simplified request. The reply (or, when
//! streaming, whatever text was produced) is appended to the session.
//!
//! Streaming runs in a spawned task that feeds a bounded channel. Dropping
//! the receiver stops provider polling at the next fragment.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::llm::{CompletionRequest, LlmProvider, ProviderError};
use crate::subsystems::sessions::{ChatMessage, Session, SessionRegistry};

const DEFAULT_CHANNEL_CAPACITY: usize = 32;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Both attempts failed. Carries the fallback's error, which is what the
/// caller gets to see.
#[derive(Debug, Error)]
#[error("Failed to get response: {fallback}")]
pub struct GenerationError {
    pub primary: ProviderError,
    pub fallback: ProviderError,
}

impl From<GenerationError> for ApiError {
    fn from(e: GenerationError) -> Self {
        ApiError::Generation(e.to_string())
    }
}

/// Result of a buffered chat turn.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub response: String,
    pub history: Vec<ChatMessage>,
}

/// Items delivered to a streaming consumer, in order: zero or more
/// `Chunk`s, then exactly one `Finished` unless the consumer went away.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(String),
    Finished { history: Vec<ChatMessage> },
}

#[derive(Clone)]
pub struct CompletionGateway {
    registry: Arc<SessionRegistry>,
    primary: LlmProvider,
    fallback: LlmProvider,
    channel_capacity: usize,
    idle_timeout: Duration,
}

impl CompletionGateway {
    /// Without an explicit `fallback` the primary provider is retried.
    pub fn new(
        registry: Arc<SessionRegistry>,
        primary: LlmProvider,
        fallback: Option<LlmProvider>,
    ) -> Self {
        let fallback = fallback.unwrap_or_else(|| primary.clone());
        Self {
            registry,
            primary,
            fallback,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn primary(&self) -> &LlmProvider {
        &self.primary
    }

    // ── Buffered ──────────────────────────────────────────────────────────────

    pub async fn complete(
        &self,
        session_id: &str,
        message: Option<String>,
    ) -> Result<ChatTurn, ApiError> {
        let session = self.begin_turn(session_id, message).await?;
        let request = build_request(&session);

        let response = self.generate(session_id, &request).await?;
        let updated = self
            .registry
            .append(session_id, ChatMessage::assistant(response.clone()))
            .await?;

        Ok(ChatTurn { response, history: updated.history })
    }

    async fn generate(
        &self,
        session_id: &str,
        request: &CompletionRequest,
    ) -> Result<String, GenerationError> {
        let primary = match self.primary.complete(request).await {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };
        warn!(
            session_id,
            provider = self.primary.name(),
            error = %primary,
            "primary completion failed, trying fallback"
        );

        match self.fallback.complete(&request.simplified()).await {
            Ok(text) => {
                info!(session_id, provider = self.fallback.name(), "fallback completion succeeded");
                Ok(text)
            }
            Err(fallback) => {
                error!(session_id, error = %fallback, "fallback completion failed");
                Err(GenerationError { primary, fallback })
            }
        }
    }

    // ── Streaming ─────────────────────────────────────────────────────────────

    /// Start a streamed turn. Session lookup errors are returned here,
    /// before any event is produced; later failures arrive in-band.
    pub async fn stream(
        &self,
        session_id: &str,
        message: Option<String>,
    ) -> Result<mpsc::Receiver<StreamEvent>, ApiError> {
        let session = self.begin_turn(session_id, message).await?;
        let request = build_request(&session);

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let gateway = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            gateway.run_stream(session_id, request, tx).await;
        });

        Ok(rx)
    }

    async fn run_stream(
        self,
        session_id: String,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let mut text = String::new();

        let outcome = match self.pump(&self.primary, &request, &tx, &mut text).await {
            Err(Pump::Failed(primary)) => {
                warn!(
                    session_id = %session_id,
                    provider = self.primary.name(),
                    error = %primary,
                    delivered = text.len(),
                    "primary stream failed, trying fallback"
                );
                match self.pump(&self.fallback, &request.simplified(), &tx, &mut text).await {
                    Err(Pump::Failed(fallback)) => {
                        error!(session_id = %session_id, error = %fallback, "fallback stream failed");
                        Err(Pump::Failed(fallback))
                    }
                    other => other,
                }
            }
            other => other,
        };

        let reply = match outcome {
            Ok(()) => ChatMessage::assistant(text),
            Err(Pump::Disconnected) => {
                debug!(session_id = %session_id, kept = text.len(), "stream consumer went away");
                ChatMessage::assistant(text)
            }
            Err(Pump::Failed(e)) => {
                let notice = format!("Error: Failed to get response: {e}");
                text.push_str(&notice);
                let _ = tx.send(StreamEvent::Chunk(notice)).await;
                ChatMessage::assistant_error(text)
            }
        };

        match self.registry.append(&session_id, reply).await {
            Ok(session) => {
                let _ = tx.send(StreamEvent::Finished { history: session.history }).await;
            }
            Err(_) => {
                warn!(session_id = %session_id, "session removed while streaming; reply dropped");
                let _ = tx.send(StreamEvent::Finished { history: Vec::new() }).await;
            }
        }
    }

    /// Forward one provider stream into `tx`, appending every fragment to `text`.
    async fn pump(
        &self,
        provider: &LlmProvider,
        request: &CompletionRequest,
        tx: &mpsc::Sender<StreamEvent>,
        text: &mut String,
    ) -> Result<(), Pump> {
        let mut fragments = match timeout(self.idle_timeout, provider.complete_stream(request)).await {
            Ok(opened) => opened.map_err(Pump::Failed)?,
            Err(_) => return Err(Pump::Failed(self.idle_error("stream did not open"))),
        };

        loop {
            let next = tokio::select! {
                _ = tx.closed() => return Err(Pump::Disconnected),
                next = timeout(self.idle_timeout, fragments.next()) => next,
            };

            match next {
                Err(_) => return Err(Pump::Failed(self.idle_error("no data received"))),
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => return Err(Pump::Failed(e)),
                Ok(Some(Ok(fragment))) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    text.push_str(&fragment);
                    if tx.send(StreamEvent::Chunk(fragment)).await.is_err() {
                        return Err(Pump::Disconnected);
                    }
                }
            }
        }
    }

    fn idle_error(&self, what: &str) -> ProviderError {
        ProviderError::Timeout(format!("{what} within {}s", self.idle_timeout.as_secs()))
    }

    // ── Shared ────────────────────────────────────────────────────────────────

    async fn begin_turn(&self, session_id: &str, message: Option<String>) -> Result<Session, ApiError> {
        match message.filter(|m| !m.is_empty()) {
            Some(m) => self.registry.append(session_id, ChatMessage::user(m)).await,
            None => self.registry.get(session_id).await,
        }
    }
}

enum Pump {
    Disconnected,
    Failed(ProviderError),
}

fn build_request(session: &Session) -> CompletionRequest {
    CompletionRequest {
        model: session.settings.model.clone(),
        messages: session.prompt(),
        temperature: session.settings.temperature,
        max_tokens: Some(session.settings.max_tokens),
        web_search: Some(session.settings.web_search),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::dummy::DummyProvider;
    use crate::subsystems::sessions::Role;

    fn dummy() -> LlmProvider {
        LlmProvider::Dummy(DummyProvider::new())
    }

    fn failing(msg: &str) -> LlmProvider {
        LlmProvider::Dummy(DummyProvider::failing(msg))
    }

    async fn gateway_with(primary: LlmProvider, fallback: Option<LlmProvider>) -> (CompletionGateway, String) {
        let registry = Arc::new(SessionRegistry::new());
        let id = registry.create(None).await.unwrap().id;
        (CompletionGateway::new(registry, primary, fallback).with_channel_capacity(4), id)
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> (Vec<String>, Vec<ChatMessage>) {
        let mut chunks = Vec::new();
        let mut history = None;
        while let Some(ev) = rx.recv().await {
            match ev {
                StreamEvent::Chunk(c) => chunks.push(c),
                StreamEvent::Finished { history: h } => history = Some(h),
            }
        }
        (chunks, history.expect("stream finished without history"))
    }

    #[tokio::test]
    async fn buffered_turn_appends_user_and_assistant() {
        let (gw, id) = gateway_with(dummy(), None).await;
        let turn = gw.complete(&id, Some("hello".into())).await.unwrap();
        assert_eq!(turn.response, "[echo] hello");
        assert_eq!(turn.history.len(), 2);
        assert_eq!(turn.history[0], ChatMessage::user("hello"));
        assert_eq!(turn.history[1], ChatMessage::assistant("[echo] hello"));
    }

    #[tokio::test]
    async fn buffered_turn_uses_fallback_when_primary_fails() {
        let (gw, id) = gateway_with(failing("primary down"), Some(dummy())).await;
        let turn = gw.complete(&id, Some("hi".into())).await.unwrap();
        assert_eq!(turn.response, "[echo] hi");
    }

    #[tokio::test]
    async fn buffered_double_failure_keeps_user_message_only() {
        let (gw, id) = gateway_with(failing("primary down"), Some(failing("backup down"))).await;
        let err = gw.complete(&id, Some("hi".into())).await.unwrap_err();
        assert!(matches!(err, ApiError::Generation(ref m) if m == "Failed to get response: backup down"));
        let history = gw.registry().history(&id).await.unwrap();
        assert_eq!(history, vec![ChatMessage::user("hi")]);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (gw, _) = gateway_with(dummy(), None).await;
        assert!(matches!(gw.complete("nope", Some("x".into())).await, Err(ApiError::NotFound(_))));
        assert!(matches!(gw.stream("nope", Some("x".into())).await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn streamed_chunks_concatenate_to_stored_reply() {
        let (gw, id) = gateway_with(dummy(), None).await;
        let rx = gw.stream(&id, Some("one two three".into())).await.unwrap();
        let (chunks, history) = drain(rx).await;
        assert_eq!(chunks.len(), 4);
        let last = history.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(chunks.concat(), last.content);
        assert!(!last.error);
    }

    #[tokio::test]
    async fn interrupted_primary_stream_continues_on_fallback() {
        let primary = LlmProvider::Dummy(DummyProvider::interrupted(1, "reset"));
        let (gw, id) = gateway_with(primary, Some(dummy())).await;
        let rx = gw.stream(&id, Some("a b".into())).await.unwrap();
        let (chunks, history) = drain(rx).await;
        assert_eq!(chunks.first().map(String::as_str), Some("[echo] "));
        assert_eq!(chunks.concat(), "[echo] [echo] a b");
        assert_eq!(history.last().unwrap().content, chunks.concat());
    }

    #[tokio::test]
    async fn streamed_double_failure_yields_error_entry() {
        let (gw, id) = gateway_with(failing("primary down"), Some(failing("backup down"))).await;
        let rx = gw.stream(&id, Some("hi".into())).await.unwrap();
        let (chunks, history) = drain(rx).await;
        assert_eq!(chunks, vec!["Error: Failed to get response: backup down".to_string()]);
        let last = history.last().unwrap();
        assert!(last.error);
        assert_eq!(last.content, chunks[0]);

        // The error entry is not replayed on the next turn.
        let session = gw.registry().get(&id).await.unwrap();
        assert_eq!(build_request(&session).messages.len(), 1);
    }

    #[tokio::test]
    async fn dropped_receiver_still_records_reply() {
        let (gw, id) = gateway_with(dummy(), None).await;
        let rx = gw.stream(&id, Some("x y z".into())).await.unwrap();
        drop(rx);

        for _ in 0..50 {
            if gw.registry().history(&id).await.unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let history = gw.registry().history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn request_carries_session_settings() {
        let registry = SessionRegistry::new();
        let mut session = registry.get_or_create("s").await;
        session.settings.web_search = true;
        session.push(ChatMessage::user("q"));
        let req = build_request(&session);
        assert_eq!(req.max_tokens, Some(1000));
        assert_eq!(req.web_search, Some(true));
        assert_eq!(req.messages.len(), 1);
    }
}
