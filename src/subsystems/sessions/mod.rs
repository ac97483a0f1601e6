//! Chat sessions: settings, message history and timestamps.
//!
//! A [`Session`] is plain data. Ownership lives in the
//! [`registry::SessionRegistry`]; callers only ever see cloned snapshots.

pub mod catalog;
pub mod registry;

pub use registry::SessionRegistry;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::llm::PromptMessage;

// ── Messages ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on assistant entries synthesised from a failed generation. Such
    /// entries are kept for the record but never replayed to the provider.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), error: false }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), error: false }
    }

    pub fn assistant_error(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), error: true }
    }
}

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(alias = "web_search_enabled")]
    pub web_search: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: catalog::DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            web_search: false,
        }
    }
}

impl Settings {
    /// Merge the keys present in `patch`. Call [`SettingsPatch::validate`] first.
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(model) = patch.model {
            self.model = model;
        }
        if let Some(t) = patch.temperature {
            self.temperature = t;
        }
        if let Some(n) = patch.max_tokens {
            self.max_tokens = n;
        }
        if let Some(w) = patch.web_search {
            self.web_search = w;
        }
    }
}

/// A partial settings update; absent keys leave the current value alone.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SettingsPatch {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default, alias = "web_search_enabled")]
    pub web_search: Option<bool>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.model.is_none()
            && self.temperature.is_none()
            && self.max_tokens.is_none()
            && self.web_search.is_none()
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if let Some(model) = &self.model {
            if !catalog::is_known(model) {
                return Err(ApiError::Validation(format!("Invalid model: {model}")));
            }
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ApiError::Validation(format!(
                    "Invalid temperature: {t} (expected 0.0 to 2.0)"
                )));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(ApiError::Validation("Invalid max_tokens: must be greater than 0".into()));
        }
        Ok(())
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub settings: Settings,
    pub history: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Wire shape of `GET /api/sessions` entries and `GET /api/sessions/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: String,
    pub last_activity: String,
    pub message_count: usize,
    pub settings: Settings,
}

impl Session {
    pub fn new(id: impl Into<String>, settings: Settings) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            settings,
            history: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.history.push(message);
        self.touch();
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.touch();
    }

    pub fn update_settings(&mut self, patch: SettingsPatch) {
        self.settings.apply(patch);
        self.touch();
    }

    /// History as sent to the provider; synthetic error entries are skipped.
    pub fn prompt(&self) -> Vec<PromptMessage> {
        self.history
            .iter()
            .filter(|m| !m.error)
            .map(|m| PromptMessage { role: m.role.as_str().to_string(), content: m.content.clone() })
            .collect()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            created_at: self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            last_activity: self.last_activity.to_rfc3339_opts(SecondsFormat::Millis, true),
            message_count: self.history.len(),
            settings: self.settings.clone(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
