//! Process-wide session registry.
//!
//! An explicitly owned object (shared as `Arc<SessionRegistry>`), not a
//! global. Every operation takes the map lock once, so each call is atomic
//! on its own; sequences of calls are not. Unbounded and in-memory only:
//! sessions live until deleted or until the process exits.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ChatMessage, Session, Settings, SettingsPatch};
use crate::error::ApiError;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `id`, creating it with default settings if unknown.
    pub async fn get_or_create(&self, id: &str) -> Session {
        let mut map = self.sessions.write().await;
        map.entry(id.to_string())
            .or_insert_with(|| {
                info!(session_id = %id, "session auto-created");
                Session::new(id, Settings::default())
            })
            .clone()
    }

    /// Create a session under a fresh UUID. `patch` is merged over defaults.
    pub async fn create(&self, patch: Option<SettingsPatch>) -> Result<Session, ApiError> {
        let mut settings = Settings::default();
        if let Some(patch) = patch {
            patch.validate()?;
            settings.apply(patch);
        }

        let session = Session::new(Uuid::new_v4().to_string(), settings);
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());

        info!(session_id = %session.id, model = %session.settings.model, "session created");
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Result<Session, ApiError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(ApiError::session_not_found)
    }

    pub async fn history(&self, id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|s| s.history.clone())
            .ok_or_else(ApiError::session_not_found)
    }

    #[cfg(test)]
    async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// All sessions, oldest first.
    pub async fn list(&self) -> Vec<Session> {
        let mut all: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        match self.sessions.write().await.remove(id) {
            Some(_) => {
                info!(session_id = %id, "session deleted");
                Ok(())
            }
            None => Err(ApiError::session_not_found()),
        }
    }

    /// Merge `patch` into the session's settings and return the result.
    pub async fn update_settings(
        &self,
        id: &str,
        patch: SettingsPatch,
    ) -> Result<Settings, ApiError> {
        let mut map = self.sessions.write().await;
        let session = map.get_mut(id).ok_or_else(ApiError::session_not_found)?;
        if patch.is_empty() {
            return Err(ApiError::Validation("No settings provided".into()));
        }
        patch.validate()?;
        session.update_settings(patch);
        debug!(session_id = %id, settings = ?session.settings, "settings updated");
        Ok(session.settings.clone())
    }

    pub async fn clear_history(&self, id: &str) -> Result<(), ApiError> {
        let mut map = self.sessions.write().await;
        let session = map.get_mut(id).ok_or_else(ApiError::session_not_found)?;
        session.clear_history();
        debug!(session_id = %id, "history cleared");
        Ok(())
    }

    /// Append one message and return the updated session snapshot.
    pub async fn append(&self, id: &str, message: ChatMessage) -> Result<Session, ApiError> {
        let mut map = self.sessions.write().await;
        let session = map.get_mut(id).ok_or_else(ApiError::session_not_found)?;
        session.push(message);
        Ok(session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::sessions::Role;

    #[tokio::test]
    async fn get_or_create_is_stable_and_accumulates() {
        let reg = SessionRegistry::new();
        let first = reg.get_or_create("X").await;
        reg.append("X", ChatMessage::user("hello")).await.unwrap();
        let second = reg.get_or_create("X").await;
        assert_eq!(first.id, second.id);
        assert_eq!(second.history.len(), 1);
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn create_assigns_unique_uuid_ids() {
        let reg = SessionRegistry::new();
        let a = reg.create(None).await.unwrap();
        let b = reg.create(None).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
        assert_eq!(a.settings, Settings::default());
    }

    #[tokio::test]
    async fn create_rejects_unknown_model_without_side_effects() {
        let reg = SessionRegistry::new();
        let patch = SettingsPatch { model: Some("not-a-real-model".into()), ..Default::default() };
        let err = reg.create(Some(patch)).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(ref m) if m == "Invalid model: not-a-real-model"));
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn create_merges_partial_settings_over_defaults() {
        let reg = SessionRegistry::new();
        let patch = SettingsPatch { model: Some("gpt-4".into()), ..Default::default() };
        let s = reg.create(Some(patch)).await.unwrap();
        assert_eq!(s.settings.model, "gpt-4");
        assert_eq!(s.settings.max_tokens, 1000);
    }

    #[tokio::test]
    async fn missing_session_is_not_found_everywhere() {
        let reg = SessionRegistry::new();
        assert!(matches!(reg.get("nope").await, Err(ApiError::NotFound(_))));
        assert!(matches!(reg.delete("nope").await, Err(ApiError::NotFound(_))));
        assert!(matches!(reg.clear_history("nope").await, Err(ApiError::NotFound(_))));
        assert!(matches!(
            reg.update_settings("nope", SettingsPatch::default()).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            reg.append("nope", ChatMessage::user("x")).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let reg = SessionRegistry::new();
        let s = reg.create(None).await.unwrap();
        reg.delete(&s.id).await.unwrap();
        assert!(!reg.contains(&s.id).await);
        assert!(reg.get(&s.id).await.is_err());
    }

    #[tokio::test]
    async fn update_settings_validates_and_merges() {
        let reg = SessionRegistry::new();
        let s = reg.create(None).await.unwrap();

        let empty = reg.update_settings(&s.id, SettingsPatch::default()).await;
        assert!(matches!(empty, Err(ApiError::Validation(ref m)) if m == "No settings provided"));

        let bad = SettingsPatch { model: Some("nope".into()), ..Default::default() };
        assert!(reg.update_settings(&s.id, bad).await.is_err());

        let good = SettingsPatch { web_search: Some(true), ..Default::default() };
        let settings = reg.update_settings(&s.id, good).await.unwrap();
        assert!(settings.web_search);
        assert_eq!(settings.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn clear_history_empties_messages() {
        let reg = SessionRegistry::new();
        let s = reg.create(None).await.unwrap();
        reg.append(&s.id, ChatMessage::user("a")).await.unwrap();
        let after = reg.append(&s.id, ChatMessage::assistant("b")).await.unwrap();
        assert_eq!(after.history[1].role, Role::Assistant);
        reg.clear_history(&s.id).await.unwrap();
        assert!(reg.get(&s.id).await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn list_is_ordered_by_creation() {
        let reg = SessionRegistry::new();
        let a = reg.create(None).await.unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = reg.create(None).await.unwrap();
        let ids: Vec<String> = reg.list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }
}
