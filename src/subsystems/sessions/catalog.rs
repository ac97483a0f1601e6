//! Static catalog of models a session may select.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub const MODELS: &[ModelDescriptor] = &[
    ModelDescriptor { id: "gpt-3.5-turbo", name: "GPT-3.5 Turbo", description: "Fast and efficient" },
    ModelDescriptor { id: "gpt-4", name: "GPT-4", description: "Advanced reasoning" },
    ModelDescriptor { id: "gpt-4o", name: "GPT-4o", description: "Latest GPT-4 version" },
    ModelDescriptor { id: "gpt-4o-mini", name: "GPT-4o Mini", description: "Compact but powerful" },
    ModelDescriptor { id: "claude-3-opus", name: "Claude-3 Opus", description: "Anthropic's flagship model" },
    ModelDescriptor { id: "claude-3-sonnet", name: "Claude-3 Sonnet", description: "Balanced Claude model" },
    ModelDescriptor { id: "gemini-pro", name: "Gemini Pro", description: "Google's AI model" },
];

pub fn find(id: &str) -> Option<&'static ModelDescriptor> {
    MODELS.iter().find(|m| m.id == id)
}

pub fn is_known(id: &str) -> bool {
    find(id).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_in_catalog() {
        assert!(is_known(DEFAULT_MODEL));
    }

    #[test]
    fn ids_are_unique() {
        let mut ids: Vec<&str> = MODELS.iter().map(|m| m.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), MODELS.len());
    }

    #[test]
    fn unknown_model_is_rejected() {
        assert!(!is_known("not-a-real-model"));
        assert!(!is_known("GPT-4"));
    }
}
