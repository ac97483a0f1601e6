//! LLM provider implementations.
//!
//! `build(name, config, api_key)` is the factory: called at startup for the
//! primary and (optionally) the fallback provider.
//! Adding a new backend = new module + new match arm.

pub mod dummy;
pub mod openai_compatible;

use crate::config::LlmConfig;
use crate::llm::{LlmProvider, ProviderError};

/// Construct the `LlmProvider` registered under `name`.
///
/// `api_key` is sourced from `LLM_API_KEY` env (never TOML) and is `None`
/// for keyless endpoints.
pub fn build(
    name: &str,
    config: &LlmConfig,
    api_key: Option<String>,
) -> Result<LlmProvider, ProviderError> {
    match name {
        "dummy" => Ok(LlmProvider::Dummy(dummy::DummyProvider::new())),
        "openai" | "openai-compatible" => {
            let oai = &config.openai;
            let p = openai_compatible::OpenAiCompatibleProvider::new(
                oai.api_base_url.clone(),
                oai.timeout_seconds,
                api_key,
            )?;
            Ok(LlmProvider::OpenAiCompatible(p))
        }
        _ => Err(ProviderError::UnknownProvider(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn llm_config() -> LlmConfig {
        Config::test_default(std::path::Path::new("/tmp")).llm
    }

    #[test]
    fn builds_known_providers() {
        let cfg = llm_config();
        assert_eq!(build("dummy", &cfg, None).unwrap().name(), "dummy");
        assert_eq!(build("openai", &cfg, Some("k".into())).unwrap().name(), "openai");
        assert_eq!(build("openai-compatible", &cfg, None).unwrap().name(), "openai");
    }

    #[test]
    fn unknown_provider_errors() {
        let err = build("g5f", &llm_config(), None).unwrap_err();
        assert!(matches!(err, ProviderError::UnknownProvider(ref n) if n == "g5f"));
    }
}
