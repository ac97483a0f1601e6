//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or an explicit `-f` path), then applies `PORT`, `CHATGATE_LOG_LEVEL` and
//! `CHATGATE_TOKENS_FILE` env overrides. `LLM_API_KEY` is only ever read from
//! the environment.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Listener configuration (`[server]`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Session behaviour (`[sessions]`).
#[derive(Debug, Clone)]
pub struct SessionsConfig {
    /// When `true`, chat endpoints create unknown session ids on first use
    /// instead of answering 404.
    pub auto_create: bool,
}

/// SSE delivery tuning (`[stream]`).
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Capacity of the bounded channel between gateway task and response.
    pub channel_capacity: usize,
    /// Interval between SSE keep-alive comments.
    pub keep_alive_seconds: u64,
}

/// OpenAI / OpenAI-compatible provider configuration (`[llm.openai]`).
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Per-request HTTP timeout for buffered completions, in seconds.
    pub timeout_seconds: u64,
    /// Maximum wait between two streamed fragments, in seconds.
    pub idle_timeout_seconds: u64,
}

/// LLM configuration (`[llm]`).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider serves the primary attempt (`"dummy"`, `"openai"`).
    pub provider: String,
    /// Provider used for the fallback attempt; `None` reuses the primary.
    pub fallback: Option<String>,
    pub openai: OpenAiConfig,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub server: ServerConfig,
    /// Path of the JSON token file (already expanded, no `~`).
    pub tokens_file: PathBuf,
    pub sessions: SessionsConfig,
    pub stream: StreamConfig,
    pub llm: LlmConfig,
    /// API key from `LLM_API_KEY`; `None` for keyless endpoints.
    pub llm_api_key: Option<String>,
}

/// Overrides sourced from the environment. Tests build this directly
/// instead of mutating process env vars.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    pub port: Option<String>,
    pub log_level: Option<String>,
    pub tokens_file: Option<String>,
    pub llm_api_key: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT").ok(),
            log_level: env::var("CHATGATE_LOG_LEVEL").ok(),
            tokens_file: env::var("CHATGATE_TOKENS_FILE").ok(),
            llm_api_key: env::var("LLM_API_KEY").ok(),
        }
    }
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    auth: RawAuth,
    #[serde(default)]
    sessions: RawSessions,
    #[serde(default)]
    stream: RawStream,
    #[serde(default)]
    llm: RawLlm,
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
}

impl Default for RawServer {
    fn default() -> Self {
        Self { host: default_host(), port: default_port(), log_level: default_log_level() }
    }
}

#[derive(Deserialize)]
struct RawAuth {
    #[serde(default = "default_tokens_file")]
    tokens_file: String,
}

impl Default for RawAuth {
    fn default() -> Self {
        Self { tokens_file: default_tokens_file() }
    }
}

#[derive(Deserialize, Default)]
struct RawSessions {
    #[serde(default)]
    auto_create: bool,
}

#[derive(Deserialize)]
struct RawStream {
    #[serde(default = "default_channel_capacity")]
    channel_capacity: usize,
    #[serde(default = "default_keep_alive_seconds")]
    keep_alive_seconds: u64,
}

impl Default for RawStream {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            keep_alive_seconds: default_keep_alive_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    fallback: Option<String>,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), fallback: None, openai: RawOpenAiConfig::default() }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_openai_idle_timeout_seconds")]
    idle_timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            timeout_seconds: default_openai_timeout_seconds(),
            idle_timeout_seconds: default_openai_idle_timeout_seconds(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tokens_file() -> String {
    "tokens.json".to_string()
}

fn default_channel_capacity() -> usize {
    32
}

fn default_keep_alive_seconds() -> u64 {
    15
}

fn default_llm_provider() -> String {
    "dummy".to_string()
}

fn default_openai_api_base_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_openai_timeout_seconds() -> u64 {
    120
}

fn default_openai_idle_timeout_seconds() -> u64 {
    60
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from `path` (or `config/default.toml`), then apply env overrides.
///
/// An explicit path must exist. The default path is optional; when it is
/// absent the built-in defaults are used.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let overrides = EnvOverrides::from_env();
    match path {
        Some(p) => load_from(Path::new(p), &overrides),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load_from(default_path, &overrides)
            } else {
                resolve(RawConfig::default(), &overrides)
            }
        }
    }
}

/// Internal loader: accepts an explicit path and overrides.
pub fn load_from(path: &Path, overrides: &EnvOverrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;
    resolve(parsed, overrides)
}

/// Parse config from an in-memory TOML string.
pub fn load_from_str(raw: &str, overrides: &EnvOverrides) -> Result<Config, AppError> {
    let parsed: RawConfig =
        toml::from_str(raw).map_err(|e| AppError::Config(format!("parse error: {e}")))?;
    resolve(parsed, overrides)
}

fn resolve(parsed: RawConfig, overrides: &EnvOverrides) -> Result<Config, AppError> {
    let port = match overrides.port.as_deref() {
        Some(p) => p
            .trim()
            .parse::<u16>()
            .map_err(|e| AppError::Config(format!("invalid PORT '{p}': {e}")))?,
        None => parsed.server.port,
    };

    if parsed.stream.channel_capacity == 0 {
        return Err(AppError::Config("stream.channel_capacity must be > 0".into()));
    }

    let tokens_file = overrides
        .tokens_file
        .as_deref()
        .unwrap_or(&parsed.auth.tokens_file);

    Ok(Config {
        log_level: overrides
            .log_level
            .clone()
            .unwrap_or(parsed.server.log_level),
        server: ServerConfig { host: parsed.server.host, port },
        tokens_file: expand_home(tokens_file),
        sessions: SessionsConfig { auto_create: parsed.sessions.auto_create },
        stream: StreamConfig {
            channel_capacity: parsed.stream.channel_capacity,
            keep_alive_seconds: parsed.stream.keep_alive_seconds,
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            fallback: parsed.llm.fallback,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
                idle_timeout_seconds: parsed.llm.openai.idle_timeout_seconds,
            },
        },
        llm_api_key: overrides.llm_api_key.clone(),
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

impl Config {
    /// Safe `Config` for tests: dummy LLM, tokens under `work_dir`.
    pub fn test_default(work_dir: &Path) -> Self {
        Self {
            log_level: "info".into(),
            server: ServerConfig { host: "127.0.0.1".into(), port: 0 },
            tokens_file: work_dir.join("tokens.json"),
            sessions: SessionsConfig { auto_create: false },
            stream: StreamConfig { channel_capacity: 8, keep_alive_seconds: 15 },
            llm: LlmConfig {
                provider: "dummy".into(),
                fallback: None,
                openai: OpenAiConfig {
                    api_base_url: "http://localhost:0/v1/chat/completions".into(),
                    timeout_seconds: 1,
                    idle_timeout_seconds: 1,
                },
            },
            llm_api_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL_TOML: &str = r#"
[server]
host = "127.0.0.1"
port = 8081
log_level = "debug"

[auth]
tokens_file = "/var/lib/chatgate/tokens.json"

[sessions]
auto_create = true

[stream]
channel_capacity = 4
keep_alive_seconds = 5

[llm]
default = "openai"
fallback = "dummy"

[llm.openai]
api_base_url = "http://localhost:1337/v1/chat/completions"
timeout_seconds = 30
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = load_from_str("", &EnvOverrides::default()).unwrap();
        assert_eq!(cfg.server.port, 5000);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.tokens_file, PathBuf::from("tokens.json"));
        assert!(!cfg.sessions.auto_create);
        assert_eq!(cfg.llm.provider, "dummy");
        assert!(cfg.llm.fallback.is_none());
        assert_eq!(cfg.stream.channel_capacity, 32);
    }

    #[test]
    fn parse_full_config() {
        let f = write_toml(FULL_TOML);
        let cfg = load_from(f.path(), &EnvOverrides::default()).unwrap();
        assert_eq!(cfg.server.bind_addr(), "127.0.0.1:8081");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.tokens_file, PathBuf::from("/var/lib/chatgate/tokens.json"));
        assert!(cfg.sessions.auto_create);
        assert_eq!(cfg.stream.channel_capacity, 4);
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.fallback.as_deref(), Some("dummy"));
        assert_eq!(cfg.llm.openai.timeout_seconds, 30);
        assert_eq!(cfg.llm.openai.idle_timeout_seconds, 60);
    }

    #[test]
    fn env_overrides_win() {
        let overrides = EnvOverrides {
            port: Some("9000".into()),
            log_level: Some("trace".into()),
            tokens_file: Some("/tmp/t.json".into()),
            llm_api_key: Some("sk-test".into()),
        };
        let cfg = load_from_str(FULL_TOML, &overrides).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.log_level, "trace");
        assert_eq!(cfg.tokens_file, PathBuf::from("/tmp/t.json"));
        assert_eq!(cfg.llm_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn invalid_port_errors() {
        let overrides = EnvOverrides { port: Some("http".into()), ..Default::default() };
        let err = load_from_str("", &overrides).unwrap_err();
        assert!(err.to_string().contains("invalid PORT"));
    }

    #[test]
    fn zero_channel_capacity_rejected() {
        let err = load_from_str("[stream]\nchannel_capacity = 0\n", &EnvOverrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("channel_capacity"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), &EnvOverrides::default());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn malformed_toml_errors() {
        let f = write_toml("[server\nport = 1");
        assert!(load_from(f.path(), &EnvOverrides::default()).is_err());
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.chatgate/tokens.json");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with("tokens.json"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }
}
