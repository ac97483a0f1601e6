//! Logging via tracing-subscriber, written to stderr.
//!
//! Call [`init`] once at startup, after config is resolved.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Crates whose per-connection chatter is capped at `warn` when a bare level
/// is configured.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls"];

/// Initialise the global tracing subscriber.
///
/// `level` is a bare level (`"error"` .. `"trace"`) or a full `EnvFilter`
/// directive such as `"chatgate=debug,tower_http=info"`.
///
/// With `prefer_level`, `level` wins and `RUST_LOG` is only the fallback
/// for an unparseable `level`. Without it, `RUST_LOG` wins when set.
pub fn init(level: &str, prefer_level: bool) -> Result<(), AppError> {
    let filter = build_filter(level, prefer_level)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}

fn build_filter(level: &str, prefer_level: bool) -> Result<EnvFilter, AppError> {
    let configured = directive(level);
    if prefer_level {
        EnvFilter::try_new(&configured).or_else(|level_err| {
            EnvFilter::try_from_default_env().map_err(|env_err| {
                AppError::Logger(format!(
                    "invalid log level '{level}': {level_err}; RUST_LOG parse failed: {env_err}"
                ))
            })
        })
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&configured))
            .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))
    }
}

/// Expand a bare level into a directive that also quiets transport crates.
/// Anything else is passed through untouched.
fn directive(level: &str) -> String {
    match parse_level(level) {
        Ok(filter) if filter > LevelFilter::WARN => {
            let mut out = level.to_string();
            for target in QUIET_TARGETS {
                out.push_str(&format!(",{target}=warn"));
            }
            out
        }
        _ => level.to_string(),
    }
}

/// Parse a bare log level string into a [`LevelFilter`].
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}
