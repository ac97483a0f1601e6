//! chatgate: entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Build providers, token store, session registry and gateway
//!   6. Spawn Ctrl-C → shutdown signal watcher
//!   7. Serve HTTP until shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use chatgate::config::{self, Config};
use chatgate::error::AppError;
use chatgate::llm::{LlmProvider, providers};
use chatgate::logger;
use chatgate::subsystems::auth::TokenStore;
use chatgate::subsystems::comms::{self, AxumState};
use chatgate::subsystems::gateway::CompletionGateway;
use chatgate::subsystems::sessions::SessionRegistry;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    let force_cli_level = args.log_level.is_some();

    logger::init(effective_log_level, force_cli_level)?;

    info!(
        bind = %config.server.bind_addr(),
        tokens_file = %config.tokens_file.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let (primary, fallback) = build_providers(&config)?;
    let fallback_name = fallback.as_ref().unwrap_or(&primary).name();
    info!(primary = primary.name(), fallback = fallback_name, "providers ready");

    let registry = Arc::new(SessionRegistry::new());
    let gateway = CompletionGateway::new(registry, primary, fallback)
        .with_channel_capacity(config.stream.channel_capacity)
        .with_idle_timeout(Duration::from_secs(config.llm.openai.idle_timeout_seconds));
    let tokens = Arc::new(TokenStore::new(config.tokens_file.clone()));

    // Shared shutdown token: Ctrl-C cancels it.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    print_startup_summary(&config, fallback_name);

    let state = AxumState::new(&config, tokens, gateway);
    comms::axum_channel::run(&config.server.bind_addr(), state, shutdown).await?;

    Ok(())
}

fn build_providers(config: &Config) -> Result<(LlmProvider, Option<LlmProvider>), AppError> {
    let build = |name: &str| {
        providers::build(name, &config.llm, config.llm_api_key.clone())
            .map_err(|e| AppError::Llm(format!("provider '{name}': {e}")))
    };
    let primary = build(&config.llm.provider)?;
    let fallback = config.llm.fallback.as_deref().map(build).transpose()?;
    Ok((primary, fallback))
}

fn print_startup_summary(config: &Config, fallback: &str) {
    let fit = |text: String| -> String {
        const WIDTH: usize = 58;
        let char_count = text.chars().count();
        if char_count >= WIDTH {
            let mut out = text.chars().take(WIDTH - 1).collect::<String>();
            out.push('…');
            out
        } else {
            format!("{text:<WIDTH$}")
        }
    };

    let key_status = if config.llm_api_key.is_some() { "set" } else { "not set" };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ chatgate {:<52}║", env!("CARGO_PKG_VERSION"));
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║   {}║", fit(format!("pid: {}", std::process::id())));
    println!("║   {}║", fit(format!("http: {}", config.server.bind_addr())));
    println!("║   {}║", fit(format!("tokens: {}", config.tokens_file.display())));
    println!("║   {}║", fit(format!("auto-create sessions: {}", config.sessions.auto_create)));
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!(
        "║   {}║",
        fit(format!("llm: primary={} fallback={}", config.llm.provider, fallback))
    );
    println!(
        "║   {}║",
        fit(format!(
            "timeout={}s idle={}s api key {}",
            config.llm.openai.timeout_seconds, config.llm.openai.idle_timeout_seconds, key_status
        ))
    );
    println!("╚══════════════════════════════════════════════════════════════╝");
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: chatgate [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    // Each -v raises verbosity one tier:
    //   -v      → warn
    //   -vv     → info
    //   -vvv    → debug  (request flow, provider fallbacks)
    //   -vvvv+  → trace
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path }
}
