//! # claude-model-router — Anthropic-to-OpenAI Protocol Translation Proxy
//!
//! A local proxy server that translates Anthropic Messages API requests into
//! OpenAI-compatible Chat Completions or Responses API calls, streaming or
//! not, with an automatic one-shot fallback when a model rejects Chat
//! Completions. Built with Rust for type safety, performance, and
//! reliability.
//!
//! ## Features
//!
//! - **Anthropic-compatible front door**: `POST /messages` and
//!   `POST /v1/messages` accept the Anthropic Messages API shape directly.
//! - **Dual upstream dispatch**: routes to Chat Completions or the Responses
//!   API per model policy, with a one-shot fallback on rejection.
//! - **Streaming Support**: Server-Sent Events (SSE) re-synthesis for both
//!   upstream flavors.
//! - **Error Handling**: Comprehensive error handling with proper Result types.
//! - **Type Safety**: Leverages Rust's type system for compile-time safety.
//! - **Performance**: Async/await with Tokio for high concurrency.
//! - **Configurable Logging**: Structured logging with tracing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use claude_model_router::{CliArgs, Config, create_app};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_args_and_env(CliArgs::default())?;
//!     let app = create_app(config)?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:19000").await?;
//!     axum::serve(listener, app).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Configuration is layered: CLI flags over environment variables over
//! built-in defaults. No configuration file is read and no interactive setup
//! is offered — see `--help` for the supported flags.
//!
//! ```bash
//! export MODEL_ROUTER_PROXY_PORT=19000
//! export MODEL_ROUTER_OPENAI_BASE_URL=https://api.openai.com/v1
//! export MODEL_ROUTER_LOG_LEVEL=info
//! ```
//!
//! ## API Usage
//!
//! ```bash
//! curl -X POST http://127.0.0.1:19000/v1/messages \
//!   -H "Content-Type: application/json" \
//!   -H "x-api-key: $OPENAI_API_KEY" \
//!   -d '{
//!     "model": "gpt-4o",
//!     "max_tokens": 256,
//!     "messages": [{"role": "user", "content": "Hello!"}]
//!   }'
//! ```
//!
//! ## License
//!
//! Licensed under either of Apache License, Version 2.0 or MIT license at your option.
//!
//! Authors: Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp
//!

/* --- uses ------------------------------------------------------------------------------------ */

use std::env;
use std::str::FromStr;

use claude_model_router::{CliArgs, Config, ProxyError, create_app};

/* --- constants ------------------------------------------------------------------------------ */

/** the version as defined in cargo.toml */
const VERSION: &str = env!("CARGO_PKG_VERSION");

/* --- start of code -------------------------------------------------------------------------- */

///
/// Main application entry point for the Anthropic-to-OpenAI protocol
/// translation proxy.
///
/// Initializes logging, loads configuration from CLI flags and environment
/// variables, creates the application state, and starts the HTTP server with
/// proper routing and middleware.
#[tokio::main]
async fn main() {
    if let Some(exit_code) = handle_cli_args() {
        std::process::exit(exit_code);
    }

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ProxyError> {
    let cli = CliArgs::parse(env::args().skip(1))?;
    let config = Config::from_args_and_env(cli)?;
    initialize_logging(&config);

    let bind_addr = config.bind_addr();
    let app = create_app(config)?;

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| ProxyError::Config(format!("failed to bind to {bind_addr}: {e}")))?;

    tracing::info!(bind_addr, "proxy listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| ProxyError::Config(format!("server error: {e}")))
}

///
/// Handle `--version`/`-V` and `--help`/`-h` before configuration is loaded,
/// so these always work even with a broken environment.
///
/// # Returns
///  * `Some(exit_code)` if the program should exit immediately
///  * `None` to continue with normal startup
fn handle_cli_args() -> Option<i32> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        return None;
    }

    match args[1].as_str() {
        "--version" | "-V" => {
            println!("claude-model-router {VERSION}");
            Some(0)
        }
        "--help" | "-h" => {
            print_help();
            Some(0)
        }
        other if other.starts_with('-') => {
            // Let `Config::from_args_and_env` surface unknown-flag errors
            // uniformly instead of duplicating the flag list here.
            None
        }
        other => {
            eprintln!("Error: Unknown command: {other}");
            eprintln!();
            print_help();
            Some(1)
        }
    }
}

///
/// Print help information for the CLI.
fn print_help() {
    println!("claude-model-router v{VERSION}");
    println!("Local proxy translating Anthropic Messages API requests to an OpenAI-compatible upstream");
    println!();
    println!("USAGE:");
    println!("    claude-model-router [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --host <HOST>          Bind host (default: 127.0.0.1)");
    println!("    --port <PORT>          Bind port (default: 19000)");
    println!("    --upstream <URL>       Upstream OpenAI-compatible base URL");
    println!("    --timeout <SECS>       Upstream request timeout in seconds (default: 60)");
    println!("    --log-level <LEVEL>    trace, debug, info, warn, error (default: info)");
    println!("    -h, --help             Print help information");
    println!("    -V, --version          Print version information");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    MODEL_ROUTER_PROXY_HOST        Overridden by --host");
    println!("    MODEL_ROUTER_PROXY_PORT        Overridden by --port");
    println!("    MODEL_ROUTER_OPENAI_BASE_URL    Overridden by --upstream");
    println!("    OPENAI_BASE_URL, OPENAI_API_BASE    Fallbacks for the upstream base URL");
    println!("    MODEL_ROUTER_LOG_LEVEL         Overridden by --log-level");
    println!("    MODEL_ROUTER_FORCE_RESPONSES    Force every request onto the Responses API");
    println!("    OPENAI_API_KEY, ANTHROPIC_AUTH_TOKEN    Fallback upstream credentials");
    println!();
    println!("EXAMPLES:");
    println!("    claude-model-router                         Start the proxy server");
    println!("    claude-model-router --port 19010 --log-level debug");
}

///
/// Initialize structured logging per the resolved log level.
fn initialize_logging(config: &Config) {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from_str(config.log_level.as_filter()).unwrap_or(tracing::Level::INFO))
        .with_target(false)
        .init();
}
