//! # Anthropic-to-OpenAI Protocol Translation Proxy
//!
//! This crate provides a local proxy server that translates Anthropic
//! Messages API requests into OpenAI-compatible Chat Completions or
//! Responses API calls, and translates the replies back — streaming or not.
//! While primarily designed as a binary application, this library exposes
//! its core functionality for programmatic use.
//!
//! ## Library Usage
//!
//! ```rust,no_run
//! use claude_model_router::{Config, CliArgs, create_app};
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
//! ## Modules
//!
//! - [`config`] - CLI/environment configuration
//! - [`mapper`] - Pure Anthropic ↔ OpenAI request/response translation
//! - [`upstream`] - Upstream URL building, credential resolution, HTTP dispatch
//! - [`stream`] - SSE re-synthesis state machine
//! - [`server`] - HTTP server setup and route handlers
//! - [`supervisor`] - Out-of-process lifecycle management for local proxy instances
//! - [`error`] - Error types and handling

pub mod config;
pub mod error;
pub mod mapper;
pub mod server;
pub mod stream;
pub mod supervisor;
pub mod upstream;

// Re-export commonly used types
pub use config::{CliArgs, Config};
pub use error::ProxyError;

/// Creates a new proxy application with the given configuration.
///
/// This is a convenience function that sets up the full application stack
/// including upstream dispatch, routing, and middleware.
///
/// # Arguments
///
/// * `config` - Application configuration
///
/// # Returns
///
/// Returns an Axum Router that can be served directly.
///
/// # Errors
///
/// Returns a `ProxyError` if the upstream HTTP client can't be built.
///
/// # Examples
///
/// ```rust,no_run
/// use claude_model_router::{Config, CliArgs, create_app};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_args_and_env(CliArgs::default())?;
///     let app = create_app(config)?;
///
///     let listener = tokio::net::TcpListener::bind("127.0.0.1:19000").await?;
///     axum::serve(listener, app).await?;
///     Ok(())
/// }
/// ```
pub fn create_app(config: Config) -> Result<axum::Router, ProxyError> {
    use axum::Router;
    use axum::routing::{get, post};
    use std::sync::Arc;
    use tower_http::cors::CorsLayer;
    use tower_http::trace::TraceLayer;

    let app_state = Arc::new(server::AppState::new(config)?);

    Ok(Router::new()
        .route("/messages", post(server::messages))
        .route("/v1/messages", post(server::messages))
        .route("/health", get(server::health))
        .fallback(server::not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state))
}
