//!
//! Configuration management for the protocol translation proxy.
//!
//! Loads configuration from CLI flags layered over environment variables,
//! with sensible defaults below both. Follows Single Responsibility
//! Principle - manages all configuration concerns.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::env;

use crate::error::{ProxyError, Result};

/* --- constants ------------------------------------------------------------------------------ */

/** fallback upstream base used when nothing else resolves one */
pub const DEFAULT_UPSTREAM_BASE: &str = "https://api.openai.com/v1";

/** default bind host for the proxy's own HTTP listener */
pub const DEFAULT_HOST: &str = "127.0.0.1";

/** default bind port for the proxy's own HTTP listener */
pub const DEFAULT_PORT: u16 = 19000;

/** default upstream request timeout, seconds */
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/** `User-Agent` sent on every upstream request */
pub const DEFAULT_USER_AGENT: &str = "claude-model-router-proxy/1.0";

/** advertised proxy version, surfaced on `/health` */
pub const PROXY_VERSION: &str = "1.1";

/* --- types ----------------------------------------------------------------------------------- */

///
/// Application configuration structure.
///
/// Contains all runtime configuration options loaded from CLI flags and
/// environment variables. Provides a single entry point for loading.
#[derive(Debug, Clone)]
pub struct Config {
    /** host the proxy's own HTTP listener binds to */
    pub host: String,
    /** port the proxy's own HTTP listener binds to */
    pub port: u16,
    /** resolved upstream OpenAI-compatible base URL, trailing slash stripped */
    pub upstream_base: String,
    /** upstream request timeout */
    pub timeout_secs: u64,
    /** application logging level */
    pub log_level: LogLevel,
    /** force every request onto the Responses API regardless of model name */
    pub force_responses: bool,
}

///
/// Logging level enumeration.
///
/// Defines available log levels with helper methods for level checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/* --- start of code -------------------------------------------------------------------------- */

impl LogLevel {
    ///
    /// Check if trace-level logging is enabled.
    ///
    /// Returns true for Trace and Debug levels, which enable detailed logging
    /// of request/response shapes.
    pub fn is_trace_enabled(self) -> bool {
        matches!(self, LogLevel::Trace | LogLevel::Debug)
    }

    /// Render as the `tracing_subscriber` filter directive it corresponds to.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<&str> for LogLevel {
    ///
    /// Convert string representation to LogLevel enum.
    ///
    /// Case-insensitive conversion with Info as the default fallback.
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Parsed CLI flags, prior to being layered over the environment.
#[derive(Debug, Default)]
pub struct CliArgs {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub upstream: Option<String>,
    pub timeout: Option<u64>,
    pub log_level: Option<String>,
}

impl CliArgs {
    ///
    /// Hand-parse `--flag value` / `--flag=value` pairs off an argument
    /// iterator. No CLI crate is introduced here; the entry point hand-parses
    /// `env::args()` the same way.
    ///
    /// # Returns
    ///  * parsed flags
    ///  * `ProxyError::Config` if a recognized flag is missing its value or a
    ///    numeric flag doesn't parse
    pub fn parse<I: Iterator<Item = String>>(mut args: I) -> Result<Self> {
        let mut parsed = CliArgs::default();
        while let Some(arg) = args.next() {
            let (flag, inline_value) = match arg.split_once('=') {
                Some((f, v)) => (f.to_string(), Some(v.to_string())),
                None => (arg, None),
            };
            let mut next_value = || -> Result<String> {
                if let Some(v) = inline_value.clone() {
                    return Ok(v);
                }
                args.next()
                    .ok_or_else(|| ProxyError::Config(format!("{flag} requires a value")))
            };
            match flag.as_str() {
                "--host" => parsed.host = Some(next_value()?),
                "--port" => {
                    let v = next_value()?;
                    parsed.port = Some(
                        v.parse().map_err(|_| ProxyError::Config(format!("Invalid --port value: {v}")))?,
                    );
                }
                "--upstream" => parsed.upstream = Some(next_value()?),
                "--timeout" => {
                    let v = next_value()?;
                    parsed.timeout = Some(
                        v.parse()
                            .map_err(|_| ProxyError::Config(format!("Invalid --timeout value: {v}")))?,
                    );
                }
                "--log-level" => parsed.log_level = Some(next_value()?),
                "--help" | "-h" | "--version" | "-V" => {
                    // handled by the binary before Config is built
                }
                other => {
                    return Err(ProxyError::Config(format!("Unknown flag: {other}")));
                }
            }
        }
        Ok(parsed)
    }
}

impl Config {
    ///
    /// Load configuration from CLI flags layered over environment variables.
    ///
    /// Attempts to load a `.env` file if present, then resolves each setting
    /// from CLI flag, then environment variable(s), then built-in default.
    ///
    /// # Arguments
    ///  * `cli` - already-parsed CLI flags
    ///
    /// # Returns
    ///  * Configuration object with all settings loaded
    ///  * `ProxyError::Config` if a value is present but invalid
    pub fn from_args_and_env(cli: CliArgs) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let host = cli
            .host
            .or_else(|| env::var("MODEL_ROUTER_PROXY_HOST").ok())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match cli.port {
            Some(p) => p,
            None => match env::var("MODEL_ROUTER_PROXY_PORT") {
                Ok(v) => v
                    .parse()
                    .map_err(|_| ProxyError::Config(format!("Invalid MODEL_ROUTER_PROXY_PORT value: {v}")))?,
                Err(_) => DEFAULT_PORT,
            },
        };

        let upstream_base = cli
            .upstream
            .unwrap_or_else(Self::resolve_upstream_base)
            .trim_end_matches('/')
            .to_string();

        let timeout_secs = cli.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);

        let log_level = LogLevel::from(
            cli.log_level
                .or_else(|| env::var("MODEL_ROUTER_LOG_LEVEL").ok())
                .unwrap_or_else(|| "info".to_string())
                .as_str(),
        );

        let force_responses = Self::truthy_env("MODEL_ROUTER_FORCE_RESPONSES");

        Ok(Config { host, port, upstream_base, timeout_secs, log_level, force_responses })
    }

    ///
    /// Resolve the upstream base URL from the environment fallback chain:
    /// `MODEL_ROUTER_OPENAI_BASE_URL` → `OPENAI_BASE_URL` → `OPENAI_API_BASE`
    /// → the built-in default.
    pub fn resolve_upstream_base() -> String {
        env::var("MODEL_ROUTER_OPENAI_BASE_URL")
            .or_else(|_| env::var("OPENAI_BASE_URL"))
            .or_else(|_| env::var("OPENAI_API_BASE"))
            .unwrap_or_else(|_| DEFAULT_UPSTREAM_BASE.to_string())
    }

    /// Parse a boolean-ish environment variable the way the Responses-API
    /// force-override flag is parsed: `1`, `true`, `yes`, `on` (case-insensitive).
    fn truthy_env(name: &str) -> bool {
        env::var(name)
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }

    /// The address the proxy's own HTTP listener should bind to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_flags() {
        let args = ["--host", "0.0.0.0", "--port", "9001", "--timeout=30"].into_iter().map(String::from);
        let cli = CliArgs::parse(args).unwrap();
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.port, Some(9001));
        assert_eq!(cli.timeout, Some(30));
    }

    #[test]
    fn rejects_unknown_flag() {
        let args = ["--bogus", "x"].into_iter().map(String::from);
        assert!(CliArgs::parse(args).is_err());
    }

    #[test]
    fn rejects_missing_value() {
        let args = ["--port"].into_iter().map(String::from);
        assert!(CliArgs::parse(args).is_err());
    }

    #[test]
    fn log_level_is_case_insensitive() {
        assert!(matches!(LogLevel::from("DEBUG"), LogLevel::Debug));
        assert!(matches!(LogLevel::from("bogus"), LogLevel::Info));
    }
}
