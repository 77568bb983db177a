//!
//! Upstream dispatch to an OpenAI-compatible backend.
//!
//! Builds the correct upstream URL for either endpoint flavor, resolves the
//! caller's bearer credential, and issues the HTTP POST. Streaming callers
//! get the raw byte stream back for [`crate::stream`] to drain; non-streaming
//! callers get a parsed JSON body plus the upstream status.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::time::Duration;

use axum::http::HeaderMap;
use reqwest::Client;
use serde_json::Value;

use crate::config::{Config, DEFAULT_USER_AGENT};
use crate::error::{ProxyError, Result};

/* --- types ----------------------------------------------------------------------------------- */

/// Which upstream endpoint a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    ChatCompletions,
    Responses,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Endpoint::ChatCompletions => "v1/chat/completions",
            Endpoint::Responses => "v1/responses",
        }
    }
}

/// A non-streaming upstream reply: status plus parsed (or best-effort) body.
pub struct UpstreamResponse {
    pub status: reqwest::StatusCode,
    pub body: Value,
}

/* --- start of code -------------------------------------------------------------------------- */

///
/// Build the upstream URL for `endpoint` against `base`, collapsing the
/// `/v1` segment so it never appears twice and is never missing.
///
/// # Arguments
///  * `base` - configured upstream base URL, trailing slash optional
///  * `endpoint` - which upstream endpoint to target
///
/// # Returns
///  * the fully-qualified upstream URL
pub fn build_upstream_url(base: &str, endpoint: Endpoint) -> String {
    let base = base.trim_end_matches('/');
    let path = endpoint.path();
    if let Some(stripped) = base.strip_suffix("/v1") {
        let tail = path.strip_prefix("v1/").unwrap_or(path);
        return format!("{stripped}/v1/{tail}");
    }
    format!("{base}/{path}")
}

///
/// Extract the caller's API key following the documented precedence:
/// `x-api-key` header, then `Authorization: Bearer`, then `OPENAI_API_KEY`,
/// then the `ANTHROPIC_AUTH_TOKEN` fallback credential.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        let trimmed = key.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ").or_else(|| auth.strip_prefix("bearer ")) {
            let trimmed = token.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    std::env::var("OPENAI_API_KEY").ok().or_else(|| std::env::var("ANTHROPIC_AUTH_TOKEN").ok())
}

///
/// Thin wrapper around a shared `reqwest::Client`, constructed once at
/// startup per [`crate::config::Config::timeout_secs`] and reused across
/// requests.
#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    upstream_base: String,
}

impl UpstreamClient {
    ///
    /// Build a client from configuration.
    ///
    /// # Returns
    ///  * a configured client
    ///  * `ProxyError::Config` if the underlying `reqwest::Client` can't be built
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProxyError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, upstream_base: config.upstream_base.clone() })
    }

    ///
    /// Issue a non-streaming POST and return the parsed upstream body.
    ///
    /// Non-2xx responses are returned as `Ok` (with the status preserved on
    /// `UpstreamResponse`), not surfaced as `Err` — the caller decides
    /// whether that warrants the Chat→Responses fallback.
    pub async fn post(&self, endpoint: Endpoint, api_key: &str, body: &Value) -> Result<UpstreamResponse> {
        let url = build_upstream_url(&self.upstream_base, endpoint);
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::USER_AGENT, DEFAULT_USER_AGENT)
            .json(body)
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str(&text).unwrap_or(Value::Null);
        Ok(UpstreamResponse { status, body: parsed })
    }

    ///
    /// Issue a streaming POST and return the raw byte stream for
    /// [`crate::stream`] to drain line by line.
    pub async fn post_stream(
        &self,
        endpoint: Endpoint,
        api_key: &str,
        body: &Value,
    ) -> Result<reqwest::Response> {
        let url = build_upstream_url(&self.upstream_base, endpoint);
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::USER_AGENT, DEFAULT_USER_AGENT)
            .json(body)
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable(e.to_string()))?;
        Ok(response)
    }
}

/// Does an upstream error body indicate the model doesn't support Chat
/// Completions and should instead be retried against Responses?
pub fn is_not_chat_model_error(payload: &Value) -> bool {
    let message = payload
        .get("error")
        .and_then(|err| err.get("message"))
        .and_then(Value::as_str)
        .or_else(|| payload.get("message").and_then(Value::as_str))
        .unwrap_or("")
        .to_lowercase();
    if message.contains("not a chat model") && message.contains("chat/completions") {
        return true;
    }
    message.contains("v1/chat/completions")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_builder_never_doubles_or_drops_v1() {
        assert_eq!(
            build_upstream_url("https://api.openai.com/v1", Endpoint::ChatCompletions),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            build_upstream_url("https://api.openai.com", Endpoint::ChatCompletions),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            build_upstream_url("https://api.openai.com/v1/", Endpoint::Responses),
            "https://api.openai.com/v1/responses"
        );
    }

    #[test]
    fn api_key_precedence_prefers_x_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "from-header".parse().unwrap());
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer from-bearer".parse().unwrap());
        assert_eq!(extract_api_key(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn api_key_falls_back_to_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer from-bearer".parse().unwrap());
        assert_eq!(extract_api_key(&headers).as_deref(), Some("from-bearer"));
    }

    #[test]
    fn detects_not_chat_model_error() {
        let payload = serde_json::json!({"error": {"message": "This model is not a chat model and thus not supported in the v1/chat/completions endpoint"}});
        assert!(is_not_chat_model_error(&payload));
        assert!(!is_not_chat_model_error(&serde_json::json!({"error": {"message": "rate limited"}})));
    }
}
