//!
//! Bidirectional translation between the Anthropic Messages API shape and
//! the two OpenAI request/response shapes (Chat Completions, Responses).
//!
//! Every function here is pure: no I/O, no shared state, deterministic
//! output for a given input. [`request`] builds outbound OpenAI payloads
//! from an inbound Anthropic request; [`response`] builds an outbound
//! Anthropic payload from a non-streaming OpenAI reply. The streaming
//! equivalent of [`response`] lives in [`crate::stream`], since it needs a
//! state machine rather than a single pure function.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- modules --------------------------------------------------------------------------------- */

pub mod request;
pub mod response;

/* --- uses ------------------------------------------------------------------------------------ */

use serde::{Deserialize, Serialize};
use serde_json::Value;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Incoming Anthropic Messages API request body.
///
/// Only the fields this proxy inspects or forwards are modeled; unknown
/// fields are simply absent from the parsed struct rather than preserved.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicRequest {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop_sequences: Option<Vec<String>>,
    pub system: Option<AnthropicText>,
    #[serde(default)]
    pub messages: Vec<AnthropicMessage>,
    pub tools: Option<Vec<AnthropicTool>>,
    pub tool_choice: Option<AnthropicToolChoice>,
    #[serde(default)]
    pub stream: bool,
}

///
/// A single Anthropic conversation message.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: AnthropicText,
}

///
/// Anthropic `system`/message `content` union: either a plain string or a
/// sequence of tagged content blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnthropicText {
    String(String),
    Blocks(Vec<ContentBlock>),
}

///
/// A single Anthropic content block, keyed by `type`.
///
/// `Other` preserves any block this proxy doesn't special-case so it can
/// still be flattened to a placeholder rather than silently dropped.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image {
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<Value>,
    },
    ToolUse {
        id: Option<String>,
        name: Option<String>,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: Option<String>,
        #[serde(default)]
        content: Option<AnthropicText>,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

///
/// Anthropic tool definition.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicTool {
    pub name: Option<String>,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
    pub strict: Option<bool>,
}

///
/// Anthropic `tool_choice`: a bare mode string or a `{type:"tool",name}` object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnthropicToolChoice {
    Mode(String),
    Tool {
        #[serde(rename = "type")]
        choice_type: String,
        name: Option<String>,
    },
}

///
/// Outgoing Anthropic Messages API response body (non-streaming).
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: &'static str,
    pub stop_sequence: Option<String>,
    pub usage: AnthropicUsage,
}

///
/// Token usage, normalized to Anthropic's field names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct AnthropicUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/* --- start of code -------------------------------------------------------------------------- */

impl AnthropicText {
    ///
    /// Coerce any Anthropic text-or-blocks value to a single plain string,
    /// the way `coerce_text` flattens `system`/message content: text blocks
    /// are concatenated, images become `[image omitted]`, and anything else
    /// becomes `[unsupported content omitted]`.
    pub fn coerce(&self) -> String {
        match self {
            AnthropicText::String(s) => s.clone(),
            AnthropicText::Blocks(blocks) => blocks.iter().map(coerce_block).collect(),
        }
    }
}

fn coerce_block(block: &ContentBlock) -> String {
    match block {
        ContentBlock::Text { text } => text.clone(),
        ContentBlock::Image { .. } => "[image omitted]".to_string(),
        _ => "[unsupported content omitted]".to_string(),
    }
}

/// Render a tool-input `Value` as the JSON-encoded arguments string OpenAI
/// expects, passing a string input through unchanged.
pub(crate) fn input_to_arguments(input: &Value) -> String {
    match input {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Opaque fallback identifier generator, mirroring `tool_{uuid.uuid4().hex}`.
pub(crate) fn fallback_id(prefix: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("{prefix}{nanos:x}")
}
