//!
//! OpenAI response → Anthropic response translation (non-streaming).
//!
//! Streaming translation lives in [`crate::stream`] since it needs a state
//! machine, not a single pure function; this module only handles the
//! already-complete JSON bodies both upstream flavors return.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use serde_json::Value;

use super::{AnthropicResponse, AnthropicUsage, ContentBlock, fallback_id};

/* --- start of code -------------------------------------------------------------------------- */

///
/// Convert a Chat Completions response body into an Anthropic response.
pub fn from_chat_completions(payload: &Value) -> AnthropicResponse {
    let choice = payload.get("choices").and_then(Value::as_array).and_then(|c| c.first());
    let message = choice.and_then(|c| c.get("message"));
    let (blocks, has_tool_calls) = message.map(message_to_blocks).unwrap_or_default();
    let finish_reason = choice.and_then(|c| c.get("finish_reason")).and_then(Value::as_str);
    let usage = payload.get("usage");

    AnthropicResponse {
        id: format!("msg_{}", payload.get("id").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| fallback_id(""))),
        kind: "message",
        role: "assistant",
        model: payload
            .get("model")
            .and_then(Value::as_str)
            .or_else(|| message.and_then(|m| m.get("model")).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string(),
        content: blocks,
        stop_reason: map_finish_reason(finish_reason, has_tool_calls),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: usage.and_then(|u| u.get("prompt_tokens")).and_then(Value::as_u64).unwrap_or(0),
            output_tokens: usage.and_then(|u| u.get("completion_tokens")).and_then(Value::as_u64).unwrap_or(0),
        },
    }
}

///
/// Convert a Responses API response body into an Anthropic response.
pub fn from_responses(payload: &Value, requested_model: Option<&str>) -> AnthropicResponse {
    let mut blocks = Vec::new();
    let mut has_tool_calls = false;

    if let Some(output) = payload.get("output").and_then(Value::as_array) {
        for item in output {
            match item.get("type").and_then(Value::as_str) {
                Some("message") if item.get("role").and_then(Value::as_str) == Some("assistant") => {
                    match item.get("content") {
                        Some(Value::String(s)) => blocks.push(ContentBlock::Text { text: s.clone() }),
                        Some(Value::Array(parts)) => {
                            for part in parts {
                                if part.get("type").and_then(Value::as_str) == Some("output_text") {
                                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                                        if !text.is_empty() {
                                            blocks.push(ContentBlock::Text { text: text.to_string() });
                                        }
                                    }
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Some("function_call") => {
                    has_tool_calls = true;
                    let call_id = item
                        .get("call_id")
                        .or_else(|| item.get("id"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| fallback_id("tool_"));
                    let name = item.get("name").and_then(Value::as_str).unwrap_or("tool").to_string();
                    let args_raw = item.get("arguments").and_then(Value::as_str).unwrap_or("");
                    let input = parse_arguments(args_raw);
                    blocks.push(ContentBlock::ToolUse { id: Some(call_id), name: Some(name), input });
                }
                _ => {}
            }
        }
    }

    let usage = payload.get("usage");
    let mut stop_reason = if has_tool_calls { "tool_use" } else { "end_turn" };
    if let Some(reason) = payload.get("incomplete_details").and_then(|d| d.get("reason")).and_then(Value::as_str) {
        if reason == "max_tokens" || reason == "max_output_tokens" {
            stop_reason = "max_tokens";
        }
    }

    if blocks.is_empty() {
        blocks.push(ContentBlock::Text { text: String::new() });
    }

    AnthropicResponse {
        id: format!("msg_{}", payload.get("id").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| fallback_id(""))),
        kind: "message",
        role: "assistant",
        model: payload
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| requested_model.map(str::to_string))
            .unwrap_or_default(),
        content: blocks,
        stop_reason,
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: usage.and_then(|u| u.get("input_tokens")).and_then(Value::as_u64).unwrap_or(0),
            output_tokens: usage.and_then(|u| u.get("output_tokens")).and_then(Value::as_u64).unwrap_or(0),
        },
    }
}

/// Extract content blocks and a tool-calls-present flag from a Chat
/// Completions `message` object.
fn message_to_blocks(message: &Value) -> (Vec<ContentBlock>, bool) {
    let mut blocks = Vec::new();

    let text = match message.get("content") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(parts)) => {
            let joined: String = parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            Some(joined)
        }
        _ => None,
    };
    if let Some(text) = text {
        if !text.is_empty() {
            blocks.push(ContentBlock::Text { text });
        }
    }

    let tool_calls = message.get("tool_calls").and_then(Value::as_array).cloned().unwrap_or_default();
    for call in &tool_calls {
        let function = call.get("function");
        let name = function.and_then(|f| f.get("name")).and_then(Value::as_str).unwrap_or("tool").to_string();
        let args_raw = function.and_then(|f| f.get("arguments")).and_then(Value::as_str).unwrap_or("");
        let input = parse_arguments(args_raw);
        let id = call.get("id").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| fallback_id("tool_"));
        blocks.push(ContentBlock::ToolUse { id: Some(id), name: Some(name), input });
    }

    (blocks, !tool_calls.is_empty())
}

/// Parse tool-call arguments as JSON, falling back to `{"_raw": <string>}`
/// on malformed JSON rather than failing the whole response translation.
fn parse_arguments(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({"_raw": raw}))
}

fn map_finish_reason(finish_reason: Option<&str>, has_tool_calls: bool) -> &'static str {
    if finish_reason == Some("tool_calls") || has_tool_calls {
        "tool_use"
    } else if finish_reason == Some("length") {
        "max_tokens"
    } else {
        "end_turn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_streaming_text_round_trip() {
        let upstream = json!({
            "id": "c1",
            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 5}
        });
        let resp = from_chat_completions(&upstream);
        assert_eq!(resp.id, "msg_c1");
        assert_eq!(resp.stop_reason, "end_turn");
        assert_eq!(resp.usage.input_tokens, 3);
        assert_eq!(resp.usage.output_tokens, 5);
        match &resp.content[0] {
            ContentBlock::Text { text } => assert_eq!(text, "hello"),
            _ => panic!("expected text block"),
        }
    }

    #[test]
    fn tool_calls_force_tool_use_stop_reason() {
        let upstream = json!({
            "id": "c2",
            "choices": [{
                "message": {"tool_calls": [{"id": "t1", "function": {"name": "f", "arguments": "{}"}}]},
                "finish_reason": "tool_calls"
            }]
        });
        let resp = from_chat_completions(&upstream);
        assert_eq!(resp.stop_reason, "tool_use");
    }

    #[test]
    fn malformed_arguments_fall_back_to_raw() {
        let upstream = json!({
            "choices": [{
                "message": {"tool_calls": [{"id": "t1", "function": {"name": "f", "arguments": "not json"}}]},
                "finish_reason": "tool_calls"
            }]
        });
        let resp = from_chat_completions(&upstream);
        match &resp.content[0] {
            ContentBlock::ToolUse { input, .. } => assert_eq!(input["_raw"], "not json"),
            _ => panic!("expected tool_use block"),
        }
    }

    #[test]
    fn responses_empty_output_yields_one_empty_text_block() {
        let upstream = json!({"id": "r1", "output": []});
        let resp = from_responses(&upstream, Some("o3-mini"));
        assert_eq!(resp.content.len(), 1);
        assert_eq!(resp.model, "o3-mini");
    }
}
