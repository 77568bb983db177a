//!
//! Anthropic request → OpenAI request translation.
//!
//! Builds both OpenAI shapes (Chat Completions, Responses) from a single
//! parsed [`AnthropicRequest`]. Neither builder performs I/O; `stream` and
//! `store` are the only fields the caller still has to set after the fact
//! (the dispatcher knows those, the mapper doesn't need to).
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use serde_json::{Map, Value, json};

use super::{AnthropicMessage, AnthropicRequest, AnthropicToolChoice, ContentBlock, fallback_id, input_to_arguments};

/* --- start of code -------------------------------------------------------------------------- */

///
/// Convert an Anthropic request into an OpenAI Chat Completions request
/// body. `stream` is not set here; the caller stamps it on before sending.
pub fn to_chat_completions(req: &AnthropicRequest) -> Value {
    let mut out = Map::new();

    if let Some(model) = &req.model {
        out.insert("model".to_string(), json!(model));
    }
    if let Some(v) = req.max_tokens {
        out.insert("max_tokens".to_string(), json!(v));
    }
    if let Some(v) = req.temperature {
        out.insert("temperature".to_string(), json!(v));
    }
    if let Some(v) = req.top_p {
        out.insert("top_p".to_string(), json!(v));
    }
    if let Some(v) = &req.stop_sequences {
        out.insert("stop".to_string(), json!(v));
    }
    if let Some(tools) = &req.tools {
        out.insert("tools".to_string(), json!(map_tools(tools)));
    }
    if let Some(choice) = &req.tool_choice {
        out.insert("tool_choice".to_string(), map_tool_choice(choice));
    }

    let mut messages = Vec::new();
    if let Some(system) = &req.system {
        let text = system.coerce();
        if !text.is_empty() {
            messages.push(json!({"role": "system", "content": text}));
        }
    }
    for message in &req.messages {
        messages.extend(convert_message(message));
    }
    out.insert("messages".to_string(), json!(messages));

    Value::Object(out)
}

///
/// Convert an Anthropic request into an OpenAI Responses API request body.
/// Always sets `store: false`, since this proxy never persists conversation
/// state upstream.
pub fn to_responses(req: &AnthropicRequest) -> Value {
    let mut out = Map::new();

    if let Some(model) = &req.model {
        out.insert("model".to_string(), json!(model));
    }
    if let Some(v) = req.max_tokens {
        out.insert("max_output_tokens".to_string(), json!(v));
    }
    if let Some(v) = req.temperature {
        out.insert("temperature".to_string(), json!(v));
    }
    if let Some(v) = req.top_p {
        out.insert("top_p".to_string(), json!(v));
    }
    if let Some(tools) = &req.tools {
        out.insert("tools".to_string(), json!(map_tools_responses(tools)));
    }
    if let Some(choice) = &req.tool_choice {
        out.insert("tool_choice".to_string(), map_tool_choice_responses(choice));
    }
    if let Some(system) = &req.system {
        let text = system.coerce();
        if !text.is_empty() {
            out.insert("instructions".to_string(), json!(text));
        }
    }

    let mut input_items = Vec::new();
    for message in &req.messages {
        input_items.extend(to_responses_items(message));
    }
    out.insert("input".to_string(), json!(input_items));
    out.insert("store".to_string(), json!(false));

    Value::Object(out)
}

fn map_tools(tools: &[super::AnthropicTool]) -> Vec<Value> {
    tools
        .iter()
        .filter_map(|tool| {
            let name = tool.name.as_ref()?;
            let mut func = Map::new();
            func.insert("name".to_string(), json!(name));
            if let Some(desc) = &tool.description {
                if !desc.is_empty() {
                    func.insert("description".to_string(), json!(desc));
                }
            }
            if let Some(schema) = &tool.input_schema {
                func.insert("parameters".to_string(), schema.clone());
            }
            Some(json!({"type": "function", "function": func}))
        })
        .collect()
}

fn map_tools_responses(tools: &[super::AnthropicTool]) -> Vec<Value> {
    tools
        .iter()
        .filter_map(|tool| {
            let name = tool.name.as_ref()?;
            let mut func = Map::new();
            func.insert("type".to_string(), json!("function"));
            func.insert("name".to_string(), json!(name));
            if let Some(desc) = &tool.description {
                if !desc.is_empty() {
                    func.insert("description".to_string(), json!(desc));
                }
            }
            if let Some(schema) = &tool.input_schema {
                func.insert("parameters".to_string(), schema.clone());
            }
            if let Some(strict) = tool.strict {
                func.insert("strict".to_string(), json!(strict));
            }
            Some(Value::Object(func))
        })
        .collect()
}

fn map_tool_choice(choice: &AnthropicToolChoice) -> Value {
    match choice {
        AnthropicToolChoice::Mode(mode) => json!(mode),
        AnthropicToolChoice::Tool { choice_type, name } => match choice_type.as_str() {
            "auto" | "none" => json!(choice_type),
            "tool" => match name {
                Some(n) if !n.is_empty() => json!({"type": "function", "function": {"name": n}}),
                _ => json!("auto"),
            },
            _ => json!("auto"),
        },
    }
}

fn map_tool_choice_responses(choice: &AnthropicToolChoice) -> Value {
    match choice {
        AnthropicToolChoice::Mode(mode) => json!(mode),
        AnthropicToolChoice::Tool { choice_type, name } => match choice_type.as_str() {
            "auto" | "none" | "required" => json!(choice_type),
            "tool" => match name {
                Some(n) if !n.is_empty() => json!({"type": "function", "name": n}),
                _ => json!("auto"),
            },
            _ => json!("auto"),
        },
    }
}

/// One Anthropic message can expand into several Chat Completions messages:
/// a base message carrying text + `tool_calls`, followed by one `{role:tool}`
/// message per `tool_result` block.
fn convert_message(message: &AnthropicMessage) -> Vec<Value> {
    let AnthropicMessage { role, content } = message;
    let blocks = match content {
        super::AnthropicText::String(s) => {
            return vec![json!({"role": role, "content": s})];
        }
        super::AnthropicText::Blocks(blocks) => blocks,
    };

    let mut text_parts = String::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => text_parts.push_str(text),
            ContentBlock::ToolUse { .. } => tool_calls.push(map_tool_use(block)),
            ContentBlock::ToolResult { .. } => tool_results.push(map_tool_result(block)),
            ContentBlock::Image { .. } => text_parts.push_str("[image omitted]"),
            ContentBlock::Other => text_parts.push_str("[unsupported content omitted]"),
        }
    }

    let mut messages = Vec::new();
    if !text_parts.is_empty() || !tool_calls.is_empty() {
        let mut msg = Map::new();
        msg.insert("role".to_string(), json!(role));
        msg.insert("content".to_string(), json!(text_parts));
        if !tool_calls.is_empty() {
            msg.insert("tool_calls".to_string(), json!(tool_calls));
        }
        messages.push(Value::Object(msg));
    }
    messages.extend(tool_results);
    messages
}

fn map_tool_use(block: &ContentBlock) -> Value {
    let ContentBlock::ToolUse { id, name, input } = block else {
        unreachable!("caller only passes ToolUse blocks")
    };
    let tool_id = id.clone().unwrap_or_else(|| fallback_id("tool_"));
    let tool_name = name.clone().unwrap_or_else(|| "tool".to_string());
    json!({
        "id": tool_id,
        "type": "function",
        "function": {"name": tool_name, "arguments": input_to_arguments(input)},
    })
}

fn map_tool_result(block: &ContentBlock) -> Value {
    let ContentBlock::ToolResult { tool_use_id, content, is_error } = block else {
        unreachable!("caller only passes ToolResult blocks")
    };
    let tool_id = tool_use_id.clone().unwrap_or_else(|| "tool_unknown".to_string());
    let mut text = content.as_ref().map(|c| c.coerce()).unwrap_or_default();
    if *is_error {
        text = format!("[tool_error] {text}");
    }
    json!({"role": "tool", "tool_call_id": tool_id, "content": text})
}

/// Convert one Anthropic message into Responses API `input` items: an
/// optional leading `{role,content}` item for any text, then one
/// `function_call` per `tool_use` and one `function_call_output` per
/// `tool_result`.
fn to_responses_items(message: &AnthropicMessage) -> Vec<Value> {
    let AnthropicMessage { role, content } = message;
    let blocks = match content {
        super::AnthropicText::String(s) => {
            return vec![json!({"role": role, "content": s})];
        }
        super::AnthropicText::Blocks(blocks) => blocks,
    };

    let mut items = Vec::new();
    let mut text_parts = String::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => text_parts.push_str(text),
            ContentBlock::ToolUse { id, name, input } => {
                let tool_id = id.clone().unwrap_or_else(|| fallback_id("tool_"));
                let tool_name = name.clone().unwrap_or_else(|| "tool".to_string());
                items.push(json!({
                    "type": "function_call",
                    "id": format!("fc_{tool_id}"),
                    "call_id": tool_id,
                    "name": tool_name,
                    "arguments": input_to_arguments(input),
                }));
            }
            ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                let call_id = tool_use_id.clone().unwrap_or_else(|| "tool_unknown".to_string());
                let mut output = content.as_ref().map(|c| c.coerce()).unwrap_or_default();
                if *is_error {
                    output = format!("[tool_error] {output}");
                }
                items.push(json!({"type": "function_call_output", "call_id": call_id, "output": output}));
            }
            ContentBlock::Image { .. } => text_parts.push_str("[image omitted]"),
            ContentBlock::Other => text_parts.push_str("[unsupported content omitted]"),
        }
    }

    if !text_parts.is_empty() {
        items.insert(0, json!({"role": role, "content": text_parts}));
    }
    items
}

///
/// Decide whether a model name requires the Responses API rather than Chat
/// Completions: `gpt-5*`, anything starting with `o`, anything containing
/// `codex`, or the process-wide force-override.
pub fn should_use_responses(model: Option<&str>, force_override: bool) -> bool {
    let Some(model) = model else { return false };
    let trimmed = model.trim();
    if trimmed.is_empty() {
        return false;
    }
    let lower = trimmed.to_lowercase();
    if lower.starts_with("gpt-5") || lower.starts_with('o') {
        return true;
    }
    if lower.contains("codex") {
        return true;
    }
    force_override
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_gpt5_and_o_series_to_responses() {
        assert!(should_use_responses(Some("gpt-5.2-codex"), false));
        assert!(should_use_responses(Some("o3-mini"), false));
        assert!(should_use_responses(Some("anything-codex-anything"), false));
        assert!(!should_use_responses(Some("claude-3"), false));
        assert!(!should_use_responses(Some("kimi-k2.5"), false));
        assert!(!should_use_responses(Some("moonshot-v1"), false));
    }

    #[test]
    fn force_override_wins_regardless_of_model() {
        assert!(should_use_responses(Some("claude-3"), true));
        assert!(!should_use_responses(None, false));
    }

    #[test]
    fn tool_use_round_trips_into_tool_calls_and_tool_message() {
        let req: AnthropicRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "t1", "name": "get_weather", "input": {"city": "SF"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": "72F"}
                ]}
            ]
        }))
        .unwrap();
        let out = to_chat_completions(&req);
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages[0]["tool_calls"][0]["id"], "t1");
        assert_eq!(messages[0]["tool_calls"][0]["function"]["name"], "get_weather");
        assert_eq!(messages[1]["role"], "tool");
        assert_eq!(messages[1]["tool_call_id"], "t1");
        assert_eq!(messages[1]["content"], "72F");
    }

    #[test]
    fn responses_request_always_sets_store_false() {
        let req: AnthropicRequest =
            serde_json::from_value(json!({"model": "o3-mini", "messages": []})).unwrap();
        let out = to_responses(&req);
        assert_eq!(out["store"], false);
    }
}
