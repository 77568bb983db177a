//!
//! Streaming state machine: rewrites an upstream SSE stream (Chat
//! Completions or Responses flavor) into Anthropic-style SSE.
//!
//! [`StreamState`] is threaded explicitly through every transition instead
//! of living in closure captures, so the start/delta/stop discipline in
//! each branch stays easy to follow. One `StreamState` is owned per
//! streaming response; it never outlives the request it belongs to.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::BTreeMap;

use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::mapper::AnthropicUsage;
use crate::mapper::fallback_id;

/* --- types ----------------------------------------------------------------------------------- */

/// Per-tool-call accumulator, keyed by the upstream's own ordinal index.
#[derive(Debug, Default)]
struct ToolState {
    id: Option<String>,
    name: Option<String>,
    content_index: Option<usize>,
    started: bool,
    pending_args: Vec<String>,
    /// Running total of arguments already emitted, used by the Responses
    /// path to dedup `function_call_arguments.done` against prior deltas.
    emitted_args: String,
}

///
/// Owns the full lifecycle of one streaming response: block indices, the
/// single open text block (if any), and every in-flight tool call.
pub struct StreamState {
    requested_model: Option<String>,
    started: bool,
    message_id: Option<String>,
    model: Option<String>,
    next_index: usize,
    text_index: Option<usize>,
    started_blocks: Vec<usize>,
    tool_states: BTreeMap<usize, ToolState>,
    finish_reason: Option<String>,
    usage: Option<AnthropicUsage>,
    tx: mpsc::Sender<String>,
}

/* --- start of code -------------------------------------------------------------------------- */

impl StreamState {
    pub fn new(requested_model: Option<String>, tx: mpsc::Sender<String>) -> Self {
        Self {
            requested_model,
            started: false,
            message_id: None,
            model: None,
            next_index: 0,
            text_index: None,
            started_blocks: Vec::new(),
            tool_states: BTreeMap::new(),
            finish_reason: None,
            usage: None,
            tx,
        }
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn set_finish_reason(&mut self, reason: impl Into<String>) {
        self.finish_reason = Some(reason.into());
    }

    pub fn set_usage(&mut self, usage: AnthropicUsage) {
        self.usage = Some(usage);
    }

    async fn write_event(&self, event: &str, data: Value) {
        let payload = format!("event: {event}\ndata: {}\n\n", serde_json::to_string(&data).unwrap_or_default());
        let _ = self.tx.send(payload).await;
    }

    ///
    /// Emit `message_start` exactly once, no matter how many callers race to
    /// trigger it.
    pub async fn start_message(&mut self, message_id: Option<&str>, model: Option<&str>) {
        if self.started {
            return;
        }
        self.message_id = Some(format!("msg_{}", message_id.map(str::to_string).unwrap_or_else(|| fallback_id(""))));
        self.model = Some(model.map(str::to_string).unwrap_or_else(|| self.requested_model.clone().unwrap_or_default()));
        self.started = true;
        self.write_event(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": Value::Null,
                    "stop_sequence": Value::Null,
                    "usage": {"input_tokens": 0, "output_tokens": 0},
                }
            }),
        )
        .await;
    }

    async fn start_text_block(&mut self) -> usize {
        if let Some(index) = self.text_index {
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.text_index = Some(index);
        self.started_blocks.push(index);
        self.write_event(
            "content_block_start",
            json!({"type": "content_block_start", "index": index, "content_block": {"type": "text", "text": ""}}),
        )
        .await;
        index
    }

    async fn start_tool_block(&mut self, tool_index: usize, tool_id: &str, name: &str) -> usize {
        if let Some(index) = self.tool_states.get(&tool_index).and_then(|s| s.content_index) {
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.started_blocks.push(index);
        {
            let state = self.tool_states.entry(tool_index).or_default();
            state.content_index = Some(index);
            state.started = true;
        }
        self.write_event(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {"type": "tool_use", "id": tool_id, "name": name, "input": {}},
            }),
        )
        .await;
        index
    }

    /// Emit a `text_delta` for the single open text block, opening it first
    /// if necessary. All assistant text is concatenated into one block.
    pub async fn handle_text_delta(&mut self, text: &str) {
        let index = self.start_text_block().await;
        self.write_event(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": index, "delta": {"type": "text_delta", "text": text}}),
        )
        .await;
    }

    /// Chat-Completions-flavor `delta.tool_calls[*]` handling: buffers
    /// argument fragments until the tool's `name` is known, then flushes.
    pub async fn handle_tool_delta(&mut self, tool_index: usize, id: Option<&str>, name: Option<&str>, args_fragment: Option<&str>) {
        {
            let state = self.tool_states.entry(tool_index).or_default();
            if let Some(id) = id {
                state.id = Some(id.to_string());
            }
            if let Some(name) = name {
                state.name = Some(name.to_string());
            }
            if let Some(fragment) = args_fragment {
                if !fragment.is_empty() {
                    state.pending_args.push(fragment.to_string());
                }
            }
        }

        let already_started = self.tool_states.get(&tool_index).map(|s| s.started).unwrap_or(false);
        if already_started {
            self.flush_pending_args(tool_index).await;
            return;
        }

        let has_name = self.tool_states.get(&tool_index).and_then(|s| s.name.clone());
        if let Some(name) = has_name {
            let tool_id = self
                .tool_states
                .get(&tool_index)
                .and_then(|s| s.id.clone())
                .unwrap_or_else(|| fallback_id("tool_"));
            self.start_tool_block(tool_index, &tool_id, &name).await;
            self.flush_pending_args(tool_index).await;
        }
    }

    async fn flush_pending_args(&mut self, tool_index: usize) {
        let (content_index, fragments) = {
            let state = self.tool_states.entry(tool_index).or_default();
            let fragments = std::mem::take(&mut state.pending_args);
            (state.content_index, fragments)
        };
        let Some(content_index) = content_index else { return };
        for fragment in fragments {
            self.write_event(
                "content_block_delta",
                json!({"type": "content_block_delta", "index": content_index, "delta": {"type": "input_json_delta", "partial_json": fragment}}),
            )
            .await;
            if let Some(state) = self.tool_states.get_mut(&tool_index) {
                state.emitted_args.push_str(&fragment);
            }
        }
    }

    /// Responses-flavor tail-only dedup: `function_call_arguments.done`
    /// carries the cumulative arguments string; only the unsent tail (if
    /// any) is emitted.
    pub async fn handle_tool_arguments_done(&mut self, tool_index: usize, full_args: &str) {
        let prev_len = self.tool_states.get(&tool_index).map(|s| s.emitted_args.len()).unwrap_or(0);
        if full_args.len() <= prev_len {
            return;
        }
        let remaining = &full_args[prev_len..];
        if remaining.is_empty() {
            return;
        }
        self.handle_tool_delta(tool_index, None, None, Some(remaining)).await;
    }

    /// Start any tool that received fragments but never crossed the
    /// "name known" threshold (e.g. a stream that ends mid-call).
    pub async fn finalize_pending_tools(&mut self) {
        let indices: Vec<usize> = self
            .tool_states
            .iter()
            .filter(|(_, s)| !s.started && (s.name.is_some() || !s.pending_args.is_empty()))
            .map(|(i, _)| *i)
            .collect();
        for tool_index in indices {
            let name = self.tool_states.get(&tool_index).and_then(|s| s.name.clone()).unwrap_or_else(|| "tool".to_string());
            let tool_id = self.tool_states.get(&tool_index).and_then(|s| s.id.clone()).unwrap_or_else(|| fallback_id("tool_"));
            self.start_tool_block(tool_index, &tool_id, &name).await;
            self.flush_pending_args(tool_index).await;
        }
    }

    ///
    /// Close every open block, emit `message_delta` with the final
    /// `stop_reason`/usage, then `message_stop`. Call exactly once, after
    /// the upstream stream (or client connection) ends.
    pub async fn finish(&mut self) {
        self.finalize_pending_tools().await;
        let stop_reason = map_finish_reason(self.finish_reason.as_deref(), !self.tool_states.is_empty());

        for index in std::mem::take(&mut self.started_blocks) {
            self.write_event("content_block_stop", json!({"type": "content_block_stop", "index": index})).await;
        }

        let mut message_delta = json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason, "stop_sequence": Value::Null},
        });
        if let Some(usage) = self.usage {
            message_delta["usage"] = json!({"input_tokens": usage.input_tokens, "output_tokens": usage.output_tokens});
        }
        self.write_event("message_delta", message_delta).await;
        self.write_event("message_stop", json!({"type": "message_stop"})).await;
    }
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

/* --- Chat Completions event handling ---------------------------------------------------------- */

///
/// Feed one decoded Chat-Completions-flavor SSE event payload into `state`.
pub async fn handle_chat_event(state: &mut StreamState, event: &Value) {
    if !state.started() {
        state
            .start_message(event.get("id").and_then(Value::as_str), event.get("model").and_then(Value::as_str))
            .await;
    }
    if let Some(usage) = event.get("usage").and_then(Value::as_object) {
        state.set_usage(AnthropicUsage {
            input_tokens: usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
            output_tokens: usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
        });
    }
    let Some(choice) = event.get("choices").and_then(Value::as_array).and_then(|c| c.first()) else { return };
    let delta = choice.get("delta");
    if let Some(text) = delta.and_then(|d| d.get("content")).and_then(Value::as_str) {
        state.handle_text_delta(text).await;
    }
    if let Some(tool_calls) = delta.and_then(|d| d.get("tool_calls")).and_then(Value::as_array) {
        for call in tool_calls {
            let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let id = call.get("id").and_then(Value::as_str);
            let function = call.get("function");
            let name = function.and_then(|f| f.get("name")).and_then(Value::as_str);
            let args = function.and_then(|f| f.get("arguments")).and_then(Value::as_str);
            state.handle_tool_delta(index, id, name, args).await;
        }
    }
    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
        state.set_finish_reason(reason.to_string());
    }
}

/* --- Responses API event handling ------------------------------------------------------------- */

///
/// Feed one decoded Responses-flavor SSE event payload into `state`.
pub async fn handle_responses_event(state: &mut StreamState, event: &Value, requested_model: Option<&str>) {
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
    match event_type {
        "response.created" | "response.in_progress" | "response.queued" => {
            let resp = event.get("response");
            if !state.started() {
                state
                    .start_message(
                        resp.and_then(|r| r.get("id")).and_then(Value::as_str),
                        resp.and_then(|r| r.get("model")).and_then(Value::as_str).or(requested_model),
                    )
                    .await;
            }
        }
        "response.output_text.delta" => {
            if !state.started() {
                state.start_message(event.get("response_id").and_then(Value::as_str), requested_model).await;
            }
            if let Some(text) = event.get("delta").and_then(Value::as_str) {
                state.handle_text_delta(text).await;
            }
        }
        "response.output_text.done" => {
            // NOTE: upstream's `text` here is treated literally as a further
            // delta; some servers may instead send the cumulative text,
            // which would duplicate prior deltas.
            if !state.started() {
                state.start_message(event.get("response_id").and_then(Value::as_str), requested_model).await;
            }
            if let Some(text) = event.get("text").and_then(Value::as_str) {
                state.handle_text_delta(text).await;
            }
        }
        "response.output_item.added" => {
            let Some(item) = event.get("item") else { return };
            if item.get("type").and_then(Value::as_str) != Some("function_call") {
                return;
            }
            let index = event.get("output_index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let call_id = item.get("call_id").or_else(|| item.get("id")).and_then(Value::as_str);
            let name = item.get("name").and_then(Value::as_str).unwrap_or("tool");
            let args = item.get("arguments").and_then(Value::as_str).unwrap_or("");
            if !state.started() {
                state.start_message(event.get("response_id").and_then(Value::as_str), requested_model).await;
            }
            state.handle_tool_delta(index, call_id, Some(name), Some(args)).await;
        }
        "response.function_call_arguments.delta" => {
            let index = event.get("output_index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let delta = event.get("delta").and_then(Value::as_str).unwrap_or("");
            if !state.started() {
                state.start_message(event.get("response_id").and_then(Value::as_str), requested_model).await;
            }
            state.handle_tool_delta(index, None, None, Some(delta)).await;
        }
        "response.function_call_arguments.done" => {
            let index = event.get("output_index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let full = event.get("arguments").and_then(Value::as_str).unwrap_or("");
            state.handle_tool_arguments_done(index, full).await;
        }
        "response.completed" | "response.incomplete" | "response.failed" => {
            let resp = event.get("response");
            if !state.started() {
                state
                    .start_message(
                        resp.and_then(|r| r.get("id")).and_then(Value::as_str).or_else(|| event.get("response_id").and_then(Value::as_str)),
                        resp.and_then(|r| r.get("model")).and_then(Value::as_str).or(requested_model),
                    )
                    .await;
            }
            if let Some(usage) = resp.and_then(|r| r.get("usage")).and_then(Value::as_object) {
                state.set_usage(AnthropicUsage {
                    input_tokens: usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
                    output_tokens: usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
                });
            }
            if let Some(reason) = resp.and_then(|r| r.get("incomplete_details")).and_then(|d| d.get("reason")).and_then(Value::as_str) {
                if reason == "max_tokens" || reason == "max_output_tokens" {
                    state.set_finish_reason("length");
                }
            }
        }
        _ => {}
    }
}

/* --- SSE line framing -------------------------------------------------------------------------- */

///
/// Split a chunk of upstream bytes into complete `\n`-terminated lines plus
/// a carried-over remainder, the way line-buffered SSE readers must handle
/// a chunk boundary landing mid-line.
///
/// # Returns
///  * complete lines found in `content`
///  * the trailing partial line to prepend to the next chunk
pub fn split_sse_lines(content: &str) -> (Vec<&str>, String) {
    let mut lines_to_process = Vec::new();
    let mut new_buffer = String::new();

    let ends_with_newline = content.ends_with('\n');
    let all_lines: Vec<&str> = content.lines().collect();
    let line_count = all_lines.len();

    for (i, line) in all_lines.into_iter().enumerate() {
        let is_last = i == line_count - 1;
        if is_last && !ends_with_newline {
            new_buffer = line.to_string();
        } else {
            lines_to_process.push(line);
        }
    }

    (lines_to_process, new_buffer)
}

/// Extract the payload from an SSE `data: ...` line, if it is one.
pub fn extract_sse_data(line: &str) -> Option<&str> {
    let line = line.trim();
    line.strip_prefix("data:").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_and_partial_lines() {
        let (lines, buffer) = split_sse_lines("data: a\ndata: b\ndata: par");
        assert_eq!(lines, vec!["data: a", "data: b"]);
        assert_eq!(buffer, "data: par");
    }

    #[test]
    fn extracts_data_payload() {
        assert_eq!(extract_sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(extract_sse_data("event: ping"), None);
    }

    async fn drain(mut rx: mpsc::Receiver<String>) -> Vec<Value> {
        let mut events = Vec::new();
        while let Some(raw) = rx.recv().await {
            let data = raw.split_once("data: ").unwrap().1.trim_end().to_string();
            events.push(serde_json::from_str(&data).unwrap());
        }
        events
    }

    #[tokio::test]
    async fn chat_stream_interleaves_text_and_tool_use_blocks() {
        let (tx, rx) = mpsc::channel(32);
        let mut state = StreamState::new(Some("gpt-4o".to_string()), tx);

        handle_chat_event(&mut state, &json!({"id": "c1", "model": "gpt-4o", "choices": [{"delta": {"content": "A"}}]})).await;
        handle_chat_event(
            &mut state,
            &json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "x", "function": {"name": "f", "arguments": "{\""}}]}}]}),
        )
        .await;
        handle_chat_event(
            &mut state,
            &json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "k\":1}"}}]}}]}),
        )
        .await;
        handle_chat_event(&mut state, &json!({"choices": [{"delta": {"content": "B"}, "finish_reason": "tool_calls"}]})).await;
        state.finish().await;
        drop(state);

        let events = drain(rx).await;
        let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(
            types,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert_eq!(events[9]["delta"]["stop_reason"], "tool_use");
    }

    #[tokio::test]
    async fn responses_arguments_done_emits_only_unsent_tail() {
        let (tx, rx) = mpsc::channel(32);
        let mut state = StreamState::new(Some("o3-mini".to_string()), tx);
        handle_responses_event(&mut state, &json!({"type": "response.created", "response": {"id": "r1", "model": "o3-mini"}}), None).await;
        handle_responses_event(
            &mut state,
            &json!({"type": "response.output_item.added", "output_index": 0, "item": {"type": "function_call", "call_id": "t1", "name": "f", "arguments": ""}}),
            None,
        )
        .await;
        handle_responses_event(
            &mut state,
            &json!({"type": "response.function_call_arguments.delta", "output_index": 0, "delta": "{\"a\":"}),
            None,
        )
        .await;
        handle_responses_event(
            &mut state,
            &json!({"type": "response.function_call_arguments.done", "output_index": 0, "arguments": "{\"a\":1}"}),
            None,
        )
        .await;
        state.finish().await;
        drop(state);

        let events = drain(rx).await;
        let deltas: Vec<&str> = events
            .iter()
            .filter(|e| e["type"] == "content_block_delta" && e["delta"]["type"] == "input_json_delta")
            .map(|e| e["delta"]["partial_json"].as_str().unwrap())
            .collect();
        assert_eq!(deltas, vec!["{\"a\":", "1}"]);
    }
}
