//! Synthesize Anthropic SSE frames and OpenAI-style stream chunks from a
//! fully-resolved [`ParsedResponse`].
//!
//! Kiro has no true incremental streaming surface worth trusting end to
//! end, so the executor runs a request to completion and this module
//! replays the result as a synthetic stream shaped like each dialect's
//! real one.

use serde_json::{json, Value};

use crate::convert::response::ToolCall;

const MAX_TOKENS_MARKER: &str = "cut off due to max tokens";

/// Build a sequence of pre-serialized Anthropic SSE frames
/// (`event: <type>\ndata: <json>\n\n`) representing one complete turn.
pub fn build_anthropic_sse(
    id: &str,
    model: &str,
    text: &str,
    tool_calls: &[ToolCall],
    prompt_tokens: u32,
    completion_tokens: u32,
) -> Vec<String> {
    let mut frames = Vec::new();

    frames.push(sse_frame(
        "message_start",
        &json!({
            "type": "message_start",
            "message": {
                "id": id,
                "type": "message",
                "role": "assistant",
                "model": model,
                "content": [],
                "stop_reason": Value::Null,
                "stop_sequence": Value::Null,
                "usage": {"input_tokens": prompt_tokens, "output_tokens": 0},
            }
        }),
    ));

    for (i, call) in tool_calls.iter().enumerate() {
        frames.push(sse_frame(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": i,
                "content_block": {"type": "tool_use", "id": call.id, "name": call.name, "input": {}},
            }),
        ));
        frames.push(sse_frame(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": i,
                "delta": {"type": "input_json_delta", "partial_json": call.arguments},
            }),
        ));
        frames.push(sse_frame(
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": i}),
        ));
    }

    let trimmed_text = text.trim();
    if !trimmed_text.is_empty() {
        let index = tool_calls.len();
        frames.push(sse_frame(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {"type": "text", "text": ""},
            }),
        ));
        frames.push(sse_frame(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "text_delta", "text": trimmed_text},
            }),
        ));
        frames.push(sse_frame(
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": index}),
        ));
    }

    let stop_reason = if !tool_calls.is_empty() {
        "tool_use"
    } else if text.contains(MAX_TOKENS_MARKER) {
        "max_tokens"
    } else {
        "end_turn"
    };

    frames.push(sse_frame(
        "message_delta",
        &json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason, "stop_sequence": Value::Null},
            "usage": {"input_tokens": prompt_tokens, "output_tokens": completion_tokens},
        }),
    ));

    frames.push(sse_frame("message_stop", &json!({"type": "message_stop"})));

    frames
}

fn sse_frame(event: &str, data: &Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

/// Build OpenAI chat-completions-style `chat.completion.chunk` objects for
/// one complete turn.
pub fn build_openai_chunks(id: &str, model: &str, created: i64, text: &str, tool_calls: &[ToolCall]) -> Vec<Value> {
    let mut chunks = Vec::new();

    chunks.push(chat_chunk(
        id,
        model,
        created,
        json!({"role": "assistant", "content": Value::Null}),
        None,
    ));

    let trimmed_text = text.trim();
    if !trimmed_text.is_empty() {
        chunks.push(chat_chunk(
            id,
            model,
            created,
            json!({"content": trimmed_text}),
            None,
        ));
    }

    if !tool_calls.is_empty() {
        let calls: Vec<Value> = tool_calls
            .iter()
            .enumerate()
            .map(|(i, call)| {
                json!({
                    "index": i,
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                })
            })
            .collect();
        chunks.push(chat_chunk(
            id,
            model,
            created,
            json!({"tool_calls": calls}),
            None,
        ));
    }

    let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };
    chunks.push(chat_chunk(id, model, created, json!({}), Some(finish_reason)));

    chunks
}

fn chat_chunk(id: &str, model: &str, created: i64, delta: Value, finish_reason: Option<&str>) -> Value {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: args.to_string(),
        }
    }

    #[test]
    fn scenario_5_text_only_turn_emits_single_text_block() {
        let frames = build_anthropic_sse("msg_1", "claude-sonnet-4-5", "Hello", &[], 10, 2);
        assert!(frames[0].contains("message_start"));
        assert!(frames.iter().any(|f| f.contains("\"type\":\"text\"")));
        assert!(frames.iter().any(|f| f.contains("\"text\":\"Hello\"")));
        assert!(frames.last().unwrap().contains("message_stop"));
        let delta_frame = frames
            .iter()
            .find(|f| f.contains("message_delta"))
            .unwrap();
        assert!(delta_frame.contains("\"stop_reason\":\"end_turn\""));
    }

    #[test]
    fn tool_calls_precede_text_and_indices_are_contiguous() {
        let calls = vec![call("t1", "a", "{}"), call("t2", "b", "{}")];
        let frames = build_anthropic_sse("msg_1", "claude-sonnet-4-5", "done", &calls, 5, 5);

        let first_text_start = frames
            .iter()
            .position(|f| f.contains("content_block_start") && f.contains("\"type\":\"text\""))
            .unwrap();
        let last_tool_stop = frames
            .iter()
            .rposition(|f| f.contains("content_block_stop") && f.contains("\"index\":1"))
            .unwrap();
        assert!(last_tool_stop < first_text_start);

        let delta_frame = frames
            .iter()
            .find(|f| f.contains("message_delta"))
            .unwrap();
        assert!(delta_frame.contains("\"stop_reason\":\"tool_use\""));
    }

    #[test]
    fn empty_text_and_no_tools_still_emits_message_lifecycle() {
        let frames = build_anthropic_sse("msg_1", "claude-sonnet-4-5", "", &[], 1, 0);
        assert!(frames.iter().any(|f| f.contains("message_start")));
        assert!(frames.iter().any(|f| f.contains("message_stop")));
        assert!(!frames.iter().any(|f| f.contains("\"type\":\"text\"")));
    }

    #[test]
    fn max_tokens_marker_drives_stop_reason() {
        let text = "the response was cut off due to max tokens";
        let frames = build_anthropic_sse("msg_1", "claude-sonnet-4-5", text, &[], 5, 5);
        let delta_frame = frames
            .iter()
            .find(|f| f.contains("message_delta"))
            .unwrap();
        assert!(delta_frame.contains("\"stop_reason\":\"max_tokens\""));
    }

    #[test]
    fn openai_chunks_end_with_finish_reason_stop() {
        let chunks = build_openai_chunks("chatcmpl_1", "gpt", 0, "Hi", &[]);
        let last = chunks.last().unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn openai_chunks_with_tools_finish_with_tool_calls_reason() {
        let calls = vec![call("t1", "a", "{}")];
        let chunks = build_openai_chunks("chatcmpl_1", "gpt", 0, "", &calls);
        let last = chunks.last().unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "tool_calls");
        assert!(chunks.iter().any(|c| c["choices"][0]["delta"].get("tool_calls").is_some()));
    }
}
