//! Parse a raw Kiro HTTP response body into plain text plus tool calls.
//!
//! Kiro emits three distinct envelopes depending on path and upstream
//! version: a single JSON object, a text line/SSE-ish stream, or an AWS
//! event-stream binary framing wrapping either of the above. This module
//! normalizes all three into one [`ParsedResponse`].

use serde_json::Value;

use crate::sanitize::{self, SanitizeOpts};

/// One recovered tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Result of parsing a Kiro response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Parse `bytes` into text and tool calls. Never panics; malformed events
/// are skipped rather than propagated.
pub fn parse_response(bytes: &[u8]) -> ParsedResponse {
    if bytes.is_empty() {
        return ParsedResponse::default();
    }

    let unframed = sanitize::strip_aws_event_stream(bytes);
    let text = String::from_utf8_lossy(&unframed).into_owned();

    if let Ok(value) = serde_json::from_str::<Value>(&text) {
        return parse_json_envelope(&value);
    }

    parse_text_stream(&text)
}

fn parse_json_envelope(value: &Value) -> ParsedResponse {
    let cs = &value["conversationState"];
    let current = &cs["currentMessage"];

    let text = current["assistantResponseMessage"]["content"]
        .as_str()
        .map(str::to_string)
        .or_else(|| {
            cs["history"].as_array().and_then(|history| {
                history
                    .iter()
                    .rev()
                    .find_map(|entry| entry["assistantResponseMessage"]["content"].as_str())
                    .map(str::to_string)
            })
        })
        .unwrap_or_default();

    let mut tool_calls = Vec::new();
    collect_tool_use_value(&current["toolUse"], &mut tool_calls);
    collect_tool_use_value(&current["assistantResponseMessage"]["toolUse"], &mut tool_calls);
    dedup_tool_calls(&mut tool_calls);

    ParsedResponse {
        text: text.trim().to_string(),
        tool_calls,
    }
}

fn collect_tool_use_value(value: &Value, out: &mut Vec<ToolCall>) {
    match value {
        Value::Array(items) => {
            for item in items {
                if let Some(call) = tool_call_from_value(item) {
                    out.push(call);
                }
            }
        }
        Value::Object(_) => {
            if let Some(call) = tool_call_from_value(value) {
                out.push(call);
            }
        }
        _ => {}
    }
}

fn tool_call_from_value(value: &Value) -> Option<ToolCall> {
    let name = value.get("name")?.as_str()?.to_string();
    let id = value
        .get("toolUseId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let arguments = value
        .get("input")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "{}".to_string());
    Some(ToolCall { id, name, arguments })
}

fn is_metering_event(obj: &serde_json::Map<String, Value>) -> bool {
    obj.len() <= 3
        && obj.contains_key("usage")
        && (obj.contains_key("unit") || obj.contains_key("unitPlural"))
}

fn is_context_usage_event(obj: &serde_json::Map<String, Value>) -> bool {
    obj.keys().any(|k| {
        let lower = k.to_ascii_lowercase();
        lower.starts_with("contextusage") || lower.starts_with("context_usage")
    }) && !obj.contains_key("content")
        && !obj.contains_key("name")
}

fn parse_text_stream(raw: &str) -> ParsedResponse {
    let mut text_buf = String::new();
    let mut calls: Vec<ToolCall> = Vec::new();
    let mut partials: Vec<PartialToolCall> = Vec::new();

    for line in raw.lines() {
        let stripped = line
            .strip_prefix("data:")
            .or_else(|| line.strip_prefix("event:"))
            .unwrap_or(line)
            .trim();

        let Some(brace_at) = stripped.find('{') else {
            detect_bracket_annotations(stripped, &mut calls);
            continue;
        };
        let candidate = &stripped[brace_at..];

        let event = match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(obj)) => obj,
            _ => {
                detect_bracket_annotations(stripped, &mut calls);
                continue;
            }
        };

        if is_metering_event(&event) || is_context_usage_event(&event) {
            continue;
        }

        // Anthropic-style SSE envelope.
        if let Some(delta) = event.get("delta") {
            if let Some(t) = delta.get("text").and_then(Value::as_str) {
                text_buf.push_str(&decode_literal_newlines(t));
                continue;
            }
            if let Some(partial) = delta.get("partial_json").and_then(Value::as_str) {
                let key = event
                    .get("content_block")
                    .and_then(|cb| cb.get("id").or_else(|| cb.get("name")))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Some(p) = partials.iter_mut().find(|p| p.id == key || p.name == key) {
                    p.arguments.push_str(partial);
                }
                continue;
            }
        }
        if let Some(cb) = event.get("content_block") {
            if cb.get("type").and_then(Value::as_str) == Some("tool_use") {
                let id = cb.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                let name = cb.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                partials.push(PartialToolCall {
                    id,
                    name,
                    arguments: String::new(),
                });
                continue;
            }
        }

        // Kiro native content event.
        if let Some(content) = event.get("content").and_then(Value::as_str) {
            if event.get("followupPrompt").and_then(Value::as_bool) != Some(true) {
                text_buf.push_str(&decode_literal_newlines(content));
            }
            continue;
        }

        // Kiro native tool event.
        if let Some(name) = event.get("name").and_then(Value::as_str) {
            let tool_use_id = event
                .get("toolUseId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if let Some(p) = partials.iter_mut().find(|p| p.id == tool_use_id) {
                p.name = name.to_string();
            } else {
                partials.push(PartialToolCall {
                    id: tool_use_id,
                    name: name.to_string(),
                    arguments: String::new(),
                });
            }
        }
        if let Some(input) = event.get("input") {
            let fragment = input
                .get("Raw")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| input.as_str().map(str::to_string))
                .unwrap_or_else(|| input.to_string());
            if let Some(p) = partials.last_mut() {
                p.arguments.push_str(&fragment);
            }
        }
        if event.get("stop").and_then(Value::as_bool) == Some(true) {
            if let Some(p) = partials.pop() {
                calls.push(ToolCall {
                    id: p.id,
                    name: p.name,
                    arguments: normalize_or_empty(&p.arguments),
                });
            }
        }
    }

    for p in partials {
        calls.push(ToolCall {
            id: p.id,
            name: p.name,
            arguments: normalize_or_empty(&p.arguments),
        });
    }

    dedup_tool_calls(&mut calls);

    let trimmed = sanitize::sanitize_assistant_text(&text_buf, SanitizeOpts::new().trim(true));
    ParsedResponse {
        text: trimmed,
        tool_calls: calls,
    }
}

fn normalize_or_empty(raw: &str) -> String {
    let normalized = sanitize::normalize_arguments(raw);
    if normalized.is_empty() {
        "{}".to_string()
    } else {
        normalized
    }
}

fn decode_literal_newlines(s: &str) -> String {
    s.replace("\\n", "\n")
}

/// Detect `[Called NAME with args: {...}]` annotations embedded in free text.
fn detect_bracket_annotations(line: &str, out: &mut Vec<ToolCall>) {
    let Some(start) = line.find("[Called ") else {
        return;
    };
    let Some(end) = line[start..].find(']').map(|i| i + start) else {
        return;
    };
    let inner = &line[start + "[Called ".len()..end];
    let Some((name_part, args_part)) = inner.split_once(" with args:") else {
        return;
    };
    let name = name_part.trim().to_string();
    let args_raw = args_part.trim();
    let arguments = normalize_or_empty(args_raw);
    out.push(ToolCall {
        id: String::new(),
        name,
        arguments,
    });
}

fn dedup_tool_calls(calls: &mut Vec<ToolCall>) {
    let mut seen = std::collections::HashSet::new();
    calls.retain(|c| seen.insert((c.name.clone(), c.arguments.clone())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_input_returns_empty_response() {
        let parsed = parse_response(b"");
        assert_eq!(parsed.text, "");
        assert!(parsed.tool_calls.is_empty());
    }

    #[test]
    fn scenario_3_json_envelope_extracts_current_message_text() {
        let body = json!({
            "conversationState": {
                "currentMessage": {
                    "assistantResponseMessage": { "content": "Hello back" }
                }
            }
        });
        let parsed = parse_response(body.to_string().as_bytes());
        assert_eq!(parsed.text, "Hello back");
        assert!(parsed.tool_calls.is_empty());
    }

    #[test]
    fn json_envelope_falls_back_to_last_history_entry() {
        let body = json!({
            "conversationState": {
                "currentMessage": {},
                "history": [
                    { "assistantResponseMessage": { "content": "first" } },
                    { "assistantResponseMessage": { "content": "last" } }
                ]
            }
        });
        let parsed = parse_response(body.to_string().as_bytes());
        assert_eq!(parsed.text, "last");
    }

    #[test]
    fn json_envelope_collects_array_tool_use() {
        let body = json!({
            "conversationState": {
                "currentMessage": {
                    "toolUse": [
                        { "name": "get_weather", "toolUseId": "call_1", "input": {"city": "Tokyo"} }
                    ]
                }
            }
        });
        let parsed = parse_response(body.to_string().as_bytes());
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "get_weather");
        assert_eq!(parsed.tool_calls[0].id, "call_1");
    }

    #[test]
    fn scenario_4_text_stream_accumulates_content_and_finalizes_tool_call() {
        let stream = concat!(
            "{\"content\":\"The weather is \"}\n",
            "{\"name\":\"get_weather\",\"toolUseId\":\"call_1\"}\n",
            "{\"input\":\"{\\\"city\\\":\"}\n",
            "{\"input\":\"\\\"Tokyo\\\"}\"}\n",
            "{\"stop\":true}\n",
        );
        let parsed = parse_response(stream.as_bytes());
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "get_weather");
        assert_eq!(parsed.tool_calls[0].arguments, r#"{"city":"Tokyo"}"#);
    }

    #[test]
    fn text_stream_drops_metering_and_context_usage_events() {
        let stream = concat!(
            "{\"content\":\"hi\"}\n",
            "{\"unit\":\"TOKENS\",\"unitPlural\":\"TOKENS\",\"usage\":5}\n",
            "{\"contextUsagePercentage\":0.9}\n",
        );
        let parsed = parse_response(stream.as_bytes());
        assert_eq!(parsed.text, "hi");
    }

    #[test]
    fn text_stream_skips_followup_prompt_content() {
        let stream = "{\"content\":\"ignored\",\"followupPrompt\":true}\n{\"content\":\"kept\"}\n";
        let parsed = parse_response(stream.as_bytes());
        assert_eq!(parsed.text, "kept");
    }

    #[test]
    fn text_stream_accepts_anthropic_sse_envelope() {
        let stream = concat!(
            "event: content_block_delta\n",
            "data: {\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
        );
        let parsed = parse_response(stream.as_bytes());
        assert_eq!(parsed.text, "Hello");
    }

    #[test]
    fn text_stream_detects_bracketed_tool_annotation() {
        let stream = "some lead-in [Called get_weather with args: {\"city\": \"Tokyo\"}]\n";
        let parsed = parse_response(stream.as_bytes());
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "get_weather");
    }

    #[test]
    fn duplicate_tool_calls_are_deduplicated() {
        let body = json!({
            "conversationState": {
                "currentMessage": {
                    "toolUse": [
                        { "name": "x", "toolUseId": "1", "input": {"a": 1} },
                        { "name": "x", "toolUseId": "2", "input": {"a": 1} }
                    ]
                }
            }
        });
        let parsed = parse_response(body.to_string().as_bytes());
        assert_eq!(parsed.tool_calls.len(), 1);
    }
}
