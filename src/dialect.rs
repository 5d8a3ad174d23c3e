//! Inbound dialect detection and conversion into the canonical
//! Anthropic-shaped [`MessagesRequest`].
//!
//! Three non-Anthropic dialects are supported: OpenAI chat completions,
//! OpenAI Responses, and Gemini `generateContent`. Anthropic's own Messages
//! shape needs no conversion and is the default on ambiguity.

use serde_json::{json, Value};

use crate::convert::schema::rename_parameters_to_parameters_json_schema;
use crate::error::{Error, Result};
use crate::models::request::{
    ContentBlock, ImageSource, Message, MessageContent, MessagesRequest, Role, SystemBlock,
    SystemPrompt, Tool, ToolChoice, ToolResultContent,
};
use crate::sanitize::safe_parse_json;

/// Supported inbound wire dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Anthropic,
    OpenAiChat,
    OpenAiResponses,
    Gemini,
}

/// Tolerantly parse `bytes` as JSON, repairing minor malformations.
fn parse_json_tolerant(bytes: &[u8]) -> Result<Value> {
    let text = String::from_utf8_lossy(bytes);
    match safe_parse_json(&text) {
        crate::sanitize::ParseOutcome::Parsed(v) => Ok(v),
        crate::sanitize::ParseOutcome::Unparsed(_) => Err(Error::UnsupportedDialect),
    }
}

/// Detect which dialect `payload` is shaped like. Prefers Anthropic on
/// ambiguity.
pub fn detect_dialect(payload: &Value) -> Dialect {
    let has = |k: &str| payload.get(k).is_some();

    if has("max_tokens") && has("messages") {
        return Dialect::Anthropic;
    }
    if has("contents") {
        return Dialect::Gemini;
    }
    if has("input") && has("instructions") {
        return Dialect::OpenAiResponses;
    }
    if has("messages") {
        return Dialect::OpenAiChat;
    }
    Dialect::Anthropic
}

/// Parse inbound bytes and convert to the canonical request shape,
/// returning the detected dialect alongside it.
pub fn parse_inbound(bytes: &[u8]) -> Result<(MessagesRequest, Dialect)> {
    let payload = parse_json_tolerant(bytes)?;
    let dialect = detect_dialect(&payload);

    let request = match dialect {
        Dialect::Anthropic => from_anthropic(&payload)?,
        Dialect::OpenAiChat => from_openai_chat(&payload)?,
        Dialect::OpenAiResponses => from_openai_responses(&payload)?,
        Dialect::Gemini => from_gemini(&payload)?,
    };

    Ok((request, dialect))
}

fn model_or_default(payload: &Value) -> String {
    payload
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("claude-sonnet-4-5")
        .to_string()
}

fn max_tokens_or_default(payload: &Value) -> u32 {
    payload
        .get("max_tokens")
        .or_else(|| payload.get("max_output_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(4096) as u32
}

// ── Anthropic ────────────────────────────────────────────────────────────

fn from_anthropic(payload: &Value) -> Result<MessagesRequest> {
    serde_json::from_value::<MessagesRequest>(payload.clone())
        .map_err(|e| Error::Conversion(format!("invalid Anthropic payload: {e}")))
}

// ── OpenAI chat completions ──────────────────────────────────────────────

fn from_openai_chat(payload: &Value) -> Result<MessagesRequest> {
    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    let raw_messages = payload
        .get("messages")
        .and_then(Value::as_array)
        .ok_or(Error::NoUserTurn)?;

    for m in raw_messages {
        let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
        match role {
            "system" | "developer" => {
                system_parts.push(openai_content_text(m.get("content")));
            }
            "tool" => {
                let tool_call_id = m
                    .get("tool_call_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let text = openai_content_text(m.get("content"));
                messages.push(Message {
                    role: Role::User,
                    content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                        tool_use_id: tool_call_id,
                        content: ToolResultContent::Text(text),
                        is_error: false,
                    }]),
                });
            }
            "assistant" => {
                let mut blocks = Vec::new();
                let text = openai_content_text(m.get("content"));
                if !text.is_empty() {
                    blocks.push(ContentBlock::Text { text });
                }
                if let Some(tool_calls) = m.get("tool_calls").and_then(Value::as_array) {
                    for call in tool_calls {
                        let id = call
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let func = call.get("function").cloned().unwrap_or(Value::Null);
                        let name = func
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let args_str = func
                            .get("arguments")
                            .and_then(Value::as_str)
                            .unwrap_or("{}");
                        let input = serde_json::from_str(args_str).unwrap_or(json!({}));
                        blocks.push(ContentBlock::ToolUse { id, name, input });
                    }
                }
                if blocks.is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: String::new(),
                    });
                }
                messages.push(Message {
                    role: Role::Assistant,
                    content: MessageContent::Blocks(blocks),
                });
            }
            _ => {
                messages.push(Message {
                    role: Role::User,
                    content: openai_user_content(m.get("content")),
                });
            }
        }
    }

    let tools = payload.get("tools").and_then(Value::as_array).map(|arr| {
        arr.iter()
            .filter_map(|t| {
                let func = t.get("function")?;
                Some(Tool {
                    name: func.get("name")?.as_str()?.to_string(),
                    description: func
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    input_schema: func
                        .get("parameters")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                })
            })
            .collect::<Vec<_>>()
    });

    let tool_choice = openai_tool_choice(payload.get("tool_choice"));

    Ok(MessagesRequest {
        model: model_or_default(payload),
        max_tokens: max_tokens_or_default(payload),
        messages,
        system: non_empty_system(system_parts),
        tools,
        tool_choice,
        stream: payload
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        temperature: payload.get("temperature").and_then(Value::as_f64).map(|v| v as f32),
        top_p: payload.get("top_p").and_then(Value::as_f64).map(|v| v as f32),
        stop_sequences: payload.get("stop").and_then(openai_stop_sequences),
        thinking: None,
    })
}

fn openai_stop_sequences(v: &Value) -> Option<Vec<String>> {
    match v {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(arr) => Some(
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    }
}

fn openai_tool_choice(v: Option<&Value>) -> Option<ToolChoice> {
    match v {
        Some(Value::String(s)) => match s.as_str() {
            "auto" => Some(ToolChoice::Auto),
            "none" => Some(ToolChoice::None),
            "required" => Some(ToolChoice::Any),
            _ => None,
        },
        Some(Value::Object(_)) => v
            .and_then(|v| v.get("function"))
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .map(|name| ToolChoice::Tool {
                name: name.to_string(),
            }),
        _ => None,
    }
}

fn openai_content_text(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn openai_user_content(v: Option<&Value>) -> MessageContent {
    match v {
        Some(Value::Array(parts)) => {
            let mut blocks = Vec::new();
            for part in parts {
                match part.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = part.get("text").and_then(Value::as_str) {
                            blocks.push(ContentBlock::Text {
                                text: text.to_string(),
                            });
                        }
                    }
                    Some("image_url") => {
                        if let Some(url) = part
                            .get("image_url")
                            .and_then(|u| u.get("url"))
                            .and_then(Value::as_str)
                        {
                            if let Some((media_type, data)) = parse_data_url(url) {
                                blocks.push(ContentBlock::Image {
                                    source: ImageSource {
                                        source_type: "base64".to_string(),
                                        media_type,
                                        data,
                                    },
                                });
                            }
                        }
                    }
                    _ => {}
                }
            }
            MessageContent::Blocks(blocks)
        }
        Some(Value::String(s)) => MessageContent::Text(s.clone()),
        _ => MessageContent::Text(String::new()),
    }
}

fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (media_type, data) = rest.split_once(";base64,")?;
    Some((media_type.to_string(), data.to_string()))
}

// ── OpenAI Responses ─────────────────────────────────────────────────────

fn from_openai_responses(payload: &Value) -> Result<MessagesRequest> {
    let instructions = payload
        .get("instructions")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut messages = Vec::new();
    match payload.get("input") {
        Some(Value::String(s)) => {
            messages.push(Message {
                role: Role::User,
                content: MessageContent::Text(s.clone()),
            });
        }
        Some(Value::Array(items)) => {
            for item in items {
                let role = item.get("role").and_then(Value::as_str).unwrap_or("user");
                let role = if role == "assistant" {
                    Role::Assistant
                } else {
                    Role::User
                };
                let text = openai_content_text(item.get("content"));
                messages.push(Message {
                    role,
                    content: MessageContent::Text(text),
                });
            }
        }
        _ => {}
    }

    if messages.is_empty() {
        return Err(Error::NoUserTurn);
    }

    let tools = payload.get("tools").and_then(Value::as_array).map(|arr| {
        arr.iter()
            .filter_map(|t| {
                Some(Tool {
                    name: t.get("name")?.as_str()?.to_string(),
                    description: t
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    input_schema: t
                        .get("parameters")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                })
            })
            .collect::<Vec<_>>()
    });

    Ok(MessagesRequest {
        model: model_or_default(payload),
        max_tokens: max_tokens_or_default(payload),
        messages,
        system: non_empty_system(vec![instructions]),
        tools,
        tool_choice: None,
        stream: payload
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        temperature: None,
        top_p: None,
        stop_sequences: None,
        thinking: None,
    })
}

// ── Gemini generateContent ───────────────────────────────────────────────

fn from_gemini(payload: &Value) -> Result<MessagesRequest> {
    let system_text = payload
        .get("systemInstruction")
        .and_then(|si| si.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n\n")
        })
        .unwrap_or_default();

    let contents = payload
        .get("contents")
        .and_then(Value::as_array)
        .ok_or(Error::NoUserTurn)?;

    let mut messages = Vec::new();
    for c in contents {
        let role = match c.get("role").and_then(Value::as_str) {
            Some("model") => Role::Assistant,
            _ => Role::User,
        };
        let parts = c.get("parts").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut blocks = Vec::new();
        for part in &parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                blocks.push(ContentBlock::Text {
                    text: text.to_string(),
                });
            } else if let Some(fc) = part.get("functionCall") {
                blocks.push(ContentBlock::ToolUse {
                    id: fc
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("call")
                        .to_string(),
                    name: fc
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    input: fc.get("args").cloned().unwrap_or(json!({})),
                });
            } else if let Some(fr) = part.get("functionResponse") {
                let name = fr.get("name").and_then(Value::as_str).unwrap_or_default();
                let response = fr
                    .get("response")
                    .map(|r| r.to_string())
                    .unwrap_or_default();
                blocks.push(ContentBlock::ToolResult {
                    tool_use_id: name.to_string(),
                    content: ToolResultContent::Text(response),
                    is_error: false,
                });
            }
        }
        if blocks.is_empty() {
            continue;
        }
        messages.push(Message {
            role,
            content: MessageContent::Blocks(blocks),
        });
    }

    if messages.is_empty() {
        return Err(Error::NoUserTurn);
    }

    let tools = payload
        .get("tools")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .flat_map(|t| {
                    t.get("functionDeclarations")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default()
                })
                .map(|fd| gemini_tool_from_declaration(&fd))
                .collect::<Vec<_>>()
        })
        .filter(|v: &Vec<Tool>| !v.is_empty());

    Ok(MessagesRequest {
        model: model_or_default(payload),
        max_tokens: max_tokens_or_default(payload),
        messages,
        system: non_empty_system(vec![system_text]),
        tools,
        tool_choice: None,
        stream: false,
        temperature: payload
            .get("generationConfig")
            .and_then(|g| g.get("temperature"))
            .and_then(Value::as_f64)
            .map(|v| v as f32),
        top_p: payload
            .get("generationConfig")
            .and_then(|g| g.get("topP"))
            .and_then(Value::as_f64)
            .map(|v| v as f32),
        stop_sequences: None,
        thinking: None,
    })
}

fn gemini_tool_from_declaration(fd: &Value) -> Tool {
    let normalized = rename_parameters_to_parameters_json_schema(fd);
    Tool {
        name: fd
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        description: fd
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        input_schema: normalized
            .get("parametersJsonSchema")
            .cloned()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
    }
}

fn non_empty_system(parts: Vec<String>) -> Option<SystemPrompt> {
    let joined = parts
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if joined.is_empty() {
        None
    } else {
        Some(SystemPrompt::Blocks(vec![SystemBlock {
            block_type: "text".to_string(),
            text: joined,
        }]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_anthropic_by_max_tokens_and_messages() {
        let v = json!({"model": "x", "max_tokens": 10, "messages": []});
        assert_eq!(detect_dialect(&v), Dialect::Anthropic);
    }

    #[test]
    fn detects_openai_chat_by_messages_only() {
        let v = json!({"model": "x", "messages": []});
        assert_eq!(detect_dialect(&v), Dialect::OpenAiChat);
    }

    #[test]
    fn detects_gemini_by_contents() {
        let v = json!({"contents": []});
        assert_eq!(detect_dialect(&v), Dialect::Gemini);
    }

    #[test]
    fn detects_openai_responses_by_input_and_instructions() {
        let v = json!({"input": "hi", "instructions": "be nice"});
        assert_eq!(detect_dialect(&v), Dialect::OpenAiResponses);
    }

    #[test]
    fn ambiguous_payload_prefers_anthropic() {
        let v = json!({"max_tokens": 10, "messages": [], "contents": []});
        assert_eq!(detect_dialect(&v), Dialect::Anthropic);
    }

    #[test]
    fn converts_openai_chat_tool_call_round_trip() {
        let payload = json!({
            "model": "gpt",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "what's the weather?"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "get_weather", "arguments": "{\"city\":\"nyc\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "72F"}
            ]
        });
        let (req, dialect) = parse_inbound(payload.to_string().as_bytes()).unwrap();
        assert_eq!(dialect, Dialect::OpenAiChat);
        assert_eq!(req.messages.len(), 3);
        assert!(req.system.is_some());
    }
}
