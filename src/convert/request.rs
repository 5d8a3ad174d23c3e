//! Translate a canonical (dialect-agnostic) request into Kiro's
//! `conversationState` wire payload.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::API_ORIGIN;
use crate::convert::{content, model_resolver, tool_context};
use crate::dialect;
use crate::error::{Error, Result};
use crate::models::request::{ContentBlock, Message, MessageContent, MessagesRequest, Role, SystemPrompt};
use crate::pool::{AuthMethod, TokenHandle};
use crate::sanitize::{self, SanitizeOpts};

/// Caller-supplied metadata not carried in the inbound payload itself.
#[derive(Debug, Clone, Default)]
pub struct ExtraMeta {
    pub project: Option<String>,
}

/// Parse `inbound_payload_bytes` in any supported dialect and translate it
/// into a serialized Kiro wire payload addressed to `model`, authenticated
/// by `token`.
pub fn build_request(
    model: &str,
    inbound_payload_bytes: &[u8],
    token: &TokenHandle,
    extra_meta: &ExtraMeta,
) -> Result<Vec<u8>> {
    let (canonical, _dialect) = dialect::parse_inbound(inbound_payload_bytes)?;
    let value = build_kiro_value(model, &canonical, token, extra_meta)?;
    serde_json::to_vec(&value).map_err(Error::from)
}

/// Same as [`build_request`] but returns the intermediate `Value`, useful
/// for feeding [`flatten_rebuild`]/[`minimal_rebuild`] without re-parsing.
pub fn build_kiro_value(
    model: &str,
    request: &MessagesRequest,
    token: &TokenHandle,
    extra_meta: &ExtraMeta,
) -> Result<Value> {
    let model_id = model_resolver::resolve_model(model);
    let text_opts = SanitizeOpts::new().trim(true);

    let system_text = normalize_system(request.system.as_ref());

    let normalized: Vec<Message> = request
        .messages
        .iter()
        .map(|m| Message {
            role: if m.role == Role::System { Role::User } else { m.role },
            content: m.content.clone(),
        })
        .collect();
    let turns = collapse_adjacent(&normalized);

    if turns.is_empty() {
        return Err(Error::EmptyMessages);
    }
    if !turns.iter().any(|m| m.role == Role::User) {
        return Err(Error::NoUserTurn);
    }

    let (history_msgs, current_msg, current_is_pure_tool_result) = partition_current(turns);

    let tool_ctx = tool_context::build_tool_context(
        request.tools.as_deref().unwrap_or(&[]),
        request.tool_choice.as_ref(),
        &request.messages,
    );

    let current_text = if current_is_pure_tool_result {
        ".".to_string()
    } else {
        sanitize::sanitize_assistant_text(&content::extract_text(&current_msg.content), text_opts)
    };
    let current_images = content::extract_images(&current_msg.content);

    let mut user_input_message = json!({
        "content": current_text,
        "modelId": model_id,
        "origin": API_ORIGIN,
    });

    if !current_images.is_empty() {
        user_input_message["images"] = serde_json::to_value(&current_images).unwrap_or_default();
    }

    let mut context = serde_json::Map::new();
    if !tool_ctx.tools.is_empty() {
        context.insert(
            "tools".to_string(),
            serde_json::to_value(&tool_ctx.tools).unwrap_or_default(),
        );
    }
    if let Some(manifest) = tool_ctx.manifest_value() {
        context.insert("toolContextManifest".to_string(), manifest);
    }
    if let Some(meta) = &tool_ctx.tool_choice_meta {
        context.insert("claudeToolChoice".to_string(), meta.to_value());
    }
    if let Some(plan) = &tool_ctx.plan_mode {
        context.insert("planMode".to_string(), plan.to_value());
    }
    if let Some(project) = &extra_meta.project {
        context.insert("projectName".to_string(), Value::String(project.clone()));
    }
    if !context.is_empty() {
        user_input_message["userInputMessageContext"] = Value::Object(context);
    }

    let mut history: Vec<Value> = Vec::new();

    let manifest_appendix = manifest_appendix(&tool_ctx.manifest);
    let directives = tool_ctx.directives().join("\n");
    let seed_text = [system_text.as_str(), manifest_appendix.as_str(), directives.as_str()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if !seed_text.is_empty() {
        history.push(json!({
            "userInputMessage": {
                "content": sanitize::sanitize_assistant_text(&seed_text, text_opts),
                "modelId": model_id,
                "origin": API_ORIGIN,
            }
        }));
    }

    history.extend(build_history_entries(&history_msgs, model_id));

    if current_is_pure_tool_result {
        history.extend(build_history_entries(std::slice::from_ref(&current_msg), model_id));
    }

    let conversation_id = Uuid::new_v4().to_string();

    let mut payload = json!({
        "conversationState": {
            "chatTriggerType": "MANUAL",
            "conversationId": conversation_id,
            "currentMessage": {
                "userInputMessage": user_input_message,
            },
        }
    });

    if !history.is_empty() {
        payload["conversationState"]["history"] = Value::Array(history);
    }

    if token.auth_method == AuthMethod::Social {
        if let Some(arn) = &token.profile_arn {
            payload["profileArn"] = Value::String(arn.clone());
        }
    }

    Ok(payload)
}

/// Discard structured history, rewriting `currentMessage.content` as a
/// verbose transcript of all prior turns. Used on a Kiro 400 "improperly
/// formed request" after the primary payload is rejected.
pub fn flatten_rebuild(primary: &Value) -> Value {
    let mut rebuilt = primary.clone();
    let Some(cs) = rebuilt.get_mut("conversationState") else {
        return rebuilt;
    };

    let mut transcript = vec!["Structured tool transcripts were flattened.".to_string()];
    if let Some(history) = cs.get("history").and_then(|h| h.as_array()) {
        for entry in history {
            if let Some(text) = entry
                .get("userInputMessage")
                .and_then(|u| u.get("content"))
                .and_then(|c| c.as_str())
            {
                transcript.push(format!("User: {text}"));
            } else if let Some(text) = entry
                .get("assistantResponseMessage")
                .and_then(|a| a.get("content"))
                .and_then(|c| c.as_str())
            {
                transcript.push(format!("Assistant: {text}"));
            }
        }
    }
    let current_content = cs["currentMessage"]["userInputMessage"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    transcript.push(format!("User: {current_content}"));

    if let Some(obj) = cs.as_object_mut() {
        obj.remove("history");
    }
    if let Some(uim) = cs["currentMessage"]["userInputMessage"].as_object_mut() {
        uim.remove("userInputMessageContext");
        uim.insert(
            "content".to_string(),
            Value::String(transcript.join("\n\n")),
        );
    }

    rebuilt
}

/// Discard structured history entirely, leaving a short guidance line plus
/// only the final user text. The last-resort fallback after
/// [`flatten_rebuild`] also fails.
pub fn minimal_rebuild(primary: &Value) -> Value {
    let mut rebuilt = primary.clone();
    let Some(cs) = rebuilt.get_mut("conversationState") else {
        return rebuilt;
    };

    let current_content = cs["currentMessage"]["userInputMessage"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    if let Some(obj) = cs.as_object_mut() {
        obj.remove("history");
    }
    if let Some(uim) = cs["currentMessage"]["userInputMessage"].as_object_mut() {
        uim.remove("userInputMessageContext");
        uim.insert(
            "content".to_string(),
            Value::String(format!(
                "Respond directly to the user's message below.\n\n{current_content}"
            )),
        );
    }

    rebuilt
}

fn normalize_system(system: Option<&SystemPrompt>) -> String {
    let raw = system.map(|s| s.text()).unwrap_or_default();
    sanitize::sanitize_assistant_text(&raw, SanitizeOpts::new().trim(true))
}

fn manifest_appendix(manifest: &[tool_context::ManifestEntry]) -> String {
    manifest
        .iter()
        .map(|m| format!("Tool '{}' full description:\n{}", m.name, m.description))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn is_plain_text(content: &MessageContent) -> bool {
    match content {
        MessageContent::Text(_) => true,
        MessageContent::Blocks(blocks) => blocks.iter().all(|b| matches!(b, ContentBlock::Text { .. })),
    }
}

/// Merge adjacent same-role turns, but only when both sides carry plain
/// text — a turn containing `tool_use`/`tool_result` blocks never merges
/// with its neighbor, so its history placement stays traceable.
fn collapse_adjacent(messages: &[Message]) -> Vec<Message> {
    let mut result: Vec<Message> = Vec::new();
    for msg in messages {
        if let Some(last) = result.last_mut() {
            if last.role == msg.role && is_plain_text(&last.content) && is_plain_text(&msg.content) {
                let combined = format!("{}{}", last.content.text(), msg.content.text());
                last.content = MessageContent::Text(combined);
                continue;
            }
        }
        result.push(msg.clone());
    }
    result
}

/// Split `turns` into `(history, current, current_is_pure_tool_result)`.
/// The last user turn becomes `current`; every other turn (including any
/// trailing assistant turns after it) goes to history in original order.
fn partition_current(turns: Vec<Message>) -> (Vec<Message>, Message, bool) {
    let idx = turns
        .iter()
        .rposition(|m| m.role == Role::User)
        .expect("caller verified at least one user turn");

    let is_pure_tool_result = matches!(
        &turns[idx].content,
        MessageContent::Blocks(blocks)
            if !blocks.is_empty() && blocks.iter().all(|b| matches!(b, ContentBlock::ToolResult { .. }))
    );

    let mut history = Vec::with_capacity(turns.len().saturating_sub(1));
    let mut current = None;
    for (i, msg) in turns.into_iter().enumerate() {
        if i == idx {
            current = Some(msg);
        } else {
            history.push(msg);
        }
    }

    (history, current.expect("idx is in range"), is_pure_tool_result)
}

/// Render history turns with all structured tool events dropped to text,
/// per the rule that Kiro rejects client-supplied structured tool results.
fn build_history_entries(messages: &[Message], model_id: &str) -> Vec<Value> {
    let text_opts = SanitizeOpts::new().trim(true);
    messages
        .iter()
        .map(|m| match m.role {
            Role::Assistant => {
                let tool_uses = content::extract_tool_uses(&m.content);
                let lead_text =
                    sanitize::sanitize_assistant_text(&content::extract_text(&m.content), text_opts);
                let text = if lead_text.is_empty() && !tool_uses.is_empty() {
                    "[placeholder]".to_string()
                } else {
                    lead_text
                };

                let mut entry = json!({ "assistantResponseMessage": { "content": text } });
                if !tool_uses.is_empty() {
                    entry["assistantResponseMessage"]["toolUses"] =
                        serde_json::to_value(&tool_uses).unwrap_or_default();
                }
                entry
            }
            Role::User | Role::System => {
                let tool_results = content::extract_tool_results(&m.content);
                let text = if !tool_results.is_empty() {
                    tool_results
                        .iter()
                        .map(|tr| {
                            let joined = tr
                                .content
                                .iter()
                                .map(|c| c.text.as_str())
                                .collect::<Vec<_>>()
                                .join(" ");
                            format!("[Tool result: id={} | {}]", tr.tool_use_id, joined)
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                } else {
                    sanitize::sanitize_assistant_text(&content::extract_text(&m.content), text_opts)
                };

                json!({
                    "userInputMessage": {
                        "content": text,
                        "modelId": model_id,
                        "origin": API_ORIGIN,
                    }
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::{ImageSource, ToolResultContent};

    fn social_token() -> TokenHandle {
        TokenHandle {
            id: "t1".to_string(),
            access_token: "at".to_string(),
            profile_arn: Some("arn:aws:codewhisperer:us-east-1:1234:profile/x".to_string()),
            auth_method: AuthMethod::Social,
            region: "us-east-1".to_string(),
        }
    }

    fn api_key_token() -> TokenHandle {
        TokenHandle {
            profile_arn: None,
            auth_method: AuthMethod::ApiKey,
            ..social_token()
        }
    }

    fn minimal_request(messages: Vec<Message>) -> MessagesRequest {
        MessagesRequest {
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 1024,
            messages,
            system: None,
            tools: None,
            tool_choice: None,
            stream: false,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            thinking: None,
        }
    }

    #[test]
    fn scenario_1_hello_has_mapped_model_arn_and_no_history() {
        let request = minimal_request(vec![Message {
            role: Role::User,
            content: MessageContent::Text("Hello".to_string()),
        }]);
        let token = social_token();
        let value =
            build_kiro_value("claude-sonnet-4-5", &request, &token, &ExtraMeta::default()).unwrap();

        let cs = &value["conversationState"];
        assert_eq!(
            cs["currentMessage"]["userInputMessage"]["modelId"],
            "CLAUDE_SONNET_4_5_20250929_V1_0"
        );
        assert_eq!(cs["currentMessage"]["userInputMessage"]["content"], "Hello");
        assert!(cs.get("history").is_none());
        assert_eq!(
            value["profileArn"],
            "arn:aws:codewhisperer:us-east-1:1234:profile/x"
        );
    }

    #[test]
    fn api_key_token_never_gets_profile_arn() {
        let request = minimal_request(vec![Message {
            role: Role::User,
            content: MessageContent::Text("Hello".to_string()),
        }]);
        let token = api_key_token();
        let value =
            build_kiro_value("claude-sonnet-4-5", &request, &token, &ExtraMeta::default()).unwrap();
        assert!(value.get("profileArn").is_none());
    }

    #[test]
    fn scenario_2_tool_result_then_text_drops_structured_history() {
        let messages = vec![
            Message {
                role: Role::Assistant,
                content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string(),
                    input: json!({"city": "Tokyo"}),
                }]),
            },
            Message {
                role: Role::User,
                content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: "call_1".to_string(),
                    content: ToolResultContent::Text("22°C".to_string()),
                    is_error: false,
                }]),
            },
            Message {
                role: Role::User,
                content: MessageContent::Text("Thanks".to_string()),
            },
        ];
        let request = minimal_request(messages);
        let token = social_token();
        let value =
            build_kiro_value("claude-sonnet-4-5", &request, &token, &ExtraMeta::default()).unwrap();

        let cs = &value["conversationState"];
        assert_eq!(cs["currentMessage"]["userInputMessage"]["content"], "Thanks");

        let history = cs["history"].as_array().unwrap();
        let last = history.last().unwrap();
        let last_user = &last["userInputMessage"];
        assert!(last_user["content"]
            .as_str()
            .unwrap()
            .contains("[Tool result: id=call_1 | 22°C]"));
        assert!(last_user.get("toolResults").is_none());

        let assistant_entry = &history[history.len() - 2]["assistantResponseMessage"];
        assert_eq!(assistant_entry["content"], "[placeholder]");
        assert!(assistant_entry.get("toolUses").is_some());
    }

    #[test]
    fn pure_tool_result_current_turn_becomes_placeholder_dot() {
        let messages = vec![
            Message {
                role: Role::Assistant,
                content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string(),
                    input: json!({}),
                }]),
            },
            Message {
                role: Role::User,
                content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: "call_1".to_string(),
                    content: ToolResultContent::Text("22°C".to_string()),
                    is_error: false,
                }]),
            },
        ];
        let request = minimal_request(messages);
        let token = social_token();
        let value =
            build_kiro_value("claude-sonnet-4-5", &request, &token, &ExtraMeta::default()).unwrap();

        let cs = &value["conversationState"];
        assert_eq!(cs["currentMessage"]["userInputMessage"]["content"], ".");
        assert!(cs["currentMessage"]["userInputMessage"]
            .get("userInputMessageContext")
            .is_none());

        let history = cs["history"].as_array().unwrap();
        let last = history.last().unwrap();
        assert!(last["userInputMessage"]["content"]
            .as_str()
            .unwrap()
            .contains("[Tool result: id=call_1 | 22°C]"));
    }

    #[test]
    fn empty_messages_rejected() {
        let request = minimal_request(vec![]);
        let token = social_token();
        let err = build_kiro_value("claude-sonnet-4-5", &request, &token, &ExtraMeta::default())
            .unwrap_err();
        assert!(matches!(err, Error::EmptyMessages));
    }

    #[test]
    fn assistant_only_conversation_has_no_user_turn() {
        let request = minimal_request(vec![Message {
            role: Role::Assistant,
            content: MessageContent::Text("hi".to_string()),
        }]);
        let token = social_token();
        let err = build_kiro_value("claude-sonnet-4-5", &request, &token, &ExtraMeta::default())
            .unwrap_err();
        assert!(matches!(err, Error::NoUserTurn));
    }

    #[test]
    fn system_prompt_is_seeded_as_one_synthetic_history_entry() {
        let mut request = minimal_request(vec![Message {
            role: Role::User,
            content: MessageContent::Text("Hello".to_string()),
        }]);
        request.system = Some(SystemPrompt::Text("Be concise.".to_string()));
        let token = social_token();
        let value =
            build_kiro_value("claude-sonnet-4-5", &request, &token, &ExtraMeta::default()).unwrap();

        let history = value["conversationState"]["history"].as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(
            history[0]["userInputMessage"]["content"],
            "Be concise."
        );
    }

    #[test]
    fn collapse_merges_only_plain_text_adjacent_turns() {
        let messages = vec![
            Message {
                role: Role::User,
                content: MessageContent::Text("Hello".to_string()),
            },
            Message {
                role: Role::User,
                content: MessageContent::Text("World".to_string()),
            },
        ];
        let result = collapse_adjacent(&messages);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].content.text(), "HelloWorld");
    }

    #[test]
    fn collapse_keeps_tool_result_turn_separate_from_following_text() {
        let messages = vec![
            Message {
                role: Role::User,
                content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: "t1".to_string(),
                    content: ToolResultContent::Text("ok".to_string()),
                    is_error: false,
                }]),
            },
            Message {
                role: Role::User,
                content: MessageContent::Text("Thanks".to_string()),
            },
        ];
        let result = collapse_adjacent(&messages);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn flatten_rebuild_discards_history_and_keeps_current_text() {
        let request = minimal_request(vec![
            Message {
                role: Role::Assistant,
                content: MessageContent::Text("Hi there".to_string()),
            },
            Message {
                role: Role::User,
                content: MessageContent::Text("Thanks".to_string()),
            },
        ]);
        let token = social_token();
        let primary =
            build_kiro_value("claude-sonnet-4-5", &request, &token, &ExtraMeta::default()).unwrap();
        let rebuilt = flatten_rebuild(&primary);
        assert!(rebuilt["conversationState"].get("history").is_none());
        let content = rebuilt["conversationState"]["currentMessage"]["userInputMessage"]["content"]
            .as_str()
            .unwrap();
        assert!(content.contains("flattened"));
        assert!(content.contains("Thanks"));
    }

    #[test]
    fn minimal_rebuild_keeps_only_final_user_text() {
        let request = minimal_request(vec![
            Message {
                role: Role::Assistant,
                content: MessageContent::Text("Hi there".to_string()),
            },
            Message {
                role: Role::User,
                content: MessageContent::Text("Thanks".to_string()),
            },
        ]);
        let token = social_token();
        let primary =
            build_kiro_value("claude-sonnet-4-5", &request, &token, &ExtraMeta::default()).unwrap();
        let rebuilt = minimal_rebuild(&primary);
        assert!(rebuilt["conversationState"].get("history").is_none());
        let content = rebuilt["conversationState"]["currentMessage"]["userInputMessage"]["content"]
            .as_str()
            .unwrap();
        assert!(content.ends_with("Thanks"));
    }

    #[test]
    fn images_are_attached_to_current_message() {
        let request = minimal_request(vec![Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64".to_string(),
                    media_type: "image/png".to_string(),
                    data: "iVBOR".to_string(),
                },
            }]),
        }]);
        let token = social_token();
        let value =
            build_kiro_value("claude-sonnet-4-5", &request, &token, &ExtraMeta::default()).unwrap();
        let images = value["conversationState"]["currentMessage"]["userInputMessage"]["images"]
            .as_array()
            .unwrap();
        assert_eq!(images.len(), 1);
    }
}
