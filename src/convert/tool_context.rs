//! Tool-context assembly: Kiro tool specs, the overflow manifest for
//! clamped descriptions, Claude-style tool-choice metadata, and plan-mode
//! tracking.

use serde_json::{json, Value};

use crate::convert::schema::{clamp_desc, sanitize_json_schema};
use crate::models::kiro::{InputSchema, KiroToolSpec, ToolSpecification};
use crate::models::request::{ContentBlock, Message, MessageContent, Role, Tool, ToolChoice};

/// Tool names that put the conversation into plan mode while unresolved.
const PLAN_TOOL_NAMES: &[&str] = &["Task", "ExitPlanMode"];

/// A manifest entry for a tool whose description was clamped on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub description: String,
    pub hash: u64,
}

impl ManifestEntry {
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "hash": format!("{:016x}", self.hash),
        })
    }
}

/// Claude-style tool-choice metadata attached to the wire request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolChoiceMeta {
    pub mode: String,
    pub name: Option<String>,
}

impl ToolChoiceMeta {
    pub fn to_value(&self) -> Value {
        let mut v = json!({ "mode": self.mode });
        if let Some(name) = &self.name {
            v["name"] = Value::String(name.clone());
        }
        v
    }

    /// One-line directive injected into the system prompt when the mode
    /// forces a specific tool.
    pub fn directive(&self) -> Option<String> {
        if self.mode == "tool" {
            self.name
                .as_ref()
                .map(|n| format!("Tool directive: you must call the tool `{n}`"))
        } else {
            None
        }
    }
}

/// A plan-mode tool_use that has not been answered by a matching
/// tool_result yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTool {
    pub tool_use_id: String,
    pub name: String,
}

/// Plan-mode state derived from unresolved `Task`/`ExitPlanMode` calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanMode {
    pub active: bool,
    pub pending: Vec<PendingTool>,
}

impl PlanMode {
    pub fn to_value(&self) -> Value {
        json!({
            "active": self.active,
            "pending": self.pending.iter().map(|p| json!({
                "toolUseId": p.tool_use_id,
                "name": p.name,
            })).collect::<Vec<_>>(),
        })
    }

    /// One-line directive injected into the system prompt while a plan
    /// step is pending.
    pub fn directive(&self) -> Option<String> {
        if !self.active || self.pending.is_empty() {
            return None;
        }
        let names: Vec<&str> = self.pending.iter().map(|p| p.name.as_str()).collect();
        Some(format!(
            "Plan directive: resume the pending plan step(s) before responding further: {}",
            names.join(", ")
        ))
    }
}

/// Full output of tool-context assembly.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub tools: Vec<KiroToolSpec>,
    pub manifest: Vec<ManifestEntry>,
    pub tool_choice_meta: Option<ToolChoiceMeta>,
    pub plan_mode: Option<PlanMode>,
}

impl ToolContext {
    /// System-prompt directive lines contributed by tool_choice and plan
    /// mode, in that order.
    pub fn directives(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(meta) = &self.tool_choice_meta {
            if let Some(d) = meta.directive() {
                lines.push(d);
            }
        }
        if let Some(plan) = &self.plan_mode {
            if let Some(d) = plan.directive() {
                lines.push(d);
            }
        }
        lines
    }

    pub fn manifest_value(&self) -> Option<Value> {
        if self.manifest.is_empty() {
            return None;
        }
        Some(Value::Array(
            self.manifest.iter().map(ManifestEntry::to_value).collect(),
        ))
    }
}

/// Build Kiro tool specs, overflow manifest, tool-choice metadata, and
/// plan-mode state for one request.
pub fn build_tool_context(
    tools: &[Tool],
    tool_choice: Option<&ToolChoice>,
    messages: &[Message],
) -> ToolContext {
    let mut specs = Vec::with_capacity(tools.len());
    let mut manifest = Vec::new();

    for tool in tools {
        let full_desc = tool.description.clone().unwrap_or_default();
        let clamped = clamp_desc(&full_desc);
        if clamped.truncated {
            manifest.push(ManifestEntry {
                name: tool.name.clone(),
                description: full_desc,
                hash: clamped.hash,
            });
        }
        specs.push(KiroToolSpec {
            tool_specification: ToolSpecification {
                name: tool.name.clone(),
                description: clamped.text,
                input_schema: InputSchema {
                    json: sanitize_json_schema(&tool.input_schema),
                },
            },
        });
    }

    let tool_choice_meta = tool_choice.map(|choice| match choice {
        ToolChoice::Auto => ToolChoiceMeta {
            mode: "auto".to_string(),
            name: None,
        },
        ToolChoice::Any => ToolChoiceMeta {
            mode: "any".to_string(),
            name: None,
        },
        ToolChoice::None => ToolChoiceMeta {
            mode: "none".to_string(),
            name: None,
        },
        ToolChoice::Tool { name } => ToolChoiceMeta {
            mode: "tool".to_string(),
            name: Some(name.clone()),
        },
    });

    let plan_mode = detect_plan_mode(messages);

    ToolContext {
        tools: specs,
        manifest,
        tool_choice_meta,
        plan_mode,
    }
}

fn detect_plan_mode(messages: &[Message]) -> Option<PlanMode> {
    let mut opened: Vec<PendingTool> = Vec::new();
    let mut resolved: std::collections::HashSet<String> = std::collections::HashSet::new();

    for message in messages {
        let blocks: Vec<&ContentBlock> = match &message.content {
            MessageContent::Blocks(blocks) => blocks.iter().collect(),
            MessageContent::Text(_) => continue,
        };

        for block in blocks {
            match (message.role, block) {
                (Role::Assistant, ContentBlock::ToolUse { id, name, .. })
                    if PLAN_TOOL_NAMES.contains(&name.as_str()) =>
                {
                    opened.push(PendingTool {
                        tool_use_id: id.clone(),
                        name: name.clone(),
                    });
                }
                (_, ContentBlock::ToolResult { tool_use_id, .. }) => {
                    resolved.insert(tool_use_id.clone());
                }
                _ => {}
            }
        }
    }

    if opened.is_empty() {
        return None;
    }

    let pending: Vec<PendingTool> = opened
        .into_iter()
        .filter(|p| !resolved.contains(&p.tool_use_id))
        .collect();

    Some(PlanMode {
        active: !pending.is_empty(),
        pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::{Message, MessageContent};
    use serde_json::json;

    fn tool(name: &str, desc: &str) -> Tool {
        Tool {
            name: name.to_string(),
            description: Some(desc.to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    #[test]
    fn emits_one_spec_per_tool_and_no_manifest_for_short_descriptions() {
        let tools = vec![tool("search", "looks things up")];
        let ctx = build_tool_context(&tools, None, &[]);
        assert_eq!(ctx.tools.len(), 1);
        assert!(ctx.manifest.is_empty());
    }

    #[test]
    fn manifest_entry_emitted_only_when_clamped() {
        let long_desc = "word ".repeat(200);
        let tools = vec![tool("search", &long_desc)];
        let ctx = build_tool_context(&tools, None, &[]);
        assert_eq!(ctx.manifest.len(), 1);
        assert_eq!(ctx.manifest[0].description, long_desc);
    }

    #[test]
    fn tool_choice_tool_mode_emits_directive() {
        let choice = ToolChoice::Tool {
            name: "search".to_string(),
        };
        let ctx = build_tool_context(&[], Some(&choice), &[]);
        let directives = ctx.directives();
        assert_eq!(directives.len(), 1);
        assert!(directives[0].contains("search"));
    }

    #[test]
    fn plan_mode_active_when_task_unresolved() {
        let messages = vec![Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                id: "t1".to_string(),
                name: "Task".to_string(),
                input: json!({}),
            }]),
        }];
        let ctx = build_tool_context(&[], None, &messages);
        let plan = ctx.plan_mode.unwrap();
        assert!(plan.active);
        assert_eq!(plan.pending.len(), 1);
    }

    #[test]
    fn plan_mode_inactive_when_task_resolved() {
        let messages = vec![
            Message {
                role: Role::Assistant,
                content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                    id: "t1".to_string(),
                    name: "ExitPlanMode".to_string(),
                    input: json!({}),
                }]),
            },
            Message {
                role: Role::User,
                content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: "t1".to_string(),
                    content: crate::models::request::ToolResultContent::Text("ok".to_string()),
                    is_error: false,
                }]),
            },
        ];
        let ctx = build_tool_context(&[], None, &messages);
        let plan = ctx.plan_mode.unwrap();
        assert!(!plan.active);
        assert!(plan.pending.is_empty());
    }
}
