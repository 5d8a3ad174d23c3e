//! Raw Kiro API fragment types shared by content and tool-context conversion.

use serde::{Deserialize, Serialize};

/// Tool specification in Kiro format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroToolSpec {
    pub tool_specification: ToolSpecification,
}

/// Inner tool specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecification {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

/// Tool input schema wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSchema {
    pub json: serde_json::Value,
}

/// Tool result in Kiro format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroToolResult {
    pub content: Vec<KiroTextContent>,
    pub status: String,
    pub tool_use_id: String,
}

/// Text content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KiroTextContent {
    pub text: String,
}

/// Image in Kiro format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KiroImage {
    pub format: String,
    pub source: KiroImageSource,
}

/// Image source (base64 bytes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KiroImageSource {
    pub bytes: String,
}

/// Tool use in an assistant response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroToolUse {
    pub name: String,
    pub input: serde_json::Value,
    pub tool_use_id: String,
}
