//! Content block conversion between Anthropic and Kiro formats.

use crate::models::kiro::{
    KiroImage, KiroImageSource, KiroTextContent, KiroToolResult, KiroToolUse,
};
use crate::models::request::{ContentBlock, ImageSource, MessageContent};

/// Extract plain text from a message's content.
pub fn extract_text(content: &MessageContent) -> String {
    content.text()
}

/// Extract images from a message's content blocks.
pub fn extract_images(content: &MessageContent) -> Vec<KiroImage> {
    match content {
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Image { source } => Some(image_to_kiro(source)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Convert an Anthropic image source to Kiro format.
fn image_to_kiro(source: &ImageSource) -> KiroImage {
    // Map media type to Kiro format string
    let format = match source.media_type.as_str() {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpeg",
    };

    KiroImage {
        format: format.to_string(),
        source: KiroImageSource {
            bytes: source.data.clone(),
        },
    }
}

/// Extract tool use blocks from a message.
pub fn extract_tool_uses(content: &MessageContent) -> Vec<KiroToolUse> {
    match content {
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(KiroToolUse {
                    name: name.clone(),
                    input: input.clone(),
                    tool_use_id: id.clone(),
                }),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Extract tool result blocks from a message.
pub fn extract_tool_results(content: &MessageContent) -> Vec<KiroToolResult> {
    match content {
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let text = content.text();
                    let status = if *is_error { "error" } else { "success" };
                    Some(KiroToolResult {
                        content: vec![KiroTextContent { text }],
                        status: status.to_string(),
                        tool_use_id: tool_use_id.clone(),
                    })
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
