//! JSON Schema sanitization for Kiro API compatibility.
//!
//! Kiro's API is stricter about JSON Schema than Anthropic's: it only
//! tolerates a small whitelist of keywords and rejects overlong
//! descriptions. This module normalizes arbitrary schema trees down to that
//! shape and clamps/hashes descriptions so the full text can still be
//! recovered via the tool context manifest.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use serde_json::Value;

/// Schema keywords Kiro tolerates. Everything else, including `$schema` and
/// vendor extensions, is dropped.
const RETAINED_KEYS: &[&str] = &["type", "description", "properties", "required", "enum", "items"];

/// Sanitize a JSON Schema for Kiro compatibility: retains only the known
/// keyword whitelist, recursing into `properties.*` and `items`.
pub fn sanitize_json_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for key in RETAINED_KEYS {
                let Some(value) = map.get(*key) else { continue };
                match *key {
                    "required" => {
                        if let Value::Array(arr) = value {
                            if !arr.is_empty() {
                                result.insert((*key).to_string(), value.clone());
                            }
                        }
                    }
                    "properties" => {
                        if let Value::Object(props) = value {
                            let mut sanitized = serde_json::Map::new();
                            for (prop_name, prop_schema) in props {
                                sanitized
                                    .insert(prop_name.clone(), sanitize_json_schema(prop_schema));
                            }
                            result.insert((*key).to_string(), Value::Object(sanitized));
                        }
                    }
                    "items" => {
                        result.insert((*key).to_string(), sanitize_json_schema(value));
                    }
                    _ => {
                        result.insert((*key).to_string(), value.clone());
                    }
                }
            }
            Value::Object(result)
        }
        other => other.clone(),
    }
}

/// Maximum clamped description length, in Unicode code points.
pub const MAX_DESC_CODEPOINTS: usize = crate::config::MAX_CLAMPED_DESCRIPTION_CODEPOINTS;

/// Result of [`clamp_desc`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClampedDesc {
    /// Clamped text, at most [`MAX_DESC_CODEPOINTS`] code points.
    pub text: String,
    /// True if the description was truncated.
    pub truncated: bool,
    /// First 64 bits of SHA-256 over the NFC-normalized full description.
    pub hash: u64,
}

/// Truncate `full` to [`MAX_DESC_CODEPOINTS`] code points, preferring a word
/// boundary, and compute a stable hash of the untruncated text.
pub fn clamp_desc(full: &str) -> ClampedDesc {
    let hash = hash64(full);
    let chars: Vec<char> = full.chars().collect();

    if chars.len() <= MAX_DESC_CODEPOINTS {
        return ClampedDesc {
            text: full.to_string(),
            truncated: false,
            hash,
        };
    }

    let hard_cut: String = chars[..MAX_DESC_CODEPOINTS].iter().collect();
    let text = match hard_cut.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => hard_cut[..idx].trim_end().to_string(),
        _ => hard_cut,
    };

    ClampedDesc {
        text,
        truncated: true,
        hash,
    }
}

/// First 64 bits of SHA-256 over the NFC-normalized input, big-endian.
pub fn hash64(s: &str) -> u64 {
    let normalized: String = s.nfc().collect();
    let digest = Sha256::digest(normalized.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("sha256 digest is 32 bytes"))
}

/// Rewrite a Gemini-shaped tool's `parameters` key to
/// `parametersJsonSchema`, the shape Kiro/Anthropic-style inbound
/// normalization expects. No-op if `parameters` is absent.
pub fn rename_parameters_to_parameters_json_schema(tool: &Value) -> Value {
    let Value::Object(map) = tool else {
        return tool.clone();
    };
    let mut result = map.clone();
    if let Some(params) = result.remove("parameters") {
        result.insert("parametersJsonSchema".to_string(), params);
    }
    Value::Object(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remove_empty_required() {
        let schema = json!({
            "type": "object",
            "properties": {},
            "required": []
        });
        let result = sanitize_json_schema(&schema);
        assert!(result.get("required").is_none());
    }

    #[test]
    fn test_keep_nonempty_required() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"}
            },
            "required": ["name"]
        });
        let result = sanitize_json_schema(&schema);
        assert!(result.get("required").is_some());
    }

    #[test]
    fn test_drops_unknown_keys() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "$schema": "http://json-schema.org/draft-07/schema#",
            "x-vendor-extension": true
        });
        let result = sanitize_json_schema(&schema);
        assert!(result.get("additionalProperties").is_none());
        assert!(result.get("$schema").is_none());
        assert!(result.get("x-vendor-extension").is_none());
    }

    #[test]
    fn test_recursive_sanitization() {
        let schema = json!({
            "type": "object",
            "properties": {
                "inner": {
                    "type": "object",
                    "required": [],
                    "additionalProperties": false
                }
            },
            "items": {
                "additionalProperties": false,
                "type": "string"
            }
        });
        let result = sanitize_json_schema(&schema);
        let inner = result.get("properties").unwrap().get("inner").unwrap();
        assert!(inner.get("required").is_none());
        assert!(inner.get("additionalProperties").is_none());
        let items = result.get("items").unwrap();
        assert!(items.get("additionalProperties").is_none());
        assert_eq!(items.get("type").unwrap(), "string");
    }

    #[test]
    fn clamp_desc_passes_through_short_text() {
        let c = clamp_desc("a short description");
        assert!(!c.truncated);
        assert_eq!(c.text, "a short description");
    }

    #[test]
    fn clamp_desc_truncates_at_word_boundary() {
        let full = "word ".repeat(100);
        let c = clamp_desc(&full);
        assert!(c.truncated);
        assert!(c.text.chars().count() <= MAX_DESC_CODEPOINTS);
        assert!(!c.text.ends_with(' '));
    }

    #[test]
    fn hash64_is_deterministic_and_nfc_stable() {
        // "é" as a single codepoint vs "e" + combining acute accent.
        let composed = "caf\u{00e9}";
        let decomposed = "cafe\u{0301}";
        assert_eq!(hash64(composed), hash64(decomposed));
        assert_eq!(hash64("abc"), hash64("abc"));
        assert_ne!(hash64("abc"), hash64("abd"));
    }

    #[test]
    fn renames_gemini_parameters_key() {
        let tool = json!({"name": "search", "parameters": {"type": "object"}});
        let renamed = rename_parameters_to_parameters_json_schema(&tool);
        assert!(renamed.get("parameters").is_none());
        assert_eq!(renamed["parametersJsonSchema"]["type"], "object");
    }
}
