//! Model name normalization and resolution against the closed Kiro model
//! mapping table.
//!
//! Examples:
//! - "claude-sonnet-4-5" -> "CLAUDE_SONNET_4_5_20250929_V1_0"
//! - "claude-sonnet-4-5-20250514" -> normalized to "claude-sonnet-4.5", no
//!   table match, falls back to the default mapping.
//! - "amazonq-CLAUDE_SONNET_4_5_20250929_V1_0" -> passthrough of the
//!   embedded Kiro model id.

use tracing::debug;

use crate::config::{DEFAULT_MODEL_ID, MODEL_MAPPING};

/// Normalize a model name by applying Kiro's naming rules.
///
/// 1. Strip date suffixes (e.g., `-20250514`).
/// 2. Strip version suffixes (e.g., `-v2`).
/// 3. Replace a dash between adjacent single digits with a dot (`4-5` ->
///    `4.5`).
pub fn normalize_model_name(name: &str) -> String {
    let mut result = name.to_string();

    let re_date = regex_lite::Regex::new(r"-\d{8}$").unwrap();
    result = re_date.replace(&result, "").to_string();

    let re_vsuffix = regex_lite::Regex::new(r"-v\d+$").unwrap();
    result = re_vsuffix.replace(&result, "").to_string();

    let re_version_dash = regex_lite::Regex::new(r"(\d)-(\d)").unwrap();
    result = re_version_dash.replace_all(&result, "${1}.${2}").to_string();

    result
}

/// Resolve an inbound model name to a Kiro `modelId` using the closed
/// mapping table. Unknown models fall back to [`DEFAULT_MODEL_ID`].
pub fn resolve_model(name: &str) -> &'static str {
    if let Some(rest) = name.strip_prefix("amazonq-") {
        let upper = rest.to_uppercase();
        if let Some((_, id)) = MODEL_MAPPING.iter().find(|(_, kiro_id)| *kiro_id == upper) {
            debug!(name, resolved = *id, "amazonq-prefixed model matched");
            return id;
        }
        return resolve_model(rest);
    }

    if let Some((_, id)) = MODEL_MAPPING.iter().find(|(key, _)| *key == name) {
        debug!(name, resolved = *id, "Model matched directly");
        return id;
    }

    let normalized = normalize_model_name(name);
    if let Some((_, id)) = MODEL_MAPPING.iter().find(|(key, _)| *key == normalized) {
        debug!(name, normalized, resolved = *id, "Model matched after normalization");
        return id;
    }

    debug!(name, resolved = DEFAULT_MODEL_ID, "Model fell back to default");
    DEFAULT_MODEL_ID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_version_dash() {
        assert_eq!(normalize_model_name("claude-sonnet-4-5"), "claude-sonnet-4.5");
    }

    #[test]
    fn test_normalize_strip_date() {
        assert_eq!(
            normalize_model_name("claude-sonnet-4-5-20250514"),
            "claude-sonnet-4.5"
        );
    }

    #[test]
    fn test_normalize_strip_version_suffix() {
        assert_eq!(
            normalize_model_name("claude-3-5-sonnet-v2"),
            "claude-3.5-sonnet"
        );
    }

    #[test]
    fn resolves_known_models_directly() {
        assert_eq!(resolve_model("claude-sonnet-4-5"), "CLAUDE_SONNET_4_5_20250929_V1_0");
        assert_eq!(
            resolve_model("claude-3-7-sonnet-20250219"),
            "CLAUDE_3_7_SONNET_20250219_V1_0"
        );
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        assert_eq!(resolve_model("totally-unknown-model"), DEFAULT_MODEL_ID);
    }

    #[test]
    fn amazonq_prefixed_model_resolves_embedded_id() {
        assert_eq!(
            resolve_model("amazonq-CLAUDE_SONNET_4_5_20250929_V1_0"),
            "CLAUDE_SONNET_4_5_20250929_V1_0"
        );
    }
}
