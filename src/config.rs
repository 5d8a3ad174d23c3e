//! Configuration constants and URL templates for the Kiro API.

use std::time::Duration;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Token refresh threshold - refresh when token expires within this window.
pub const TOKEN_REFRESH_THRESHOLD: Duration = Duration::from_secs(600); // 10 minutes

/// Token expiry skew window - refresh a pooled token if it expires within this window.
pub const TOKEN_SKEW_WINDOW: Duration = Duration::from_secs(60);

/// Consecutive-failure threshold before a pooled token is skipped by failover.
pub const TOKEN_UNHEALTHY_THRESHOLD: u32 = 3;

/// Cooldown applied to a token record after a hard failure.
pub const TOKEN_FAILURE_COOLDOWN: Duration = Duration::from_secs(30);

/// Base delay for the executor's jittered backoff on 429/5xx (§5).
pub const BACKOFF_BASE_DELAY: Duration = Duration::from_millis(250);

/// Multiplicative factor applied per backoff attempt.
pub const BACKOFF_FACTOR: u32 = 2;

/// Hard cap on a single backoff delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(4);

/// Maximum executor attempts for the 429/5xx backoff-and-rotate loop.
pub const BACKOFF_MAX_ATTEMPTS: u32 = 3;

/// Per-HTTP-call timeout used by the executor.
pub const EXECUTOR_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-refresh timeout used by the token pool.
pub const EXECUTOR_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum clamped tool/description length in Unicode code points (§4.2).
pub const MAX_CLAMPED_DESCRIPTION_CODEPOINTS: usize = 256;

/// Closed inbound-model → Kiro `modelId` mapping table (§9 of SPEC_FULL.md).
///
/// Unknown inbound models fall back to the `claude-sonnet-4-5` entry.
pub const MODEL_MAPPING: &[(&str, &str)] = &[
    ("claude-sonnet-4-5", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("claude-sonnet-4-5-20250929", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("claude-sonnet-4-20250514", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("claude-3-7-sonnet-20250219", "CLAUDE_3_7_SONNET_20250219_V1_0"),
];

/// Default Kiro `modelId` used when an inbound model has no mapping table entry.
pub const DEFAULT_MODEL_ID: &str = "CLAUDE_SONNET_4_5_20250929_V1_0";

/// Kiro Desktop Auth refresh URL template.
/// `{region}` is replaced at runtime.
pub const KIRO_REFRESH_URL_TEMPLATE: &str =
    "https://prod.{region}.auth.desktop.kiro.dev/refreshToken";

/// AWS SSO OIDC token URL template.
pub const AWS_SSO_OIDC_URL_TEMPLATE: &str = "https://oidc.{region}.amazonaws.com/token";

/// Kiro API host template (generateAssistantResponse, ListAvailableModels).
pub const KIRO_API_HOST_TEMPLATE: &str = "https://q.{region}.amazonaws.com";

/// Kiro API origin query param.
pub const API_ORIGIN: &str = "AI_EDITOR";

/// Returns the Kiro Desktop Auth refresh URL for the given region.
pub fn kiro_refresh_url(region: &str) -> String {
    KIRO_REFRESH_URL_TEMPLATE.replace("{region}", region)
}

/// Returns the AWS SSO OIDC token URL for the given region.
pub fn aws_sso_oidc_url(region: &str) -> String {
    AWS_SSO_OIDC_URL_TEMPLATE.replace("{region}", region)
}

/// Returns the Kiro API host for the given region.
pub fn kiro_api_host(region: &str) -> String {
    KIRO_API_HOST_TEMPLATE.replace("{region}", region)
}

/// Returns the generateAssistantResponse URL for the given region.
pub fn generate_assistant_response_url(region: &str, profile_arn: Option<&str>) -> String {
    let host = kiro_api_host(region);
    match profile_arn {
        Some(arn) => format!(
            "{}/generateAssistantResponse?origin={}&profileArn={}",
            host, API_ORIGIN, arn
        ),
        None => format!("{}/generateAssistantResponse?origin={}", host, API_ORIGIN),
    }
}

