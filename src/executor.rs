//! Ties dialect detection, request translation, the token pool, and
//! response parsing into one request lifecycle: build, send, retry,
//! rotate, rebuild-on-rejection.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::constants;
use crate::config;
use crate::convert::request::{self, ExtraMeta};
use crate::convert::response::{self, ParsedResponse};
use crate::dialect;
use crate::error::{Error, Result};
use crate::pool::{TokenHandle, TokenPool};
use crate::stream_synth;
use crate::transport::headers;

/// Number of times a 401/403 is allowed to trigger a token rotation before
/// giving up, separate from the 429/5xx backoff budget.
const MAX_AUTH_ROTATIONS: u32 = 2;

enum SendOutcome {
    Ok(Vec<u8>),
    BadRequest(String),
    Status(u16, String),
    Network(Error),
}

/// Drives one inbound request through the full Kiro round trip.
pub struct KiroExecutor {
    pool: Arc<TokenPool>,
    client: reqwest::Client,
    fingerprint: String,
}

impl KiroExecutor {
    pub fn new(pool: Arc<TokenPool>) -> Self {
        Self {
            pool,
            client: reqwest::Client::new(),
            fingerprint: constants::machine_fingerprint(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Translate, send, and parse one inbound request end to end.
    pub async fn execute(&self, model: &str, inbound: &[u8], extra_meta: &ExtraMeta) -> Result<ParsedResponse> {
        let (canonical, _dialect) = dialect::parse_inbound(inbound)?;

        let mut token = self.pool.acquire().await?;
        let mut auth_rotations = 0u32;
        let mut delay = config::BACKOFF_BASE_DELAY;

        for attempt in 0..config::BACKOFF_MAX_ATTEMPTS + MAX_AUTH_ROTATIONS {
            let primary = request::build_kiro_value(model, &canonical, &token, extra_meta)?;
            let url = config::generate_assistant_response_url(&token.region, token.profile_arn.as_deref());

            match self.send_once(&url, &primary, &token).await {
                SendOutcome::Ok(bytes) => {
                    self.pool.report_success(&token.id).await;
                    return Ok(response::parse_response(&bytes));
                }
                SendOutcome::BadRequest(body) if body.contains("Improperly formed request") => {
                    return self.retry_with_rebuild(&url, &primary, &token).await;
                }
                SendOutcome::BadRequest(body) => {
                    return Err(Error::Api {
                        status: 400,
                        message: body,
                    });
                }
                SendOutcome::Status(status @ (401 | 403), message) => {
                    self.pool
                        .report_failure(&token.id, &Error::Api { status, message })
                        .await;
                    auth_rotations += 1;
                    if auth_rotations > MAX_AUTH_ROTATIONS {
                        return Err(Error::Api {
                            status,
                            message: "authentication failed after token rotation".to_string(),
                        });
                    }
                    token = self.pool.acquire().await?;
                }
                SendOutcome::Status(status, message) if status == 429 || (500..=599).contains(&status) => {
                    let err = Error::Api { status, message };
                    self.pool.report_failure(&token.id, &err).await;
                    if attempt + 1 >= config::BACKOFF_MAX_ATTEMPTS + MAX_AUTH_ROTATIONS {
                        return Err(err);
                    }
                    warn!(status, delay_ms = delay.as_millis(), "backing off before retry");
                    tokio::time::sleep(delay).await;
                    delay = (delay * config::BACKOFF_FACTOR).min(config::BACKOFF_CAP);
                    token = self.pool.acquire().await?;
                }
                SendOutcome::Status(status, message) => {
                    return Err(Error::Api { status, message });
                }
                SendOutcome::Network(err) => {
                    if attempt + 1 >= config::BACKOFF_MAX_ATTEMPTS + MAX_AUTH_ROTATIONS {
                        return Err(err);
                    }
                    tokio::time::sleep(delay).await;
                    delay = (delay * config::BACKOFF_FACTOR).min(config::BACKOFF_CAP);
                }
            }
        }

        Err(Error::RetriesExhausted {
            attempts: config::BACKOFF_MAX_ATTEMPTS + MAX_AUTH_ROTATIONS,
            message: "request failed after retries and token rotation".to_string(),
        })
    }

    /// Run [`execute`] to completion, then replay the result as a
    /// synthetic Anthropic SSE stream, feeding each frame to `sink` in
    /// order.
    pub async fn stream<F: FnMut(String)>(
        &self,
        model: &str,
        inbound: &[u8],
        extra_meta: &ExtraMeta,
        id: &str,
        prompt_tokens: u32,
        mut sink: F,
    ) -> Result<()> {
        let parsed = self.execute(model, inbound, extra_meta).await?;
        let completion_tokens = estimate_tokens(&parsed.text);
        let frames = stream_synth::build_anthropic_sse(
            id,
            model,
            &parsed.text,
            &parsed.tool_calls,
            prompt_tokens,
            completion_tokens,
        );
        for frame in frames {
            sink(frame);
        }
        Ok(())
    }

    /// Estimate prompt tokens for an inbound request without sending it.
    pub fn count_tokens(&self, model: &str, inbound: &[u8], extra_meta: &ExtraMeta) -> Result<u32> {
        let (canonical, _dialect) = dialect::parse_inbound(inbound)?;
        let placeholder = TokenHandle {
            id: "estimate".to_string(),
            access_token: String::new(),
            profile_arn: None,
            auth_method: crate::pool::AuthMethod::ApiKey,
            region: config::DEFAULT_REGION.to_string(),
        };
        let payload = request::build_kiro_value(model, &canonical, &placeholder, extra_meta)?;
        Ok(estimate_tokens_in_value(&payload))
    }

    async fn send_once(&self, url: &str, body: &Value, token: &TokenHandle) -> SendOutcome {
        let hdrs = headers::kiro_api_headers(&token.access_token, &self.fingerprint);
        let result = self
            .client
            .post(url)
            .headers(hdrs)
            .json(body)
            .timeout(config::EXECUTOR_HTTP_TIMEOUT)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                return SendOutcome::Network(if e.is_timeout() {
                    Error::Timeout
                } else {
                    Error::Network(e)
                });
            }
        };

        let status = response.status().as_u16();
        if response.status().is_success() {
            return match response.bytes().await {
                Ok(bytes) => SendOutcome::Ok(bytes.to_vec()),
                Err(e) => SendOutcome::Network(Error::Network(e)),
            };
        }

        let text = response.text().await.unwrap_or_default();
        debug!(status, "Kiro request rejected");
        if status == 400 {
            SendOutcome::BadRequest(text)
        } else {
            SendOutcome::Status(status, text)
        }
    }

    async fn retry_with_rebuild(&self, url: &str, primary: &Value, token: &TokenHandle) -> Result<ParsedResponse> {
        let flattened = request::flatten_rebuild(primary);
        if let SendOutcome::Ok(bytes) = self.send_once(url, &flattened, token).await {
            self.pool.report_success(&token.id).await;
            return Ok(response::parse_response(&bytes));
        }

        let minimal = request::minimal_rebuild(primary);
        match self.send_once(url, &minimal, token).await {
            SendOutcome::Ok(bytes) => {
                self.pool.report_success(&token.id).await;
                Ok(response::parse_response(&bytes))
            }
            SendOutcome::BadRequest(body) | SendOutcome::Status(_, body) => Err(Error::Api {
                status: 400,
                message: body,
            }),
            SendOutcome::Network(err) => Err(err),
        }
    }
}

/// Chars/3.5 token estimator applied to final content, history, tool
/// descriptions, and system prompt, as assembled in the Kiro payload.
fn estimate_tokens_in_value(payload: &Value) -> u32 {
    let mut chars = 0usize;
    collect_chars(payload, &mut chars);
    ((chars as f64) / 3.5).ceil() as u32
}

fn collect_chars(value: &Value, chars: &mut usize) {
    match value {
        Value::String(s) => *chars += s.chars().count(),
        Value::Array(items) => items.iter().for_each(|v| collect_chars(v, chars)),
        Value::Object(map) => map.values().for_each(|v| collect_chars(v, chars)),
        _ => {}
    }
}

pub(crate) fn estimate_tokens(text: &str) -> u32 {
    ((text.chars().count() as f64) / 3.5).ceil() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_in_value_sums_all_strings() {
        let payload = serde_json::json!({
            "a": "hello",
            "b": {"c": "world!"},
            "d": ["x", "yz"]
        });
        let estimated = estimate_tokens_in_value(&payload);
        assert!(estimated > 0);
    }

    #[test]
    fn estimate_tokens_scales_with_text_length() {
        assert!(estimate_tokens("a long piece of text") > estimate_tokens("short"));
    }
}
