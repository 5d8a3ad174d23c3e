//! Main client entry point.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;
use tracing::info;

use crate::api::messages::MessagesRequestBuilder;
use crate::convert::model_resolver::resolve_model;
use crate::convert::request::ExtraMeta;
use crate::convert::response::{ParsedResponse, ToolCall};
use crate::error::Result;
use crate::executor::{self, KiroExecutor};
use crate::models::request::MessagesRequest;
use crate::models::response::{MessagesResponse, ResponseContentBlock, StopReason, Usage};
use crate::models::stream::{ContentDelta, MessageDelta, PartialMessage, StreamEvent};
use crate::pool::TokenPool;

/// Kiro API client.
///
/// Provides both an Anthropic Messages API surface and raw Kiro API access.
///
/// # Examples
///
/// ```rust,no_run
/// use kiro_core::{KiroClient, KiroClientBuilder};
///
/// # async fn example() -> kiro_core::Result<()> {
/// let client = KiroClientBuilder::new()
///     .credentials_file("~/.kiro/credentials.json")
///     .build()
///     .await?;
///
/// let response = client.messages()
///     .model("claude-sonnet-4.5")
///     .max_tokens(1024)
///     .user_message("Hello, Claude!")
///     .send()
///     .await?;
///
/// println!("{}", response.text());
/// # Ok(())
/// # }
/// ```
pub struct KiroClient {
    executor: Arc<KiroExecutor>,
    pool: Arc<TokenPool>,
}

impl KiroClient {
    /// Create a builder for configuring the client.
    pub fn builder() -> KiroClientBuilder {
        KiroClientBuilder::new()
    }

    /// Start building a Messages API request.
    pub fn messages(&self) -> MessagesRequestBuilder<'_> {
        MessagesRequestBuilder::new(self)
    }

    /// Send a Messages API request and get a complete response.
    pub async fn send_messages(&self, request: MessagesRequest) -> Result<MessagesResponse> {
        let model_id = resolve_model(&request.model);
        let prompt_tokens = estimate_request_tokens(&request);
        let inbound = serde_json::to_vec(&request)?;

        let parsed = self
            .executor
            .execute(&request.model, &inbound, &ExtraMeta::default())
            .await?;

        Ok(to_messages_response(&parsed, &model_id, prompt_tokens))
    }

    /// Send a Messages API request and get a streaming response.
    ///
    /// Kiro has no true incremental streaming surface, so the request is run
    /// to completion and replayed as a synthetic Anthropic event sequence.
    pub async fn send_messages_stream(
        &self,
        request: MessagesRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>> {
        let model_id = resolve_model(&request.model);
        let model_raw = request.model.clone();
        let prompt_tokens = estimate_request_tokens(&request);
        let inbound = serde_json::to_vec(&request)?;
        let executor = Arc::clone(&self.executor);

        let stream = try_stream! {
            let parsed = executor.execute(&model_raw, &inbound, &ExtraMeta::default()).await?;
            for event in build_stream_events(&parsed, &model_id, prompt_tokens) {
                yield event;
            }
        };

        Ok(Box::pin(stream))
    }

    /// Estimate the prompt token count of a request without sending it.
    pub fn count_tokens(&self, request: &MessagesRequest) -> Result<u32> {
        let inbound = serde_json::to_vec(request)?;
        self.executor
            .count_tokens(&request.model, &inbound, &ExtraMeta::default())
    }

    /// Get a reference to the underlying token pool.
    pub fn pool(&self) -> &TokenPool {
        &self.pool
    }
}

fn estimate_request_tokens(request: &MessagesRequest) -> u32 {
    let text: String = request
        .messages
        .iter()
        .map(|m| m.content.text())
        .collect::<Vec<_>>()
        .join(" ");
    executor::estimate_tokens(&text)
}

fn to_messages_response(parsed: &ParsedResponse, model_id: &str, prompt_tokens: u32) -> MessagesResponse {
    let completion_tokens = executor::estimate_tokens(&parsed.text);
    let mut content = Vec::new();

    let trimmed = parsed.text.trim();
    if !trimmed.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: trimmed.to_string(),
        });
    }
    for call in &parsed.tool_calls {
        content.push(ResponseContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: serde_json::from_str(&call.arguments).unwrap_or(serde_json::json!({})),
        });
    }

    MessagesResponse {
        id: format!("msg_{}", uuid::Uuid::new_v4()),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        stop_reason: Some(stop_reason(parsed)),
        stop_sequence: None,
        model: model_id.to_string(),
        content,
        usage: Usage {
            input_tokens: prompt_tokens,
            output_tokens: completion_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        },
    }
}

fn stop_reason(parsed: &ParsedResponse) -> StopReason {
    if !parsed.tool_calls.is_empty() {
        StopReason::ToolUse
    } else if parsed.text.contains("cut off due to max tokens") {
        StopReason::MaxTokens
    } else {
        StopReason::EndTurn
    }
}

/// Replay a fully-resolved [`ParsedResponse`] as a typed Anthropic event
/// sequence, mirroring the ordering rules `stream_synth` applies to the
/// wire-format variant: tool-use blocks precede a trailing text block.
fn build_stream_events(parsed: &ParsedResponse, model_id: &str, prompt_tokens: u32) -> Vec<StreamEvent> {
    let id = format!("msg_{}", uuid::Uuid::new_v4());
    let completion_tokens = executor::estimate_tokens(&parsed.text);
    let mut events = vec![StreamEvent::MessageStart {
        message: PartialMessage {
            id,
            message_type: "message".to_string(),
            role: "assistant".to_string(),
            model: model_id.to_string(),
            usage: Usage {
                input_tokens: prompt_tokens,
                output_tokens: 0,
                cache_creation_input_tokens: None,
                cache_read_input_tokens: None,
            },
        },
    }];

    for (index, call) in parsed.tool_calls.iter().enumerate() {
        events.push(tool_use_start(index, call));
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::InputJsonDelta {
                partial_json: call.arguments.clone(),
            },
        });
        events.push(StreamEvent::ContentBlockStop { index });
    }

    let trimmed = parsed.text.trim();
    if !trimmed.is_empty() {
        let index = parsed.tool_calls.len();
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::Text {
                text: String::new(),
            },
        });
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta {
                text: trimmed.to_string(),
            },
        });
        events.push(StreamEvent::ContentBlockStop { index });
    }

    events.push(StreamEvent::MessageDelta {
        delta: MessageDelta {
            stop_reason: Some(stop_reason(parsed)),
            stop_sequence: None,
        },
        usage: Some(Usage {
            input_tokens: prompt_tokens,
            output_tokens: completion_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        }),
    });
    events.push(StreamEvent::MessageStop);

    events
}

fn tool_use_start(index: usize, call: &ToolCall) -> StreamEvent {
    StreamEvent::ContentBlockStart {
        index,
        content_block: ResponseContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: serde_json::json!({}),
        },
    }
}

/// Builder for [`KiroClient`].
pub struct KiroClientBuilder {
    credentials_file: Option<String>,
    sqlite_db: Option<String>,
    refresh_token: Option<String>,
    region: Option<String>,
    profile_arn: Option<String>,
    reqwest_client: Option<reqwest::Client>,
}

impl KiroClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            credentials_file: None,
            sqlite_db: None,
            refresh_token: None,
            region: None,
            profile_arn: None,
            reqwest_client: None,
        }
    }

    /// Load credentials from a JSON file.
    pub fn credentials_file(mut self, path: impl Into<String>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    /// Load credentials from a SQLite database.
    pub fn sqlite_db(mut self, path: impl Into<String>) -> Self {
        self.sqlite_db = Some(path.into());
        self
    }

    /// Set a refresh token directly.
    pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    /// Set the AWS region.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the profile ARN.
    pub fn profile_arn(mut self, arn: impl Into<String>) -> Self {
        self.profile_arn = Some(arn.into());
        self
    }

    /// Set a custom reqwest client, shared by the pool and the executor.
    pub fn reqwest_client(mut self, client: reqwest::Client) -> Self {
        self.reqwest_client = Some(client);
        self
    }

    /// Build the client, loading credentials into a single-entry token pool.
    pub async fn build(self) -> Result<KiroClient> {
        let token_info = self.load_credentials()?;

        let mut pool = TokenPool::new();
        if let Some(client) = &self.reqwest_client {
            pool = pool.with_client(client.clone());
        }
        pool.add_token(token_info, None).await;
        let pool = Arc::new(pool);

        let mut executor = KiroExecutor::new(Arc::clone(&pool));
        if let Some(client) = self.reqwest_client {
            executor = executor.with_client(client);
        }

        info!("KiroClient initialized");
        Ok(KiroClient {
            executor: Arc::new(executor),
            pool,
        })
    }

    fn load_credentials(&self) -> Result<crate::models::auth::KiroTokenInfo> {
        // Priority: SQLite > JSON file > env > direct refresh token

        // 1. SQLite database
        if let Some(db_path) = &self.sqlite_db {
            let mut token = crate::auth::credentials::load_from_sqlite(db_path)?;
            self.apply_overrides(&mut token);
            return Ok(token);
        }

        // 2. JSON credentials file
        if let Some(file_path) = &self.credentials_file {
            let mut token = crate::auth::credentials::load_from_json_file(file_path)?;
            self.apply_overrides(&mut token);
            return Ok(token);
        }

        // 3. Environment variables
        if let Some(mut token) = crate::auth::credentials::load_from_env() {
            self.apply_overrides(&mut token);
            return Ok(token);
        }

        // 4. Direct refresh token
        if let Some(refresh_token) = &self.refresh_token {
            let mut token = crate::models::auth::KiroTokenInfo::new(refresh_token.clone());
            self.apply_overrides(&mut token);
            token.detect_auth_type();
            return Ok(token);
        }

        // 5. Default SQLite path
        let default_sqlite = "~/.local/share/kiro-cli/data.sqlite3";
        if let Ok(mut token) = crate::auth::credentials::load_from_sqlite(default_sqlite) {
            self.apply_overrides(&mut token);
            return Ok(token);
        }

        Err(crate::error::Error::NotAuthenticated)
    }

    fn apply_overrides(&self, token: &mut crate::models::auth::KiroTokenInfo) {
        if let Some(region) = &self.region {
            token.region = region.clone();
        }
        if let Some(arn) = &self.profile_arn {
            token.profile_arn = Some(arn.clone());
        }
    }
}

impl Default for KiroClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
