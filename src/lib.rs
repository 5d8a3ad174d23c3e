//! # kiro-core
//!
//! Kiro provider translation and execution core for a multi-upstream LLM
//! proxy: inbound dialect detection (Anthropic, OpenAI chat, OpenAI
//! Responses, Gemini), request/response translation to and from Kiro's
//! wire format, a round-robin multi-token pool with refresh and failover,
//! and the retry/backoff executor that ties them together.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kiro_core::{KiroClient, KiroClientBuilder, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Build client from credentials file
//!     let client = KiroClientBuilder::new()
//!         .credentials_file("~/.kiro/credentials.json")
//!         .build()
//!         .await?;
//!
//!     // Send a message using the Anthropic Messages API
//!     let response = client.messages()
//!         .model("claude-sonnet-4.5")
//!         .max_tokens(1024)
//!         .user_message("Hello, Claude!")
//!         .send()
//!         .await?;
//!
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `sqlite` - Enable loading credentials from kiro-cli SQLite database
//! - `keyring` - Enable system keyring token storage
//! - `full` - Enable all optional features

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod convert;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod models;
pub mod pool;
pub mod sanitize;
pub mod storage;
pub mod stream_synth;
pub mod transport;

// Re-exports for ergonomic usage
pub use client::{KiroClient, KiroClientBuilder};
pub use error::{Error, Result};
pub use executor::KiroExecutor;
pub use models::request::{
    ContentBlock, Message, MessageContent, MessagesRequest, Role, SystemPrompt, ThinkingConfig,
    Tool, ToolChoice,
};
pub use models::response::{MessagesResponse, ResponseContentBlock, StopReason, Usage};
pub use models::stream::{ContentDelta, MessageDelta, StreamEvent};
pub use pool::{TokenHandle, TokenPool};
pub use storage::TokenStorage;
