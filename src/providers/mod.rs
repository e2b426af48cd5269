//! Providers module - LLM providers and the retrying client
//!
//! This module defines the `LLMProvider` trait and common types for talking
//! to a chat-completion backend, the [`LlmClient`] that adds retries, backoff,
//! metrics and per-agent abort on top of any provider, and a
//! [`ScriptedProvider`] that replays canned answers for scenarios and tests.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use agentmesh::providers::{LlmClient, ScriptStep, ScriptedProvider};
//!
//! # tokio_test::block_on(async {
//! let provider = ScriptedProvider::new()
//!     .with_script("writer", vec![ScriptStep::text("Hello!")]);
//! let client = LlmClient::new(Arc::new(provider));
//!
//! let response = client.chat("writer", vec![], vec![]).await.unwrap();
//! assert_eq!(response.content, "Hello!");
//! # });
//! ```

pub mod retry;
pub mod scripted;
mod types;

pub use retry::{compute_delay, LlmClient};
pub use scripted::{ScriptStep, ScriptedProvider, ScriptedToolCall};
pub use types::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage};
