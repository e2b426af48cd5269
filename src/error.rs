//! Error types for AgentMesh
//!
//! This module defines all error types used throughout the AgentMesh engine.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Structured provider error classification.
///
/// Providers that know the HTTP status of a failure report it through this
/// type so the [`LlmClient`](crate::providers::LlmClient) can decide whether
/// another attempt is worth making.
#[derive(Debug)]
pub enum ProviderError {
    /// 401 - Invalid API key or authentication failure
    Auth(String),
    /// 429 - Rate limit or quota exceeded
    RateLimit(String),
    /// 402 - Payment required or billing issue
    Billing(String),
    /// 500/502/503/504 - Server-side errors
    ServerError(String),
    /// 400 - Bad request, invalid JSON, malformed parameters
    InvalidRequest(String),
    /// 404 - Model not found or endpoint not available
    ModelNotFound(String),
    /// Connection or read timeout
    Timeout(String),
    /// Provider is overloaded - retry with backoff
    Overloaded(String),
    /// Request format error (e.g. malformed tool call id) - do not retry
    Format(String),
    /// Catch-all for unrecognized transport errors
    Unknown(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ProviderError::RateLimit(msg) => write!(f, "Rate limit error: {}", msg),
            ProviderError::Billing(msg) => write!(f, "Billing error: {}", msg),
            ProviderError::ServerError(msg) => write!(f, "Server error: {}", msg),
            ProviderError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ProviderError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            ProviderError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ProviderError::Overloaded(msg) => write!(f, "Overloaded error: {}", msg),
            ProviderError::Format(msg) => write!(f, "Format error: {}", msg),
            ProviderError::Unknown(msg) => write!(f, "Unknown provider error: {}", msg),
        }
    }
}

impl ProviderError {
    /// Returns `true` if the same request could succeed on a later attempt.
    ///
    /// Only failures caused by the request itself (credentials, billing,
    /// malformed input, unknown model) are permanent. Anything that looks
    /// like a transport or capacity problem is retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProviderError::Auth(_)
                | ProviderError::Billing(_)
                | ProviderError::InvalidRequest(_)
                | ProviderError::ModelNotFound(_)
                | ProviderError::Format(_)
        )
    }

    /// Returns the HTTP status code associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Auth(_) => Some(401),
            ProviderError::RateLimit(_) => Some(429),
            ProviderError::Billing(_) => Some(402),
            ProviderError::ServerError(_) => Some(500),
            ProviderError::InvalidRequest(_) => Some(400),
            ProviderError::ModelNotFound(_) => Some(404),
            ProviderError::Timeout(_) => None,
            ProviderError::Overloaded(_) => Some(503),
            ProviderError::Format(_) => Some(400),
            ProviderError::Unknown(_) => None,
        }
    }

    /// Map an HTTP status code and body to a classified error.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => ProviderError::Auth(body.to_string()),
            402 => ProviderError::Billing(body.to_string()),
            404 => ProviderError::ModelNotFound(body.to_string()),
            429 => ProviderError::RateLimit(body.to_string()),
            400 => ProviderError::InvalidRequest(body.to_string()),
            503 => ProviderError::Overloaded(body.to_string()),
            500..=599 => ProviderError::ServerError(body.to_string()),
            _ => ProviderError::Unknown(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<ProviderError> for MeshError {
    fn from(err: ProviderError) -> Self {
        MeshError::ProviderTyped(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for AgentMesh operations.
#[derive(Error, Debug)]
pub enum MeshError {
    /// Configuration-related errors (invalid config, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Untyped provider failures (transport errors, unexpected responses)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Structured provider error with classification for retry decisions.
    #[error("Provider error: {0}")]
    ProviderTyped(ProviderError),

    /// The in-flight LLM call was cancelled by a stop/terminate request.
    #[error("LLM call aborted for agent {0}")]
    Aborted(String),

    /// Tool execution errors (invalid parameters, execution failures, etc.)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Conversation bookkeeping errors (missing conversation, persistence failures)
    #[error("Session error: {0}")]
    Session(String),

    /// Resource not found (agents, recipients, conversations)
    #[error("Not found: {0}")]
    NotFound(String),

    /// A compute-status change that the state machine does not allow.
    #[error("Invalid status transition for agent {agent_id}: {from} -> {to}")]
    InvalidTransition {
        agent_id: String,
        from: String,
        to: String,
    },

    /// The agent is being (or has been) terminated.
    #[error("Agent terminated: {0}")]
    AgentTerminated(String),

    /// The scheduler is shutting down and no longer accepts work.
    #[error("Scheduler is shutting down")]
    ShuttingDown,

    /// Message bus channel closed unexpectedly
    #[error("Bus error: channel closed")]
    BusClosed,

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MeshError {
    /// Returns `true` for errors produced by an explicit abort of the LLM call.
    pub fn is_abort(&self) -> bool {
        matches!(self, MeshError::Aborted(_))
    }

    /// Returns `true` if an LLM request failing with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            MeshError::ProviderTyped(pe) => pe.is_retryable(),
            MeshError::Aborted(_)
            | MeshError::Config(_)
            | MeshError::AgentTerminated(_)
            | MeshError::ShuttingDown => false,
            _ => true,
        }
    }
}

/// A specialized `Result` type for AgentMesh operations.
pub type Result<T> = std::result::Result<T, MeshError>;
