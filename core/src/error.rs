//! Error types for the story workflow client.
//!
//! # Design
//! Only request encoding surfaces to callers as an `Err`. Everything that can
//! go wrong on the wire is a `TransportError`, which the orchestrator absorbs
//! into an `OrchestrationResult` instead of propagating.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by `StoryClient` build methods.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Failures raised by a `Transport` before a complete response is in hand.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused, DNS failure, TLS failure and the like.
    #[error("request failed: {0}")]
    Connect(String),

    /// The round-trip exceeded the per-attempt timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Headers arrived but the body could not be read.
    #[error("reading response body failed: {0}")]
    Read(String),
}

impl TransportError {
    pub fn is_read(&self) -> bool {
        matches!(self, TransportError::Read(_))
    }
}

/// The only hard error `WorkflowOrchestrator::generate` returns.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("failed to prepare request: {0}")]
    Encode(#[from] ApiError),
}
