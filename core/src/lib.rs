//! Synchronous client core for the story workflow service.
//!
//! # Overview
//! Forwards a story generation request to an external AI workflow service,
//! retries on transient or content-less replies, and unwraps the service's
//! double-encoded response into a stable result.
//!
//! # Design
//! - `StoryClient` is stateless: `build_*` produces an `HttpRequest`,
//!   `classify` reads an `HttpResponse`. No I/O.
//! - `Transport` executes requests; `UreqTransport` is the blocking default.
//! - `WorkflowOrchestrator` owns the retry loop and always returns one
//!   `OrchestrationResult`, except for requests that cannot be encoded.
//! - `RetryPolicy` and `CancelToken` bound how long a run may take.

pub mod cancel;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod result;
pub mod retry;
pub mod transport;
pub mod types;

pub use cancel::{CancelReason, CancelToken, DropGuard};
pub use client::{Classified, StoryClient};
pub use crate::config::StoryConfig;
pub use envelope::{unwrap_envelope, Unwrapped};
pub use error::{ApiError, OrchestrationError, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use orchestrator::WorkflowOrchestrator;
pub use result::{Attempt, AttemptOutcome, Failure, OrchestrationResult, Outcome};
pub use retry::{ExponentialBackoff, FixedBackoff, RetryPolicy};
pub use transport::{Transport, UreqTransport};
pub use types::{StoryRequest, WorkflowPayload};
