//! Attempt records and the terminal result of an orchestration run.
//!
//! # Design
//! Every run ends in exactly one `Outcome`. The HTTP status, the `status` tag
//! and the JSON body handed back to callers are all derived from it here, so
//! the handler only has to forward them.
//!
//! Exhausted service errors map to 502 while exhausted parse failures and
//! `control-flow-excluded` keep a success-class status: the first means the
//! workflow service failed, the other two mean it answered without usable
//! content.

use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::cancel::CancelReason;
use crate::envelope::Unwrapped;

/// What happened on a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    TransportFailed(String),
    ReadFailed(String),
    ServiceError { status: u16 },
    ParseFailed(String),
    ControlFlowExcluded,
    Complete,
    /// Cancelled while the request was in flight; its reply, if any, is dropped.
    Abandoned,
}

impl AttemptOutcome {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AttemptOutcome::Complete | AttemptOutcome::Abandoned)
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::TransportFailed(_) => "transport_error",
            AttemptOutcome::ReadFailed(_) => "read_error",
            AttemptOutcome::ServiceError { .. } => "service_error",
            AttemptOutcome::ParseFailed(_) => "parse_error",
            AttemptOutcome::ControlFlowExcluded => "control_flow_excluded",
            AttemptOutcome::Complete => "complete",
            AttemptOutcome::Abandoned => "abandoned",
        }
    }
}

/// One pass through the retry loop.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub number: u32,
    pub outcome: AttemptOutcome,
    pub status: Option<u16>,
    pub elapsed: Duration,
    pub raw_body: Option<Vec<u8>>,
    pub envelope: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    Transport { detail: String },
    Read { detail: String },
    TargetStatus {
        status: u16,
        body: String,
        target_url: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        http_status: u16,
        story: Unwrapped,
        envelope: Value,
    },
    /// The service answered but the body was never valid JSON.
    SuccessDegraded {
        http_status: u16,
        raw_response: String,
        parse_error: String,
    },
    /// Still `control-flow-excluded` after the last attempt.
    SoftIncomplete { envelope: Value },
    Failure(Failure),
    Cancelled(CancelReason),
    /// Loop ran out without a terminal outcome. Unreachable with the shipped
    /// policies.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    pub outcome: Outcome,
    pub attempts: u32,
    pub attempt_log: Vec<Attempt>,
    pub last_envelope: Option<Value>,
}

const CONTROL_FLOW_INFO: &str = "The workflow returned control-flow-excluded. \
     This might indicate a configuration issue with the flow.";
const RAW_TEXT_NOTE: &str = "Story content returned as raw text (JSON parse failed)";

impl OrchestrationResult {
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::Success { .. } | Outcome::SuccessDegraded { .. }
        )
    }

    /// Status code to answer the inbound request with.
    pub fn http_status(&self) -> u16 {
        match &self.outcome {
            Outcome::Success { http_status, .. } | Outcome::SuccessDegraded { http_status, .. } => {
                *http_status
            }
            Outcome::SoftIncomplete { .. } | Outcome::Exhausted => 200,
            Outcome::Failure(Failure::TargetStatus { .. }) => 502,
            Outcome::Failure(_) => 500,
            Outcome::Cancelled(_) => 504,
        }
    }

    pub fn status_tag(&self) -> &'static str {
        match &self.outcome {
            Outcome::Success { .. } | Outcome::SuccessDegraded { .. } => "success",
            Outcome::SoftIncomplete { .. } => "control_flow_excluded",
            Outcome::Failure(_) => "error",
            Outcome::Cancelled(_) => "cancelled",
            Outcome::Exhausted => "completed_with_retries",
        }
    }

    pub fn message(&self) -> &'static str {
        match &self.outcome {
            Outcome::Success { .. } => "Story generation completed successfully",
            Outcome::SuccessDegraded { .. } => {
                "Story generation completed but response parsing failed"
            }
            Outcome::SoftIncomplete { .. } => {
                "Story generation completed but returned control-flow-excluded after all retries"
            }
            Outcome::Failure(Failure::Transport { .. }) => {
                "Failed to make request to story API after all retries"
            }
            Outcome::Failure(Failure::Read { .. }) => {
                "Failed to read response from story API after all retries"
            }
            Outcome::Failure(Failure::TargetStatus { .. }) => {
                "Target API returned an error after all retries"
            }
            Outcome::Cancelled(_) => "Story generation was cancelled before completion",
            Outcome::Exhausted => "Story generation completed after retries",
        }
    }

    /// JSON body for the inbound response. Always carries `status`,
    /// `message` and `attempts`.
    pub fn to_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("message".into(), json!(self.message()));
        body.insert("status".into(), json!(self.status_tag()));
        body.insert("attempts".into(), json!(self.attempts));

        match &self.outcome {
            Outcome::Success {
                story, envelope, ..
            } => match story {
                Unwrapped::Structured(story) => {
                    body.insert("story".into(), story.clone());
                    body.insert("raw_data".into(), envelope.clone());
                }
                Unwrapped::RawText { text, parse_error } => {
                    body.insert("story_text".into(), json!(text));
                    body.insert("data".into(), envelope.clone());
                    body.insert("parse_note".into(), json!(RAW_TEXT_NOTE));
                    body.insert("parse_error".into(), json!(parse_error));
                }
                Unwrapped::Passthrough => {
                    body.insert("data".into(), envelope.clone());
                }
            },
            Outcome::SuccessDegraded {
                raw_response,
                parse_error,
                ..
            } => {
                body.insert("raw_response".into(), json!(raw_response));
                body.insert("parse_error".into(), json!(parse_error));
            }
            Outcome::SoftIncomplete { envelope } => {
                body.insert("data".into(), envelope.clone());
                body.insert("info".into(), json!(CONTROL_FLOW_INFO));
            }
            Outcome::Failure(failure) => {
                body.insert("error".into(), json!(self.message()));
                match failure {
                    Failure::Transport { detail } | Failure::Read { detail } => {
                        body.insert("detail".into(), json!(detail));
                    }
                    Failure::TargetStatus {
                        status,
                        body: target_body,
                        target_url,
                    } => {
                        body.insert("target_status".into(), json!(status));
                        body.insert("body".into(), json!(target_body));
                        body.insert("target_url".into(), json!(target_url));
                    }
                }
            }
            Outcome::Cancelled(reason) => {
                body.insert("error".into(), json!(reason.to_string()));
            }
            Outcome::Exhausted => {
                body.insert(
                    "data".into(),
                    self.last_envelope.clone().unwrap_or(Value::Null),
                );
            }
        }
        Value::Object(body)
    }
}
