//! Reading the workflow service's response envelope.
//!
//! The service replies with `{"output": {"type": ..., "value": ...}, ...}`.
//! When `type` is `"string"`, `value` usually carries the story as a JSON
//! document encoded into a string. All knowledge of that double encoding lives
//! in [`unwrap_envelope`].

use serde_json::Value;

/// `output.type` emitted when the workflow engine skipped the branch that
/// produces content.
pub const CONTROL_FLOW_EXCLUDED: &str = "control-flow-excluded";

/// `output.type` for a string-valued output.
pub const STRING_OUTPUT: &str = "string";

/// What the envelope yielded once the nested value was looked at.
#[derive(Debug, Clone, PartialEq)]
pub enum Unwrapped {
    /// `output.value` held valid JSON.
    Structured(Value),
    /// `output.value` was a string but not JSON; kept verbatim.
    RawText { text: String, parse_error: String },
    /// No string output to unwrap; the envelope is the payload.
    Passthrough,
}

/// `output.type` as a string, if present.
pub fn output_type(envelope: &Value) -> Option<&str> {
    envelope.get("output")?.get("type")?.as_str()
}

pub fn is_control_flow_excluded(envelope: &Value) -> bool {
    output_type(envelope) == Some(CONTROL_FLOW_EXCLUDED)
}

/// Decode the story carried inside an envelope.
///
/// Never fails: a nested value that is not JSON comes back as
/// [`Unwrapped::RawText`].
pub fn unwrap_envelope(envelope: &Value) -> Unwrapped {
    if output_type(envelope) != Some(STRING_OUTPUT) {
        return Unwrapped::Passthrough;
    }
    let Some(text) = envelope.pointer("/output/value").and_then(Value::as_str) else {
        return Unwrapped::Passthrough;
    };
    match serde_json::from_str::<Value>(text) {
        Ok(story) => Unwrapped::Structured(story),
        Err(e) => Unwrapped::RawText {
            text: text.to_string(),
            parse_error: e.to_string(),
        },
    }
}
