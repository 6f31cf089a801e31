//! Stateless HTTP request builder and response classifier for the workflow
//! service.
//!
//! # Design
//! `StoryClient` holds only the target URL. `build_generate_story` produces an
//! `HttpRequest` and `classify` consumes an `HttpResponse`; the orchestrator
//! executes the round-trip in between through a `Transport`. Classification
//! is a pure function of the response, so the same body always lands in the
//! same bucket.

use serde_json::{Map, Value};

use crate::envelope;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::{StoryRequest, WorkflowPayload};

/// How a single response from the workflow service reads.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// The service answered with status >= 400.
    ServiceError { status: u16, body: String },
    /// Status was fine but the body is not a JSON object.
    Unparseable { status: u16, raw: String, error: String },
    /// The workflow produced no content (`control-flow-excluded`).
    Incomplete { envelope: Value },
    /// A usable envelope.
    Complete { status: u16, envelope: Value },
}

/// Synchronous, stateless client for the story workflow endpoint.
#[derive(Debug, Clone)]
pub struct StoryClient {
    url: String,
}

impl StoryClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn build_generate_story(&self, input: &StoryRequest) -> Result<HttpRequest, ApiError> {
        let body = serde_json::to_string(&WorkflowPayload::from(input))
            .map_err(|e| ApiError::Serialization(e.to_string()))?;
        Ok(HttpRequest {
            method: HttpMethod::Post,
            url: self.url.clone(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Some(body),
        })
    }

    pub fn classify(&self, response: &HttpResponse) -> Classified {
        if response.is_error_status() {
            return Classified::ServiceError {
                status: response.status,
                body: response.body_text(),
            };
        }
        // Only an object can carry `output`; arrays and scalars are unparseable.
        let envelope = match serde_json::from_slice::<Map<String, Value>>(&response.body) {
            Ok(map) => Value::Object(map),
            Err(e) => {
                return Classified::Unparseable {
                    status: response.status,
                    raw: response.body_text(),
                    error: e.to_string(),
                }
            }
        };
        if envelope::is_control_flow_excluded(&envelope) {
            return Classified::Incomplete { envelope };
        }
        Classified::Complete {
            status: response.status,
            envelope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> StoryClient {
        StoryClient::new("http://localhost:3000")
    }

    fn request() -> StoryRequest {
        StoryRequest {
            n_chapters: 2,
            story_instructions: "Keep it short".to_string(),
            primary_characters: "Mira".to_string(),
            secondary_characters: "Tov".to_string(),
            l_chapter: 300,
        }
    }

    #[test]
    fn build_generate_story_produces_correct_request() {
        let req = client().build_generate_story(&request()).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "http://localhost:3000");
        assert_eq!(
            req.headers,
            vec![("content-type".to_string(), "application/json".to_string())]
        );
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["n_chapters"], 2);
        assert_eq!(body["primary_characters"], "Mira");
        assert_eq!(body["l_chapter"], 300);
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let client = StoryClient::new("http://rivet.local:3000/");
        assert_eq!(client.url(), "http://rivet.local:3000");
    }

    #[test]
    fn classify_error_status() {
        let classified = client().classify(&HttpResponse::new(503, "overloaded"));
        assert_eq!(
            classified,
            Classified::ServiceError {
                status: 503,
                body: "overloaded".to_string()
            }
        );
    }

    #[test]
    fn classify_error_status_wins_over_valid_json() {
        let classified = client().classify(&HttpResponse::new(400, r#"{"error":"bad graph"}"#));
        assert!(matches!(classified, Classified::ServiceError { status: 400, .. }));
    }

    #[test]
    fn classify_bad_json() {
        match client().classify(&HttpResponse::new(200, "not-json")) {
            Classified::Unparseable { status, raw, error } => {
                assert_eq!(status, 200);
                assert_eq!(raw, "not-json");
                assert!(!error.is_empty());
            }
            other => panic!("expected unparseable, got {other:?}"),
        }
    }

    #[test]
    fn classify_control_flow_excluded() {
        let classified = client().classify(&HttpResponse::new(
            200,
            r#"{"output":{"type":"control-flow-excluded"}}"#,
        ));
        assert!(matches!(classified, Classified::Incomplete { .. }));
    }

    #[test]
    fn classify_complete_keeps_status() {
        let classified =
            client().classify(&HttpResponse::new(201, r#"{"output":{"type":"string","value":"hi"}}"#));
        match classified {
            Classified::Complete { status, envelope } => {
                assert_eq!(status, 201);
                assert_eq!(envelope["output"]["value"], "hi");
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn classify_non_object_json_is_unparseable() {
        for body in ["[1,2]", r#""hello""#, "42", "null"] {
            match client().classify(&HttpResponse::new(200, body)) {
                Classified::Unparseable { raw, error, .. } => {
                    assert_eq!(raw, body);
                    assert!(error.contains("expected a map"), "{body}: {error}");
                }
                other => panic!("{body}: expected unparseable, got {other:?}"),
            }
        }
    }

    #[test]
    fn classify_invalid_utf8_is_unparseable() {
        let response = HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: vec![0xff, 0xfe, b'{'],
        };
        assert!(matches!(client().classify(&response), Classified::Unparseable { .. }));
    }
}
