//! Request DTOs for the story generation endpoint.
//!
//! # Design
//! `StoryRequest` is what callers post to the proxy. `WorkflowPayload` is what
//! the proxy posts to the workflow service. The two currently share field
//! names, but they are kept apart so a rename on the workflow side only touches
//! the `From` impl below.

use serde::{Deserialize, Serialize};

/// Parameters for a single story generation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoryRequest {
    pub n_chapters: i64,
    pub story_instructions: String,
    pub primary_characters: String,
    pub secondary_characters: String,
    pub l_chapter: i64,
}

/// Outbound body sent to the workflow service.
#[derive(Debug, Serialize)]
pub struct WorkflowPayload<'a> {
    pub n_chapters: i64,
    pub story_instructions: &'a str,
    pub primary_characters: &'a str,
    pub secondary_characters: &'a str,
    pub l_chapter: i64,
}

impl<'a> From<&'a StoryRequest> for WorkflowPayload<'a> {
    fn from(request: &'a StoryRequest) -> Self {
        Self {
            n_chapters: request.n_chapters,
            story_instructions: &request.story_instructions,
            primary_characters: &request.primary_characters,
            secondary_characters: &request.secondary_characters,
            l_chapter: request.l_chapter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn story_request_rejects_missing_fields() {
        let result: Result<StoryRequest, _> =
            serde_json::from_str(r#"{"n_chapters":3,"story_instructions":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn payload_uses_workflow_field_names() {
        let request = StoryRequest {
            n_chapters: 4,
            story_instructions: "A heist on the moon".to_string(),
            primary_characters: "Ada".to_string(),
            secondary_characters: "Bob, Cleo".to_string(),
            l_chapter: 800,
        };
        let json = serde_json::to_value(WorkflowPayload::from(&request)).unwrap();
        assert_eq!(json["n_chapters"], 4);
        assert_eq!(json["story_instructions"], "A heist on the moon");
        assert_eq!(json["primary_characters"], "Ada");
        assert_eq!(json["secondary_characters"], "Bob, Cleo");
        assert_eq!(json["l_chapter"], 800);
        assert_eq!(json.as_object().unwrap().len(), 5);
    }
}
