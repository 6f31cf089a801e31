//! The retry loop around the workflow service.
//!
//! # Design
//! `generate` builds the request once, then runs up to
//! `RetryPolicy::max_attempts` attempts. Each attempt is classified into an
//! `AttemptOutcome` together with the `Outcome` the run would end with if no
//! further attempt is made. The policy decides whether to retry; when it says
//! no, that candidate outcome becomes the result. Cancellation is checked
//! before and after every attempt, abandons a request still in flight, and
//! interrupts backoff waits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::cancel::{CancelReason, CancelToken};
use crate::client::{Classified, StoryClient};
use crate::config::StoryConfig;
use crate::envelope::{self, Unwrapped};
use crate::error::{OrchestrationError, TransportError};
use crate::http::{HttpRequest, HttpResponse};
use crate::result::{Attempt, AttemptOutcome, Failure, OrchestrationResult, Outcome};
use crate::retry::{FixedBackoff, RetryPolicy};
use crate::transport::Transport;
use crate::types::StoryRequest;

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Bodies longer than this are cut in attempt logs.
const LOG_BODY_LIMIT: usize = 512;

/// Drives story generation against the workflow service.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    client: StoryClient,
    transport: Arc<dyn Transport>,
    policy: Arc<dyn RetryPolicy>,
    attempt_timeout: Duration,
}

impl std::fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("target_url", &self.client.url())
            .field("policy", &self.policy)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

/// Candidate result of one attempt.
struct AttemptReport {
    outcome: AttemptOutcome,
    terminal: Outcome,
    status: Option<u16>,
    raw_body: Option<Vec<u8>>,
    envelope: Option<Value>,
}

impl WorkflowOrchestrator {
    pub fn new(target_url: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            client: StoryClient::new(target_url),
            transport,
            policy: Arc::new(FixedBackoff::default()),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn from_config(config: &StoryConfig, transport: Arc<dyn Transport>) -> Self {
        Self::new(&config.api_url, transport).with_attempt_timeout(config.attempt_timeout())
    }

    pub fn with_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn target_url(&self) -> &str {
        self.client.url()
    }

    /// Run one story generation.
    ///
    /// Only a request that cannot be encoded returns `Err`. Every other
    /// failure ends up in the returned `OrchestrationResult`.
    pub fn generate(
        &self,
        request: &StoryRequest,
        cancel: &CancelToken,
    ) -> Result<OrchestrationResult, OrchestrationError> {
        let http_request = self.client.build_generate_story(request)?;

        let run_id = Uuid::new_v4();
        let span = info_span!("generate_story", %run_id, target_url = %self.client.url());
        let _entered = span.enter();

        info!(
            n_chapters = request.n_chapters,
            l_chapter = request.l_chapter,
            primary_characters = %request.primary_characters,
            secondary_characters = %request.secondary_characters,
            instructions_len = request.story_instructions.len(),
            "story generation request"
        );
        debug!(payload = http_request.body.as_deref().unwrap_or_default(), "request payload");

        let max_attempts = self.policy.max_attempts().max(1);
        let mut attempt_log = Vec::with_capacity(max_attempts as usize);
        let mut last_envelope = None;

        for number in 1..=max_attempts {
            if let Err(reason) = cancel.check() {
                warn!(attempt = number, %reason, "stopping before attempt");
                return Ok(finish(Outcome::Cancelled(reason), attempt_log, last_envelope));
            }

            let timeout = cancel
                .remaining()
                .map_or(self.attempt_timeout, |left| left.min(self.attempt_timeout));
            let started = Instant::now();
            let report = self.attempt(&http_request, timeout, cancel);
            let elapsed = started.elapsed();

            let report = match report {
                Ok(report) => report,
                Err(reason) => {
                    warn!(
                        attempt = number,
                        elapsed_ms = elapsed.as_millis() as u64,
                        %reason,
                        "abandoning in-flight attempt"
                    );
                    attempt_log.push(Attempt {
                        number,
                        outcome: AttemptOutcome::Abandoned,
                        status: None,
                        elapsed,
                        raw_body: None,
                        envelope: None,
                    });
                    return Ok(finish(Outcome::Cancelled(reason), attempt_log, last_envelope));
                }
            };
            log_attempt(&http_request, number, max_attempts, &report, elapsed);

            if report.envelope.is_some() {
                last_envelope.clone_from(&report.envelope);
            }
            let retry = self.policy.should_retry(number, &report.outcome);
            attempt_log.push(Attempt {
                number,
                outcome: report.outcome,
                status: report.status,
                elapsed,
                raw_body: report.raw_body,
                envelope: report.envelope,
            });

            if let Err(reason) = cancel.check() {
                warn!(attempt = number, %reason, "cancelled as attempt completed");
                return Ok(finish(Outcome::Cancelled(reason), attempt_log, last_envelope));
            }
            if !retry {
                return Ok(finish(report.terminal, attempt_log, last_envelope));
            }

            let delay = self.policy.delay(number);
            debug!(attempt = number, delay_ms = delay.as_millis() as u64, "backing off");
            if let Err(reason) = cancel.sleep(delay) {
                warn!(attempt = number, %reason, "stopping during backoff");
                return Ok(finish(Outcome::Cancelled(reason), attempt_log, last_envelope));
            }
        }

        warn!(attempts = max_attempts, "retry loop exhausted without a terminal outcome");
        Ok(finish(Outcome::Exhausted, attempt_log, last_envelope))
    }

    /// One request on a helper thread. `Err` means the token fired first.
    fn attempt(
        &self,
        request: &HttpRequest,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<AttemptReport, CancelReason> {
        let transport = Arc::clone(&self.transport);
        let request = request.clone();
        let response = match cancel.run(move || transport.execute(&request, timeout))? {
            Ok(response) => response,
            Err(err) => return Ok(transport_failure(err)),
        };
        Ok(self.report(response))
    }

    fn report(&self, response: HttpResponse) -> AttemptReport {

        let status = Some(response.status);
        let classified = self.client.classify(&response);
        let raw_body = Some(response.body);

        match classified {
            Classified::ServiceError { status: code, body } => AttemptReport {
                outcome: AttemptOutcome::ServiceError { status: code },
                terminal: Outcome::Failure(Failure::TargetStatus {
                    status: code,
                    body,
                    target_url: self.client.url().to_string(),
                }),
                status,
                raw_body,
                envelope: None,
            },
            Classified::Unparseable {
                status: code,
                raw,
                error,
            } => AttemptReport {
                outcome: AttemptOutcome::ParseFailed(error.clone()),
                terminal: Outcome::SuccessDegraded {
                    http_status: code,
                    raw_response: raw,
                    parse_error: error,
                },
                status,
                raw_body,
                envelope: None,
            },
            Classified::Incomplete { envelope } => AttemptReport {
                outcome: AttemptOutcome::ControlFlowExcluded,
                terminal: Outcome::SoftIncomplete {
                    envelope: envelope.clone(),
                },
                status,
                raw_body,
                envelope: Some(envelope),
            },
            Classified::Complete {
                status: code,
                envelope,
            } => {
                let story = envelope::unwrap_envelope(&envelope);
                if let Unwrapped::RawText { parse_error, .. } = &story {
                    warn!(%parse_error, "nested story value is not JSON, returning raw text");
                }
                AttemptReport {
                    outcome: AttemptOutcome::Complete,
                    terminal: Outcome::Success {
                        http_status: code,
                        story,
                        envelope: envelope.clone(),
                    },
                    status,
                    raw_body,
                    envelope: Some(envelope),
                }
            }
        }
    }
}

fn transport_failure(err: TransportError) -> AttemptReport {
    let detail = err.to_string();
    let (outcome, failure) = if err.is_read() {
        (
            AttemptOutcome::ReadFailed(detail.clone()),
            Failure::Read { detail },
        )
    } else {
        (
            AttemptOutcome::TransportFailed(detail.clone()),
            Failure::Transport { detail },
        )
    };
    AttemptReport {
        outcome,
        terminal: Outcome::Failure(failure),
        status: None,
        raw_body: None,
        envelope: None,
    }
}

fn finish(
    outcome: Outcome,
    attempt_log: Vec<Attempt>,
    last_envelope: Option<Value>,
) -> OrchestrationResult {
    OrchestrationResult {
        outcome,
        attempts: attempt_log.len() as u32,
        attempt_log,
        last_envelope,
    }
}

fn log_attempt(
    request: &HttpRequest,
    number: u32,
    max_attempts: u32,
    report: &AttemptReport,
    elapsed: Duration,
) {
    let body = report
        .raw_body
        .as_deref()
        .map(|raw| truncate(&String::from_utf8_lossy(raw), LOG_BODY_LIMIT))
        .unwrap_or_default();
    let elapsed_ms = elapsed.as_millis() as u64;

    match &report.outcome {
        AttemptOutcome::Complete => info!(
            method = request.method.as_str(),
            url = %request.url,
            attempt = number,
            max_attempts,
            status = report.status,
            elapsed_ms,
            body = %body,
            "workflow attempt complete"
        ),
        AttemptOutcome::TransportFailed(detail) | AttemptOutcome::ReadFailed(detail) => warn!(
            method = request.method.as_str(),
            url = %request.url,
            attempt = number,
            max_attempts,
            outcome = report.outcome.label(),
            elapsed_ms,
            error = %detail,
            "workflow attempt failed"
        ),
        other => warn!(
            method = request.method.as_str(),
            url = %request.url,
            attempt = number,
            max_attempts,
            outcome = other.label(),
            status = report.status,
            elapsed_ms,
            body = %body,
            "workflow attempt unusable"
        ),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::thread;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    type Scripted = Result<HttpResponse, TransportError>;

    /// Replays canned results and records when each call arrived.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Scripted>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn repeat(reply: Scripted, times: usize) -> Arc<Self> {
            Self::new(vec![reply; times])
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn execute(&self, _: &HttpRequest, _: Duration) -> Result<HttpResponse, TransportError> {
            self.calls.lock().push(Instant::now());
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Connect("script exhausted".to_string())))
        }
    }

    const STORY_X: &str = r#"{"output":{"type":"string","value":"{\"title\":\"X\",\"chapters\":[]}"}}"#;
    const EXCLUDED: &str = r#"{"output":{"type":"control-flow-excluded"}}"#;

    fn request() -> StoryRequest {
        StoryRequest {
            n_chapters: 3,
            story_instructions: "A lighthouse keeper finds a map".to_string(),
            primary_characters: "Ines".to_string(),
            secondary_characters: "The gull".to_string(),
            l_chapter: 500,
        }
    }

    fn orchestrator(transport: Arc<ScriptedTransport>) -> WorkflowOrchestrator {
        WorkflowOrchestrator::new("http://localhost:3000", transport)
            .with_policy(FixedBackoff::new(3, Duration::from_millis(1)))
    }

    fn ok(body: &str) -> Scripted {
        Ok(HttpResponse::new(200, body))
    }

    fn refused() -> Scripted {
        Err(TransportError::Connect("connection refused".to_string()))
    }

    fn run(transport: Arc<ScriptedTransport>) -> OrchestrationResult {
        orchestrator(transport)
            .generate(&request(), &CancelToken::new())
            .unwrap()
    }

    #[test]
    fn first_attempt_success_unwraps_story() {
        let transport = ScriptedTransport::new(vec![ok(STORY_X)]);
        let result = run(transport.clone());

        assert!(result.is_success());
        assert_eq!(result.attempts, 1);
        assert_eq!(transport.call_count(), 1);
        match &result.outcome {
            Outcome::Success {
                story: Unwrapped::Structured(story),
                http_status,
                ..
            } => {
                assert_eq!(story["title"], "X");
                assert_eq!(*http_status, 200);
            }
            other => panic!("expected structured success, got {other:?}"),
        }
        assert_eq!(result.to_body()["story"]["title"], "X");
    }

    #[test]
    fn control_flow_excluded_every_time_is_soft_incomplete() {
        let transport = ScriptedTransport::repeat(ok(EXCLUDED), 3);
        let result = run(transport.clone());

        assert_eq!(result.http_status(), 200);
        assert_eq!(result.status_tag(), "control_flow_excluded");
        assert_eq!(result.attempts, 3);
        assert_eq!(transport.call_count(), 3);
        assert!(result.attempt_log.iter().all(|a| a.outcome == AttemptOutcome::ControlFlowExcluded));
    }

    #[test]
    fn service_errors_exhaust_into_bad_gateway() {
        let transport = ScriptedTransport::repeat(Ok(HttpResponse::new(500, "upstream down")), 3);
        let result = run(transport);

        assert_eq!(result.http_status(), 502);
        assert!(result.message().contains("after all retries"));
        assert_eq!(result.attempts, 3);
        let body = result.to_body();
        assert_eq!(body["target_status"], 500);
        assert_eq!(body["body"], "upstream down");
        assert_eq!(body["target_url"], "http://localhost:3000");
    }

    #[test]
    fn unparseable_body_degrades_to_success() {
        let transport = ScriptedTransport::repeat(ok("not-json"), 3);
        let result = run(transport);

        assert_eq!(result.http_status(), 200);
        assert_eq!(result.attempts, 3);
        let body = result.to_body();
        assert_eq!(body["status"], "success");
        assert_eq!(body["raw_response"], "not-json");
        assert!(!body["parse_error"].as_str().unwrap().is_empty());
    }

    #[test]
    fn recovers_after_refused_connections() {
        let transport = ScriptedTransport::new(vec![refused(), refused(), ok(STORY_X)]);
        let result = run(transport);

        assert!(result.is_success());
        assert_eq!(result.attempts, 3);
        assert_eq!(
            result.attempt_log[0].outcome,
            AttemptOutcome::TransportFailed("request failed: connection refused".to_string())
        );
    }

    #[test]
    fn transport_failures_retry_until_max() {
        let transport = ScriptedTransport::repeat(refused(), 5);
        let result = run(transport.clone());

        assert_eq!(transport.call_count(), 3);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.http_status(), 500);
        assert!(matches!(result.outcome, Outcome::Failure(Failure::Transport { .. })));
    }

    #[test]
    fn read_failures_are_reported_separately() {
        let transport =
            ScriptedTransport::repeat(Err(TransportError::Read("connection reset".to_string())), 3);
        let result = run(transport);

        assert_eq!(result.http_status(), 500);
        assert!(matches!(result.outcome, Outcome::Failure(Failure::Read { .. })));
        assert!(result.message().contains("read"));
    }

    #[test]
    fn top_level_array_is_retried_then_degraded() {
        let transport = ScriptedTransport::repeat(ok("[1,2]"), 3);
        let result = run(transport.clone());

        assert_eq!(transport.call_count(), 3);
        assert!(matches!(result.outcome, Outcome::SuccessDegraded { .. }));
        assert!(matches!(result.attempt_log[0].outcome, AttemptOutcome::ParseFailed(_)));
        assert_eq!(result.to_body()["raw_response"], "[1,2]");
        assert_eq!(result.last_envelope, None);
    }

    #[test]
    fn parse_error_then_success_recovers() {
        let transport = ScriptedTransport::new(vec![ok("<html>"), ok(STORY_X)]);
        let result = run(transport);
        assert!(matches!(result.outcome, Outcome::Success { .. }));
        assert_eq!(result.attempts, 2);
    }

    #[test]
    fn nested_non_json_is_returned_as_text() {
        let transport = ScriptedTransport::new(vec![ok(
            r#"{"output":{"type":"string","value":"Chapter 1: the storm"}}"#,
        )]);
        let result = run(transport);
        let body = result.to_body();
        assert_eq!(body["status"], "success");
        assert_eq!(body["story_text"], "Chapter 1: the storm");
        assert_eq!(result.attempts, 1);
    }

    #[test]
    fn non_string_output_passes_envelope_through() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(
            201,
            r#"{"output":{"type":"object","value":{"title":"Y"}}}"#,
        ))]);
        let result = run(transport);
        assert_eq!(result.http_status(), 201);
        assert_eq!(result.to_body()["data"]["output"]["value"]["title"], "Y");
    }

    #[test]
    fn last_envelope_is_kept_for_diagnostics() {
        let transport = ScriptedTransport::new(vec![
            ok(EXCLUDED),
            Ok(HttpResponse::new(500, "x")),
            Ok(HttpResponse::new(500, "x")),
        ]);
        let result = run(transport);
        assert_eq!(
            result.last_envelope,
            Some(json!({"output": {"type": "control-flow-excluded"}}))
        );
        assert_eq!(result.http_status(), 502);
    }

    #[test]
    fn backoff_separates_attempts() {
        let backoff = Duration::from_millis(40);
        let transport = ScriptedTransport::repeat(refused(), 3);
        let orchestrator = WorkflowOrchestrator::new("http://localhost:3000", transport.clone())
            .with_policy(FixedBackoff::new(3, backoff));
        orchestrator.generate(&request(), &CancelToken::new()).unwrap();

        let times = transport.call_times();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= backoff);
        }
    }

    #[test]
    fn cancel_during_backoff_prevents_next_attempt() {
        let transport = ScriptedTransport::repeat(refused(), 3);
        let orchestrator = WorkflowOrchestrator::new("http://localhost:3000", transport.clone())
            .with_policy(FixedBackoff::new(3, Duration::from_secs(10)));
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let started = Instant::now();
        let result = orchestrator.generate(&request(), &cancel).unwrap();
        canceller.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(transport.call_count(), 1);
        assert_eq!(result.outcome, Outcome::Cancelled(CancelReason::Cancelled));
        assert_eq!(result.attempts, 1);
        assert_eq!(result.status_tag(), "cancelled");
    }

    /// Cancels the run partway through a slow request.
    struct CancellingTransport {
        cancel: CancelToken,
    }

    impl Transport for CancellingTransport {
        fn execute(&self, _: &HttpRequest, _: Duration) -> Result<HttpResponse, TransportError> {
            thread::sleep(Duration::from_millis(50));
            self.cancel.cancel();
            thread::sleep(Duration::from_secs(2));
            Ok(HttpResponse::new(200, STORY_X))
        }
    }

    #[test]
    fn cancel_mid_request_abandons_attempt() {
        let cancel = CancelToken::new();
        let transport = Arc::new(CancellingTransport {
            cancel: cancel.clone(),
        });
        let orchestrator = WorkflowOrchestrator::new("http://localhost:3000", transport)
            .with_policy(FixedBackoff::new(3, Duration::from_millis(1)));

        let started = Instant::now();
        let result = orchestrator.generate(&request(), &cancel).unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(result.outcome, Outcome::Cancelled(CancelReason::Cancelled));
        assert_eq!(result.attempts, 1);
        assert_eq!(result.attempt_log[0].outcome, AttemptOutcome::Abandoned);
        assert_eq!(result.http_status(), 504);
    }

    /// Ignores its timeout and answers after a second.
    struct SlowTransport;

    impl Transport for SlowTransport {
        fn execute(&self, _: &HttpRequest, _: Duration) -> Result<HttpResponse, TransportError> {
            thread::sleep(Duration::from_secs(1));
            Ok(HttpResponse::new(200, STORY_X))
        }
    }

    #[test]
    fn deadline_mid_request_is_reported() {
        let cancel = CancelToken::new().with_timeout(Duration::from_millis(60));
        let started = Instant::now();
        let result = WorkflowOrchestrator::new("http://localhost:3000", Arc::new(SlowTransport))
            .generate(&request(), &cancel)
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(900));
        assert_eq!(result.outcome, Outcome::Cancelled(CancelReason::DeadlineExceeded));
        assert_eq!(result.attempts, 1);
        assert_eq!(result.attempt_log[0].outcome, AttemptOutcome::Abandoned);
    }

    #[test]
    fn expired_deadline_makes_no_calls() {
        let transport = ScriptedTransport::new(vec![ok(STORY_X)]);
        let cancel = CancelToken::new().with_deadline(Instant::now() - Duration::from_millis(1));
        let result = orchestrator(transport.clone())
            .generate(&request(), &cancel)
            .unwrap();

        assert_eq!(transport.call_count(), 0);
        assert_eq!(result.attempts, 0);
        assert_eq!(result.outcome, Outcome::Cancelled(CancelReason::DeadlineExceeded));
    }

    #[test]
    fn single_attempt_policy_returns_first_outcome() {
        let transport = ScriptedTransport::new(vec![ok(EXCLUDED)]);
        let result = WorkflowOrchestrator::new("http://localhost:3000", transport)
            .with_policy(FixedBackoff::new(1, Duration::ZERO))
            .generate(&request(), &CancelToken::new())
            .unwrap();
        assert_eq!(result.status_tag(), "control_flow_excluded");
        assert_eq!(result.attempts, 1);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééé", 3), "é...");
    }
}
