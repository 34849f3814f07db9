//! Activation of pending configuration changes.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::api::{ApiResult, CheckmkApi, StatusOutcome, StatusTable};
use crate::http::HttpClient;
use crate::job::{
    CompletionCheck, CrossBeamTicker, DEFAULT_TIMEOUT, JobState, Ticker, WaitPhase,
    wait_for_completion,
};

const ACTIVATE_ENDPOINT: &str = "domain-types/activation_run/actions/activate-changes/invoke";

static ACTIVATE: StatusTable = &[
    (200, StatusOutcome::new(true, false, "Changes activated.")),
    (204, StatusOutcome::new(true, false, "Changes activated.")),
    (
        302,
        StatusOutcome::new(true, false, "Activation started, redirecting."),
    ),
    (
        409,
        StatusOutcome::new(false, true, "Some sites could not be activated."),
    ),
    (
        422,
        StatusOutcome::new(false, false, "There are no changes to be activated."),
    ),
    (
        423,
        StatusOutcome::new(false, true, "There is already an activation running."),
    ),
];

static ACTIVATION_COMPLETION: StatusTable = &[
    (200, StatusOutcome::new(true, false, "activation completed")),
    (404, StatusOutcome::new(false, false, "no running activation")),
];

/// Which sites to activate and how.
///
/// The default activates all sites, waits for nothing and bounds any wait by
/// [`DEFAULT_TIMEOUT`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    /// Sites to activate; empty means all sites with pending changes.
    pub sites: Vec<String>,
    /// Also activate changes made by other users.
    pub force_foreign_changes: bool,
    /// Wait for the activation to finish.
    pub wait_for_completion: bool,
    /// Bound on the wait.
    pub timeout: Duration,
}

impl Default for ActivationRequest {
    fn default() -> Self {
        Self {
            sites: Vec::new(),
            force_foreign_changes: false,
            wait_for_completion: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
struct ActivatePayload<'a> {
    redirect: bool,
    sites: &'a [String],
    force_foreign_changes: bool,
}

fn is_running(content: &Value) -> bool {
    content
        .pointer("/extensions/is_running")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Runs one activation.
pub struct ActivationRun<'a, C, T = CrossBeamTicker>
where
    C: HttpClient,
    T: Ticker,
{
    api: &'a CheckmkApi<C>,
    ticker: T,
    request: ActivationRequest,
    state: JobState,
}

impl<'a, C> ActivationRun<'a, C, CrossBeamTicker>
where
    C: HttpClient,
{
    /// Prepares the activation; nothing is sent until [`ActivationRun::run`].
    pub fn new(api: &'a CheckmkApi<C>, request: ActivationRequest) -> Self {
        Self {
            api,
            ticker: CrossBeamTicker::default(),
            request,
            state: JobState::Idle,
        }
    }
}

impl<'a, C, T> ActivationRun<'a, C, T>
where
    C: HttpClient,
    T: Ticker,
{
    /// Replaces the ticker pacing the completion checks.
    pub fn with_ticker<U: Ticker>(self, ticker: U) -> ActivationRun<'a, C, U> {
        ActivationRun {
            api: self.api,
            ticker,
            request: self.request,
            state: self.state,
        }
    }

    /// Current state of the activation.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Activates the pending changes, waiting for them if requested.
    pub fn run(&mut self) -> ApiResult {
        info!(sites = ?self.request.sites, "activating pending changes");
        self.state = JobState::Submitted;
        let result = self.api.post_if_match(
            ACTIVATE_ENDPOINT,
            "*",
            &ActivatePayload {
                redirect: false,
                sites: &self.request.sites,
                force_foreign_changes: self.request.force_foreign_changes,
            },
            ACTIVATE,
        );
        if result.failed {
            self.state = JobState::Failed;
            return result;
        }
        if !result.changed {
            // nothing to activate
            self.state = JobState::Completed;
            return result;
        }

        self.state = JobState::Running;
        if !self.request.wait_for_completion {
            return result;
        }
        let Some(id) = result.content.get("id").and_then(Value::as_str) else {
            debug!("activation response carries no id, not waiting");
            return result;
        };

        let check = CompletionCheck {
            endpoint: format!("objects/activation_run/{id}"),
            codes: ACTIVATION_COMPLETION,
            job: "activation",
            is_active: is_running,
        };
        let outcome = wait_for_completion(
            self.api,
            &self.ticker,
            &check,
            WaitPhase::Current,
            self.request.timeout,
        );
        self.state = outcome.terminal_state();
        outcome.into_result()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::Method;
    use http::header::IF_MATCH;
    use serde_json::json;

    use super::*;
    use crate::http::test::{MockHttpClientMockall, empty_response, json_response, sent_json};
    use crate::job::test::MockTickerMockAll;

    const RUN: &str = "objects/activation_run/a1b2";

    fn request(wait: bool) -> ActivationRequest {
        ActivationRequest {
            sites: vec!["central".to_string()],
            force_foreign_changes: true,
            wait_for_completion: wait,
            timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn activation_sends_payload_with_wildcard_precondition() {
        let mut client = MockHttpClientMockall::new();
        client
            .expect_send()
            .withf(|method, endpoint, headers, body| {
                *method == Method::POST
                    && endpoint == ACTIVATE_ENDPOINT
                    && headers.get(IF_MATCH).is_some_and(|v| v == "*")
                    && sent_json(body)
                        == json!({
                            "redirect": false,
                            "sites": ["central"],
                            "force_foreign_changes": true,
                        })
            })
            .once()
            .return_once(|_, _, _, _| Ok(empty_response(204)));
        let api = CheckmkApi::new(client);

        let mut run =
            ActivationRun::new(&api, request(false)).with_ticker(MockTickerMockAll::unused());
        let result = run.run();

        assert!(result.changed);
        assert!(!result.failed);
        assert_eq!(result.message, "Changes activated.");
        assert_eq!(run.state(), JobState::Running);
    }

    // Activation run reporting `is_running` for the first `running_polls` checks.
    fn expect_run_status(
        client: &mut MockHttpClientMockall,
        running_polls: usize,
    ) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        client
            .expect_send()
            .withf(|method, endpoint, _, _| *method == Method::GET && endpoint == RUN)
            .returning(move |_, _, _, _| {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                Ok(json_response(
                    200,
                    json!({"id": "a1b2", "extensions": {"is_running": call < running_polls}}),
                ))
            });
        calls
    }

    fn started_activation() -> Value {
        json!({"id": "a1b2", "extensions": {"is_running": true}})
    }

    #[test]
    fn waits_on_the_returned_activation() {
        let mut client = MockHttpClientMockall::new();
        client.should_send(
            Method::POST,
            ACTIVATE_ENDPOINT,
            json_response(200, started_activation()),
        );
        let calls = expect_run_status(&mut client, 1);
        let api = CheckmkApi::new(client);

        let mut run =
            ActivationRun::new(&api, request(true)).with_ticker(MockTickerMockAll::immediate());
        let result = run.run();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(run.state(), JobState::Completed);
        assert_eq!(result.message, "activation completed");
        assert!(result.changed);
    }

    #[test]
    fn default_request_has_time_to_complete() {
        assert_eq!(ActivationRequest::default().timeout, DEFAULT_TIMEOUT);

        let mut client = MockHttpClientMockall::new();
        client.should_send(
            Method::POST,
            ACTIVATE_ENDPOINT,
            json_response(200, started_activation()),
        );
        let calls = expect_run_status(&mut client, 1);
        let api = CheckmkApi::new(client);

        let request = ActivationRequest {
            wait_for_completion: true,
            ..Default::default()
        };
        let mut run = ActivationRun::new(&api, request).with_ticker(MockTickerMockAll::immediate());
        let result = run.run();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(run.state(), JobState::Completed);
        assert!(!result.failed);
        assert_eq!(result.message, "activation completed");
    }

    #[test]
    fn no_pending_changes_is_not_a_failure() {
        let mut client = MockHttpClientMockall::new();
        client.should_send(
            Method::POST,
            ACTIVATE_ENDPOINT,
            json_response(422, json!({})),
        );
        let api = CheckmkApi::new(client);

        let mut run =
            ActivationRun::new(&api, request(true)).with_ticker(MockTickerMockAll::unused());
        let result = run.run();

        assert!(!result.changed);
        assert!(!result.failed);
        assert_eq!(result.message, "There are no changes to be activated.");
        assert_eq!(run.state(), JobState::Completed);
    }

    #[test]
    fn locked_activation_fails() {
        let mut client = MockHttpClientMockall::new();
        client.should_send(
            Method::POST,
            ACTIVATE_ENDPOINT,
            json_response(423, json!({})),
        );
        let api = CheckmkApi::new(client);

        let mut run = ActivationRun::new(&api, request(true));
        let result = run.run();

        assert!(result.failed);
        assert_eq!(result.message, "There is already an activation running.");
        assert_eq!(run.state(), JobState::Failed);
    }

    #[test]
    fn redirect_without_id_is_not_waited_for() {
        let mut client = MockHttpClientMockall::new();
        client.should_send(Method::POST, ACTIVATE_ENDPOINT, empty_response(302));
        let api = CheckmkApi::new(client);

        let mut run =
            ActivationRun::new(&api, request(true)).with_ticker(MockTickerMockAll::unused());
        let result = run.run();

        assert_eq!(result.http_code, 302);
        assert_eq!(result.message, "Activation started, redirecting.");
        assert_eq!(run.state(), JobState::Running);
    }
}
