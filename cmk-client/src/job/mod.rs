//! Tracking of server-side background jobs.
//!
//! Discovery, activation and agent baking all run as background jobs: a submit call starts
//! them and a separate completion endpoint reports whether they are still active. The wait loop
//! in this module polls such an endpoint until the job is inactive or a deadline passes.

use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{ApiResult, CheckmkApi, StatusTable};
use crate::http::HttpClient;

mod ticker;

pub use ticker::{CrossBeamTicker, DEFAULT_POLL_INTERVAL, Ticker, TickerError};

#[cfg(test)]
pub(crate) use ticker::test;

/// Default bound on each wait for a background job.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Progress of one background job as seen by the orchestrating caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Nothing sent yet.
    Idle,
    /// The submit call has been issued.
    Submitted,
    /// The server accepted the job.
    Running,
    /// The job finished.
    Completed,
    /// Submitting or waiting failed.
    Failed,
    /// The job did not finish before the deadline.
    TimedOut,
}

impl JobState {
    /// Whether no further transition can happen.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::TimedOut
        )
    }
}

/// Which job a wait loop is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPhase {
    /// A job started before this invocation.
    Previous,
    /// The job this invocation submitted.
    Current,
}

impl Display for WaitPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitPhase::Previous => write!(f, "previous"),
            WaitPhase::Current => write!(f, "current"),
        }
    }
}

/// Where and how to ask whether a job is still active.
#[derive(Debug, Clone)]
pub struct CompletionCheck {
    /// Completion endpoint, polled with `GET`.
    pub endpoint: String,
    /// Classification of the completion endpoint.
    pub codes: StatusTable,
    /// Job name used in messages.
    pub job: &'static str,
    /// Reads the activity flag from a decoded completion response.
    pub is_active: fn(&Value) -> bool,
}

/// How a wait loop ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WaitOutcome {
    /// The job is no longer active; carries the last completion response.
    Finished(ApiResult),
    /// The completion check itself failed.
    Failed(ApiResult),
    /// The deadline passed while the job was still active.
    TimedOut(ApiResult),
}

impl WaitOutcome {
    pub(crate) fn is_success(&self) -> bool {
        matches!(self, WaitOutcome::Finished(_))
    }

    pub(crate) fn terminal_state(&self) -> JobState {
        match self {
            WaitOutcome::Finished(_) => JobState::Completed,
            WaitOutcome::Failed(_) => JobState::Failed,
            WaitOutcome::TimedOut(_) => JobState::TimedOut,
        }
    }

    pub(crate) fn into_result(self) -> ApiResult {
        match self {
            WaitOutcome::Finished(result)
            | WaitOutcome::Failed(result)
            | WaitOutcome::TimedOut(result) => result,
        }
    }
}

/// Polls `check` until the job reports inactive, the check fails or `timeout` elapses.
pub(crate) fn wait_for_completion<C, T>(
    api: &CheckmkApi<C>,
    ticker: &T,
    check: &CompletionCheck,
    phase: WaitPhase,
    timeout: Duration,
) -> WaitOutcome
where
    C: HttpClient,
    T: Ticker,
{
    // a timeout too large to represent means no deadline
    let deadline = Instant::now().checked_add(timeout);
    let mut last: Option<ApiResult> = None;

    loop {
        if deadline.is_some_and(|deadline| Instant::now() > deadline) {
            let message = format!("Timeout waiting for {phase} {} to finish.", check.job);
            warn!(endpoint = %check.endpoint, timeout = ?timeout, "{message}");
            let mut result = last.unwrap_or_else(|| ApiResult::transport_failure(""));
            result.message = message;
            result.changed = false;
            result.failed = true;
            return WaitOutcome::TimedOut(result);
        }

        let result = api.get(&check.endpoint, check.codes);
        if result.failed {
            return WaitOutcome::Failed(result);
        }
        if !(check.is_active)(&result.content) {
            debug!(endpoint = %check.endpoint, %phase, "{} finished", check.job);
            return WaitOutcome::Finished(result);
        }

        debug!(endpoint = %check.endpoint, %phase, "{} still active", check.job);
        last = Some(result);

        if let Err(err) = ticker.next() {
            return WaitOutcome::Failed(ApiResult::transport_failure(format!(
                "Error waiting for {phase} {}: {err}",
                check.job
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::sleep;

    use http::Method;
    use serde_json::json;

    use super::test::MockTickerMockAll;
    use super::*;
    use crate::api::StatusOutcome;
    use crate::http::test::{MockHttpClientMockall, json_response};

    static CODES: StatusTable = &[
        (200, StatusOutcome::new(true, false, "job completed")),
        (404, StatusOutcome::new(false, false, "no running job")),
    ];

    fn check() -> CompletionCheck {
        CompletionCheck {
            endpoint: "objects/job/1".to_string(),
            codes: CODES,
            job: "test job",
            is_active: |content: &Value| content["active"].as_bool().unwrap_or(false),
        }
    }

    // Client answering `active: true` for the first `active_polls` calls.
    fn client_active_for(active_polls: usize) -> (MockHttpClientMockall, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut client = MockHttpClientMockall::new();
        client
            .expect_send()
            .withf(|method, endpoint, _, _| *method == Method::GET && endpoint == "objects/job/1")
            .returning(move |_, _, _, _| {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                Ok(json_response(200, json!({"active": call < active_polls, "poll": call})))
            });
        (client, calls)
    }

    #[test]
    fn polls_until_inactive() {
        let (client, calls) = client_active_for(2);
        let api = CheckmkApi::new(client);

        let outcome = wait_for_completion(
            &api,
            &MockTickerMockAll::immediate(),
            &check(),
            WaitPhase::Current,
            Duration::from_secs(60),
        );

        assert_eq!(outcome.terminal_state(), JobState::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let result = outcome.into_result();
        assert_eq!(result.content["poll"], 2);
        assert_eq!(result.message, "job completed");
    }

    #[test]
    fn benign_not_found_finishes_immediately() {
        let mut client = MockHttpClientMockall::new();
        client.should_send(
            Method::GET,
            "objects/job/1",
            json_response(404, json!({"title": "Not Found"})),
        );
        let api = CheckmkApi::new(client);

        let outcome = wait_for_completion(
            &api,
            &MockTickerMockAll::unused(),
            &check(),
            WaitPhase::Previous,
            Duration::from_secs(60),
        );

        assert!(outcome.is_success());
        assert_eq!(outcome.into_result().message, "no running job");
    }

    #[test]
    fn failed_check_ends_the_loop() {
        let mut client = MockHttpClientMockall::new();
        client.should_send(Method::GET, "objects/job/1", json_response(500, json!({})));
        let api = CheckmkApi::new(client);

        let outcome = wait_for_completion(
            &api,
            &MockTickerMockAll::unused(),
            &check(),
            WaitPhase::Current,
            Duration::from_secs(60),
        );

        assert_eq!(outcome.terminal_state(), JobState::Failed);
        assert!(outcome.into_result().failed);
    }

    #[test]
    fn times_out_naming_the_phase() {
        for phase in [WaitPhase::Previous, WaitPhase::Current] {
            let (client, calls) = client_active_for(usize::MAX);
            let api = CheckmkApi::new(client);
            let mut ticker = MockTickerMockAll::new();
            ticker.expect_next().returning(|| {
                sleep(Duration::from_millis(5));
                Ok(())
            });

            let outcome = wait_for_completion(
                &api,
                &ticker,
                &check(),
                phase,
                Duration::from_millis(30),
            );

            assert_eq!(outcome.terminal_state(), JobState::TimedOut);
            assert!(calls.load(Ordering::SeqCst) >= 1);
            let result = outcome.into_result();
            assert!(result.failed);
            assert!(!result.changed);
            assert_eq!(
                result.message,
                format!("Timeout waiting for {phase} test job to finish.")
            );
            assert!(result.message.contains(&phase.to_string()));
        }
    }

    #[test]
    fn unbounded_timeout_still_polls_until_inactive() {
        let (client, calls) = client_active_for(1);
        let api = CheckmkApi::new(client);

        let outcome = wait_for_completion(
            &api,
            &MockTickerMockAll::immediate(),
            &check(),
            WaitPhase::Current,
            Duration::MAX,
        );

        assert_eq!(outcome.terminal_state(), JobState::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn ticker_failure_is_reported() {
        let (client, _) = client_active_for(usize::MAX);
        let api = CheckmkApi::new(client);
        let mut ticker = MockTickerMockAll::new();
        ticker
            .expect_next()
            .once()
            .returning(|| Err(TickerError::Disconnected(crossbeam::channel::RecvError)));

        let outcome = wait_for_completion(
            &api,
            &ticker,
            &check(),
            WaitPhase::Current,
            Duration::from_secs(60),
        );

        assert_eq!(outcome.terminal_state(), JobState::Failed);
        assert_eq!(outcome.into_result().http_code, 0);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Idle.is_terminal());
        assert!(!JobState::Submitted.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::TimedOut.is_terminal());
    }
}
