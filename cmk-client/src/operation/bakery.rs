//! Agent bakery: baking and signing of monitoring agent packages.
//!
//! The raw edition ships without a bakery, and the baking status endpoint used to wait for a
//! bake job only exists from 2.2.0 on. Both are checked before any request is sent.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;

use crate::api::{ApiResult, CheckmkApi, StatusOutcome, StatusTable};
use crate::http::HttpClient;
use crate::job::{
    CompletionCheck, CrossBeamTicker, JobState, Ticker, WaitPhase, wait_for_completion,
};
use crate::version::{CompatibilityRange, InvalidVersionError, ServerVersion};

const BAKING_STATUS_ENDPOINT: &str = "domain-types/agent/actions/baking_status/invoke";

static BAKE: StatusTable = &[
    (200, StatusOutcome::new(true, false, "Agents baked successfully.")),
    (204, StatusOutcome::new(true, false, "Agents baked successfully.")),
];

static SIGN: StatusTable = &[
    (200, StatusOutcome::new(true, false, "Agents signed successfully.")),
    (204, StatusOutcome::new(true, false, "Agents signed successfully.")),
];

static BAKE_AND_SIGN: StatusTable = &[
    (
        200,
        StatusOutcome::new(true, false, "Agents baked and signed successfully."),
    ),
    (
        204,
        StatusOutcome::new(true, false, "Agents baked and signed successfully."),
    ),
];

static BAKING_STATUS: StatusTable =
    &[(200, StatusOutcome::new(true, false, "baking status retrieved"))];

static BAKING_STATUS_RANGE: LazyLock<CompatibilityRange> =
    LazyLock::new(|| CompatibilityRange::at_least("2.2.0"));

/// Errors raised while setting up an agent bakery run.
#[derive(Error, Debug, PartialEq)]
pub enum BakeryError {
    /// The edition has no agent bakery.
    #[error("the agent bakery is not available in edition `{0}`")]
    UnsupportedEdition(String),
    /// Waiting is not possible on this server version.
    #[error("waiting for the agent bakery is not supported on server version `{version}`")]
    UnsupportedVersion {
        /// Raw server version.
        version: String,
    },
    /// The server version could not be compared.
    #[error("`{0}`")]
    InvalidVersion(#[from] InvalidVersionError),
}

/// What the bakery should do.
#[derive(Clone, PartialEq, Eq)]
pub enum BakeryAction {
    /// Bake agent packages.
    Bake,
    /// Sign already baked packages.
    Sign {
        /// Id of the signature key.
        key_id: u32,
        /// Passphrase of the signature key.
        passphrase: String,
    },
    /// Bake and sign in one go.
    BakeAndSign {
        /// Id of the signature key.
        key_id: u32,
        /// Passphrase of the signature key.
        passphrase: String,
    },
}

impl fmt::Debug for BakeryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BakeryAction::Bake => f.write_str("Bake"),
            BakeryAction::Sign { key_id, .. } => f
                .debug_struct("Sign")
                .field("key_id", key_id)
                .field("passphrase", &"<redacted>")
                .finish(),
            BakeryAction::BakeAndSign { key_id, .. } => f
                .debug_struct("BakeAndSign")
                .field("key_id", key_id)
                .field("passphrase", &"<redacted>")
                .finish(),
        }
    }
}

impl BakeryAction {
    fn endpoint(&self) -> &'static str {
        match self {
            BakeryAction::Bake => "domain-types/agent/actions/bake/invoke",
            BakeryAction::Sign { .. } => "domain-types/agent/actions/sign/invoke",
            BakeryAction::BakeAndSign { .. } => "domain-types/agent/actions/bake_and_sign/invoke",
        }
    }

    fn codes(&self) -> StatusTable {
        match self {
            BakeryAction::Bake => BAKE,
            BakeryAction::Sign { .. } => SIGN,
            BakeryAction::BakeAndSign { .. } => BAKE_AND_SIGN,
        }
    }

    fn signature(&self) -> Option<SignPayload<'_>> {
        match self {
            BakeryAction::Bake => None,
            BakeryAction::Sign { key_id, passphrase }
            | BakeryAction::BakeAndSign { key_id, passphrase } => Some(SignPayload {
                key_id: *key_id,
                passphrase,
            }),
        }
    }
}

#[derive(Serialize)]
struct SignPayload<'a> {
    key_id: u32,
    passphrase: &'a str,
}

/// A bakery action to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BakeryRequest {
    /// Requested action.
    pub action: BakeryAction,
    /// Wait until the bakery is idle again.
    pub wait_for_completion: bool,
    /// Bound on the wait.
    pub timeout: Duration,
}

fn baking_in_progress(content: &Value) -> bool {
    matches!(
        content.get("state").and_then(Value::as_str),
        Some("running" | "initialized")
    )
}

/// Runs one bakery action.
pub struct BakeryRun<'a, C, T = CrossBeamTicker>
where
    C: HttpClient,
    T: Ticker,
{
    api: &'a CheckmkApi<C>,
    ticker: T,
    request: BakeryRequest,
    state: JobState,
}

impl<'a, C> BakeryRun<'a, C, CrossBeamTicker>
where
    C: HttpClient,
{
    /// Checks that the server can serve the request; no request is sent.
    ///
    /// # Errors
    ///
    /// Returns [`BakeryError::UnsupportedEdition`] on the raw edition and
    /// [`BakeryError::UnsupportedVersion`] when waiting is requested on a server below 2.2.0.
    pub fn new(
        api: &'a CheckmkApi<C>,
        server_version: &ServerVersion,
        request: BakeryRequest,
    ) -> Result<Self, BakeryError> {
        if server_version.is_raw_edition() {
            return Err(BakeryError::UnsupportedEdition(
                server_version.edition().unwrap_or_default().to_string(),
            ));
        }
        if request.wait_for_completion && !BAKING_STATUS_RANGE.contains(server_version)? {
            return Err(BakeryError::UnsupportedVersion {
                version: server_version.to_string(),
            });
        }
        Ok(Self {
            api,
            ticker: CrossBeamTicker::default(),
            request,
            state: JobState::Idle,
        })
    }
}

impl<'a, C, T> BakeryRun<'a, C, T>
where
    C: HttpClient,
    T: Ticker,
{
    /// Replaces the ticker pacing the status checks.
    pub fn with_ticker<U: Ticker>(self, ticker: U) -> BakeryRun<'a, C, U> {
        BakeryRun {
            api: self.api,
            ticker,
            request: self.request,
            state: self.state,
        }
    }

    /// Current state of the bake job.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Triggers the action, waiting for the bakery if requested.
    pub fn run(&mut self) -> ApiResult {
        let action = &self.request.action;
        info!(endpoint = action.endpoint(), "triggering agent bakery");
        self.state = JobState::Submitted;
        let result = match action.signature() {
            Some(signature) => self.api.post(action.endpoint(), &signature, action.codes()),
            None => self.api.post(action.endpoint(), &json!({}), action.codes()),
        };
        if result.failed {
            self.state = JobState::Failed;
            return result;
        }

        self.state = JobState::Running;
        if !self.request.wait_for_completion {
            return result;
        }

        let check = CompletionCheck {
            endpoint: BAKING_STATUS_ENDPOINT.to_string(),
            codes: BAKING_STATUS,
            job: "agent baking",
            is_active: baking_in_progress,
        };
        let outcome = wait_for_completion(
            self.api,
            &self.ticker,
            &check,
            WaitPhase::Current,
            self.request.timeout,
        );
        self.state = outcome.terminal_state();
        if outcome.is_success() {
            // the status check only reads; report what the action did
            return ApiResult {
                content: outcome.into_result().content,
                ..result
            };
        }
        outcome.into_result()
    }
}
