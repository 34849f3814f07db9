//! Service discovery on a single host or on a list of hosts.
//!
//! A [`DiscoveryOrchestrator`] picks the API strategy matching the server version once, at
//! construction. [`DiscoveryOrchestrator::run`] then walks the job through
//! `Idle → Submitted → Running → {Completed | Failed | TimedOut}`, optionally waiting for an
//! earlier discovery job before submitting and for its own job afterwards.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::api::{ApiResult, CheckmkApi, StatusOutcome, StatusTable};
use crate::http::HttpClient;
use crate::job::{
    CompletionCheck, CrossBeamTicker, DEFAULT_TIMEOUT, JobState, Ticker, WaitPhase,
    wait_for_completion,
};
use crate::version::{CompatibilityRange, InvalidVersionError, ServerVersion};

const DEFAULT_BULK_SIZE: u32 = 10;

static SINGLE_SUBMIT: StatusTable = &[
    (200, StatusOutcome::new(true, false, "Discovery successful.")),
    (
        302,
        StatusOutcome::new(true, false, "background job initialized, redirecting"),
    ),
    (404, StatusOutcome::new(false, true, "Host could not be found.")),
    (
        409,
        StatusOutcome::new(false, false, "discovery job already running"),
    ),
];

static BULK_SUBMIT: StatusTable = &[
    (200, StatusOutcome::new(true, false, "Discovery successful.")),
    (
        409,
        StatusOutcome::new(false, false, "bulk discovery job already active"),
    ),
];

static SINGLE_COMPLETION: StatusTable = &[
    (200, StatusOutcome::new(true, false, "discovery completed")),
    (302, StatusOutcome::new(true, false, "still running, redirecting")),
    (404, StatusOutcome::new(false, false, "no running discovery")),
];

static BULK_COMPLETION: StatusTable = &[
    (200, StatusOutcome::new(true, false, "discovery completed")),
    (
        404,
        StatusOutcome::new(false, false, "no running bulk_discovery job"),
    ),
];

/// Errors raised while setting up a discovery.
#[derive(Error, Debug, PartialEq)]
pub enum DiscoveryError {
    /// No strategy supports the server version.
    #[error("{mode} discovery is not supported on server version `{version}`")]
    UnsupportedVersion {
        /// Single-host or bulk.
        mode: TargetKind,
        /// Raw server version.
        version: String,
    },
    /// The server version could not be compared.
    #[error("`{0}`")]
    InvalidVersion(#[from] InvalidVersionError),
    /// The requested mode is not one of the known discovery modes.
    #[error("unknown discovery mode `{0}`")]
    UnknownMode(String),
    /// Neither a host name nor a host list was given.
    #[error("either a host name or a non-empty list of host names is required")]
    MissingTarget,
}

/// What a discovery does with the services it finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Add unmonitored services.
    New,
    /// Remove vanished services.
    Remove,
    /// Add new and remove vanished services.
    FixAll,
    /// Forget all services and discover from scratch.
    Refresh,
    /// Update host labels only.
    OnlyHostLabels,
}

impl DiscoveryMode {
    fn as_str(self) -> &'static str {
        match self {
            DiscoveryMode::New => "new",
            DiscoveryMode::Remove => "remove",
            DiscoveryMode::FixAll => "fix_all",
            DiscoveryMode::Refresh => "refresh",
            DiscoveryMode::OnlyHostLabels => "only_host_labels",
        }
    }
}

impl FromStr for DiscoveryMode {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(DiscoveryMode::New),
            "remove" => Ok(DiscoveryMode::Remove),
            "fix_all" => Ok(DiscoveryMode::FixAll),
            "refresh" => Ok(DiscoveryMode::Refresh),
            "only_host_labels" => Ok(DiscoveryMode::OnlyHostLabels),
            other => Err(DiscoveryError::UnknownMode(other.to_string())),
        }
    }
}

impl Display for DiscoveryMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-host or bulk discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// One host.
    Single,
    /// A list of hosts.
    Bulk,
}

impl Display for TargetKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Single => write!(f, "single-host"),
            TargetKind::Bulk => write!(f, "bulk"),
        }
    }
}

/// Options of a bulk discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkDiscovery {
    /// Hosts to discover, never empty.
    pub host_names: Vec<String>,
    /// Perform a full scan instead of using cached data.
    pub do_full_scan: bool,
    /// Number of hosts handled per server-side batch.
    pub bulk_size: u32,
    /// Continue with the remaining hosts when one fails.
    pub ignore_errors: bool,
}

/// Hosts a discovery runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryTarget {
    /// Single-host discovery.
    Host(String),
    /// Bulk discovery.
    Bulk(BulkDiscovery),
}

impl DiscoveryTarget {
    /// Which code path the target selects.
    pub fn kind(&self) -> TargetKind {
        match self {
            DiscoveryTarget::Host(_) => TargetKind::Single,
            DiscoveryTarget::Bulk(_) => TargetKind::Bulk,
        }
    }
}

/// A service discovery to run.
///
/// ```
/// use std::time::Duration;
/// use cmk_client::operation::discovery::{DiscoveryMode, DiscoveryRequest, TargetKind};
///
/// let request = DiscoveryRequest::from_targets(
///     None,
///     Some(vec!["web01".to_string(), "web02".to_string()]),
///     "fix_all".parse().unwrap(),
/// )
/// .unwrap()
/// .with_wait_for_completion(true)
/// .with_timeout(Duration::from_secs(120));
///
/// assert_eq!(request.target().kind(), TargetKind::Bulk);
/// assert_eq!(request.mode(), DiscoveryMode::FixAll);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    target: DiscoveryTarget,
    mode: DiscoveryMode,
    wait_for_previous: bool,
    wait_for_completion: bool,
    timeout: Duration,
}

impl DiscoveryRequest {
    /// Discovery on a single host.
    pub fn single(host_name: impl Into<String>, mode: DiscoveryMode) -> Self {
        Self::new(DiscoveryTarget::Host(host_name.into()), mode)
    }

    /// Bulk discovery with default options.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::MissingTarget`] when `host_names` is empty.
    pub fn bulk(host_names: Vec<String>, mode: DiscoveryMode) -> Result<Self, DiscoveryError> {
        if host_names.is_empty() {
            return Err(DiscoveryError::MissingTarget);
        }
        Ok(Self::new(
            DiscoveryTarget::Bulk(BulkDiscovery {
                host_names,
                do_full_scan: true,
                bulk_size: DEFAULT_BULK_SIZE,
                ignore_errors: true,
            }),
            mode,
        ))
    }

    /// Derives the target from optional inputs: a present, non-empty host list selects bulk
    /// discovery, otherwise the single host name is used.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::MissingTarget`] when neither yields a target.
    pub fn from_targets(
        host_name: Option<String>,
        host_names: Option<Vec<String>>,
        mode: DiscoveryMode,
    ) -> Result<Self, DiscoveryError> {
        match (host_names, host_name) {
            (Some(host_names), _) if !host_names.is_empty() => Self::bulk(host_names, mode),
            (_, Some(host_name)) => Ok(Self::single(host_name, mode)),
            _ => Err(DiscoveryError::MissingTarget),
        }
    }

    fn new(target: DiscoveryTarget, mode: DiscoveryMode) -> Self {
        Self {
            target,
            mode,
            wait_for_previous: false,
            wait_for_completion: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Wait for an already running discovery job before submitting.
    pub fn with_wait_for_previous(self, wait_for_previous: bool) -> Self {
        Self {
            wait_for_previous,
            ..self
        }
    }

    /// Wait for the submitted job to finish.
    pub fn with_wait_for_completion(self, wait_for_completion: bool) -> Self {
        Self {
            wait_for_completion,
            ..self
        }
    }

    /// Bound on each wait.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Overrides the bulk options; ignored for single-host requests.
    pub fn with_bulk_options(
        mut self,
        do_full_scan: bool,
        bulk_size: u32,
        ignore_errors: bool,
    ) -> Self {
        if let DiscoveryTarget::Bulk(bulk) = &mut self.target {
            bulk.do_full_scan = do_full_scan;
            bulk.bulk_size = bulk_size;
            bulk.ignore_errors = ignore_errors;
        }
        self
    }

    /// Hosts to discover.
    pub fn target(&self) -> &DiscoveryTarget {
        &self.target
    }

    /// Requested mode.
    pub fn mode(&self) -> DiscoveryMode {
        self.mode
    }
}

/// API generation used to drive a discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStrategy {
    /// `service_discovery_run` and `discovery_run` endpoints of the 2.1 API.
    ServiceDiscoveryRun,
}

static STRATEGIES: LazyLock<Vec<(DiscoveryStrategy, CompatibilityRange)>> = LazyLock::new(|| {
    vec![(
        DiscoveryStrategy::ServiceDiscoveryRun,
        CompatibilityRange::new("2.1.0", "2.1.0p99"),
    )]
});

impl DiscoveryStrategy {
    /// Picks the first strategy whose range contains `version`.
    ///
    /// # Errors
    ///
    /// Fails when the version is invalid or no range matches.
    pub fn select(version: &ServerVersion, kind: TargetKind) -> Result<Self, DiscoveryError> {
        for (strategy, range) in STRATEGIES.iter() {
            if range.contains(version)? {
                debug!(%version, %range, ?strategy, "selected discovery strategy");
                return Ok(*strategy);
            }
        }
        Err(DiscoveryError::UnsupportedVersion {
            mode: kind,
            version: version.to_string(),
        })
    }

    fn submit_endpoint(self, kind: TargetKind) -> &'static str {
        match (self, kind) {
            (DiscoveryStrategy::ServiceDiscoveryRun, TargetKind::Single) => {
                "domain-types/service_discovery_run/actions/start/invoke"
            }
            (DiscoveryStrategy::ServiceDiscoveryRun, TargetKind::Bulk) => {
                "domain-types/discovery_run/actions/bulk-discovery-start/invoke"
            }
        }
    }

    fn completion_check(self, target: &DiscoveryTarget) -> CompletionCheck {
        match (self, target) {
            (DiscoveryStrategy::ServiceDiscoveryRun, DiscoveryTarget::Host(host_name)) => {
                CompletionCheck {
                    endpoint: format!("objects/service_discovery_run/{host_name}"),
                    codes: SINGLE_COMPLETION,
                    job: "discovery",
                    is_active: extensions_active,
                }
            }
            (DiscoveryStrategy::ServiceDiscoveryRun, DiscoveryTarget::Bulk(_)) => {
                CompletionCheck {
                    endpoint: "objects/discovery_run/bulk_discovery".to_string(),
                    codes: BULK_COMPLETION,
                    job: "bulk discovery",
                    is_active: extensions_active,
                }
            }
        }
    }
}

fn extensions_active(content: &Value) -> bool {
    content
        .pointer("/extensions/active")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[derive(Serialize)]
struct SinglePayload<'a> {
    host_name: &'a str,
    mode: DiscoveryMode,
}

#[derive(Serialize)]
struct BulkPayload<'a> {
    hostnames: &'a [String],
    mode: DiscoveryMode,
    do_full_scan: bool,
    bulk_size: u32,
    ignore_errors: bool,
}

/// Drives one discovery request against a server.
pub struct DiscoveryOrchestrator<'a, C, T = CrossBeamTicker>
where
    C: HttpClient,
    T: Ticker,
{
    api: &'a CheckmkApi<C>,
    ticker: T,
    strategy: DiscoveryStrategy,
    request: DiscoveryRequest,
    state: JobState,
}

impl<'a, C> DiscoveryOrchestrator<'a, C, CrossBeamTicker>
where
    C: HttpClient,
{
    /// Selects the strategy for `server_version`; no request is sent.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::UnsupportedVersion`] when no strategy supports the version and
    /// [`DiscoveryError::InvalidVersion`] when the version is unparsable.
    pub fn new(
        api: &'a CheckmkApi<C>,
        server_version: &ServerVersion,
        request: DiscoveryRequest,
    ) -> Result<Self, DiscoveryError> {
        let strategy = DiscoveryStrategy::select(server_version, request.target.kind())?;
        Ok(Self {
            api,
            ticker: CrossBeamTicker::default(),
            strategy,
            request,
            state: JobState::Idle,
        })
    }
}

impl<'a, C, T> DiscoveryOrchestrator<'a, C, T>
where
    C: HttpClient,
    T: Ticker,
{
    /// Replaces the ticker pacing the completion checks.
    pub fn with_ticker<U: Ticker>(self, ticker: U) -> DiscoveryOrchestrator<'a, C, U> {
        DiscoveryOrchestrator {
            api: self.api,
            ticker,
            strategy: self.strategy,
            request: self.request,
            state: self.state,
        }
    }

    /// Strategy chosen at construction.
    pub fn strategy(&self) -> DiscoveryStrategy {
        self.strategy
    }

    /// Current state of the job.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Runs the discovery and reports the last relevant API result.
    ///
    /// When waiting for completion the result is the last completion check, not the submit call.
    pub fn run(&mut self) -> ApiResult {
        let check = self.strategy.completion_check(&self.request.target);

        if self.request.wait_for_previous {
            let outcome = wait_for_completion(
                self.api,
                &self.ticker,
                &check,
                WaitPhase::Previous,
                self.request.timeout,
            );
            if !outcome.is_success() {
                self.state = outcome.terminal_state();
                return outcome.into_result();
            }
        }

        self.state = JobState::Submitted;
        let result = self.submit();
        if result.failed {
            self.state = JobState::Failed;
            return result;
        }

        self.state = JobState::Running;
        if !self.request.wait_for_completion {
            return result;
        }

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

    fn submit(&self) -> ApiResult {
        let kind = self.request.target.kind();
        let endpoint = self.strategy.submit_endpoint(kind);
        info!(%kind, mode = %self.request.mode, "starting service discovery");

        match &self.request.target {
            DiscoveryTarget::Host(host_name) => self.api.post(
                endpoint,
                &SinglePayload {
                    host_name,
                    mode: self.request.mode,
                },
                SINGLE_SUBMIT,
            ),
            DiscoveryTarget::Bulk(bulk) => self.api.post(
                endpoint,
                &BulkPayload {
                    hostnames: &bulk.host_names,
                    mode: self.request.mode,
                    do_full_scan: bulk.do_full_scan,
                    bulk_size: bulk.bulk_size,
                    ignore_errors: bulk.ignore_errors,
                },
                BULK_SUBMIT,
            ),
        }
    }
}
