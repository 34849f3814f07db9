//! Idempotent updates of configuration objects.
//!
//! An [`ObjectReconciler`] reads one object, compares its attributes with the desired ones
//! using the [`differ`](crate::differ), and only writes when they differ.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::api::{ApiResult, CheckmkApi, StatusOutcome, StatusTable};
use crate::differ::{Diff, diff, needs_update, reference_keys};
use crate::http::HttpClient;

static READ: StatusTable = &[
    (200, StatusOutcome::new(false, false, "Object found.")),
    (404, StatusOutcome::new(false, true, "Object not found.")),
];

static UPDATE: StatusTable = &[
    (200, StatusOutcome::new(true, false, "Object updated.")),
    (404, StatusOutcome::new(false, true, "Object not found.")),
    (
        412,
        StatusOutcome::new(false, true, "Object was modified concurrently."),
    ),
];

static DELETE: StatusTable = &[
    (204, StatusOutcome::new(true, false, "Object deleted.")),
    (404, StatusOutcome::new(false, false, "Object not found.")),
];

const IN_DESIRED_STATE: &str = "Object already in desired state.";
const ALREADY_ABSENT: &str = "Object already absent.";

/// Result of a reconciliation together with the change it made or would make.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    /// Result of the last call, or a synthetic one when nothing was sent.
    pub result: ApiResult,
    /// Before/after rendering; empty when the object was already in the desired state.
    pub diff: Diff,
}

#[derive(Serialize)]
struct UpdatePayload<'a> {
    update_attributes: &'a Value,
}

/// Brings one object endpoint such as `objects/host_config/web01` into a desired state.
pub struct ObjectReconciler<'a, C>
where
    C: HttpClient,
{
    api: &'a CheckmkApi<C>,
    endpoint: String,
    dry_run: bool,
}

impl<'a, C> ObjectReconciler<'a, C>
where
    C: HttpClient,
{
    /// Reconciler for the object at `endpoint`.
    pub fn new(api: &'a CheckmkApi<C>, endpoint: impl Into<String>) -> Self {
        Self {
            api,
            endpoint: endpoint.into(),
            dry_run: false,
        }
    }

    /// Only compute the change, never write.
    pub fn dry_run(self, dry_run: bool) -> Self {
        Self { dry_run, ..self }
    }

    /// Updates the object's attributes to `desired` unless they already match.
    pub fn ensure_attributes(&self, desired: &Value) -> ReconcileOutcome {
        let current = self.api.get(&self.endpoint, READ);
        if current.failed {
            return ReconcileOutcome {
                result: current,
                diff: Diff::default(),
            };
        }

        let attributes = attributes(&current.content);
        let keys = reference_keys(desired);
        if !needs_update(desired, &attributes, &keys) {
            debug!(endpoint = %self.endpoint, "{IN_DESIRED_STATE}");
            return ReconcileOutcome {
                result: ApiResult {
                    message: IN_DESIRED_STATE.to_string(),
                    ..current
                },
                diff: Diff::default(),
            };
        }

        let diff = diff(desired, &attributes, &keys, false);
        if self.dry_run {
            info!(endpoint = %self.endpoint, "object would be updated");
            return ReconcileOutcome {
                result: ApiResult {
                    changed: true,
                    message: "Object would be updated.".to_string(),
                    ..current
                },
                diff,
            };
        }

        // without a caching token only an unconditional write is possible
        let etag = if current.etag.is_empty() {
            "*"
        } else {
            current.etag.as_str()
        };
        let result = self.api.put(
            &self.endpoint,
            etag,
            &UpdatePayload {
                update_attributes: desired,
            },
            UPDATE,
        );
        ReconcileOutcome { result, diff }
    }

    /// Deletes the object unless it is already gone.
    pub fn ensure_absent(&self) -> ReconcileOutcome {
        let current = self.api.get(&self.endpoint, READ);
        if current.http_code == 404 {
            debug!(endpoint = %self.endpoint, "{ALREADY_ABSENT}");
            return ReconcileOutcome {
                result: ApiResult::unchanged(ALREADY_ABSENT),
                diff: Diff::default(),
            };
        }
        if current.failed {
            return ReconcileOutcome {
                result: current,
                diff: Diff::default(),
            };
        }

        let attributes = attributes(&current.content);
        let diff = diff(
            &Value::Object(Map::new()),
            &attributes,
            &reference_keys(&attributes),
            true,
        );
        if self.dry_run {
            info!(endpoint = %self.endpoint, "object would be deleted");
            return ReconcileOutcome {
                result: ApiResult {
                    changed: true,
                    message: "Object would be deleted.".to_string(),
                    ..current
                },
                diff,
            };
        }

        let result = self.api.delete(&self.endpoint, DELETE);
        ReconcileOutcome { result, diff }
    }
}

fn attributes(content: &Value) -> Value {
    content
        .pointer("/extensions/attributes")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()))
}
