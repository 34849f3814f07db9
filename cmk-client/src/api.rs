//! Request execution and response classification.
//!
//! Every call goes through [`CheckmkApi`], which turns the transport response into an
//! [`ApiResult`] by looking the status code up in a per-endpoint [`StatusTable`].

use http::header::{ETAG, IF_MATCH};
use http::{HeaderMap, HeaderValue, Method};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::error::ClientError;
use crate::http::HttpClient;
use crate::version::ServerVersion;

/// Message for status codes missing from a table.
pub const UNKNOWN_STATUS_MESSAGE: &str = "Error calling API";

/// How a status code is reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusOutcome {
    /// The call modified server state.
    pub changed: bool,
    /// The call is an error for the caller.
    pub failed: bool,
    /// Human readable summary.
    pub message: &'static str,
}

impl StatusOutcome {
    /// Shorthand used by the static tables.
    pub const fn new(changed: bool, failed: bool, message: &'static str) -> Self {
        Self {
            changed,
            failed,
            message,
        }
    }
}

/// Status code classification table of one endpoint class.
pub type StatusTable = &'static [(u16, StatusOutcome)];

/// Looks `status` up in `table`; unknown codes are failures.
pub fn classify(table: StatusTable, status: u16) -> StatusOutcome {
    table
        .iter()
        .find(|(code, _)| *code == status)
        .map(|(_, outcome)| *outcome)
        .unwrap_or(StatusOutcome::new(false, true, UNKNOWN_STATUS_MESSAGE))
}

static VERSION: StatusTable = &[(200, StatusOutcome::new(false, false, "Version retrieved."))];

/// Uniform result of every top-level operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResult {
    /// HTTP status code, `0` when no response was received.
    pub http_code: u16,
    /// Summary taken from the status table, or describing the failure.
    pub message: String,
    /// Decoded response body.
    pub content: Value,
    /// Caching token (`ETag`) of the response, empty when absent.
    pub etag: String,
    /// Whether server state changed.
    pub changed: bool,
    /// Whether the call failed.
    pub failed: bool,
}

impl ApiResult {
    /// A failed result for a request that never produced a response.
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self {
            http_code: 0,
            message: message.into(),
            content: empty_object(),
            etag: String::new(),
            changed: false,
            failed: true,
        }
    }

    /// An unchanged, successful result that did not involve a request.
    pub fn unchanged(message: impl Into<String>) -> Self {
        Self {
            http_code: 0,
            message: message.into(),
            content: empty_object(),
            etag: String::new(),
            changed: false,
            failed: false,
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn decode_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return empty_object();
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

/// Entry point for REST API calls on top of an [`HttpClient`].
pub struct CheckmkApi<C>
where
    C: HttpClient,
{
    client: C,
}

impl<C> CheckmkApi<C>
where
    C: HttpClient,
{
    /// Wraps the given transport.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// `GET endpoint`.
    pub fn get(&self, endpoint: &str, codes: StatusTable) -> ApiResult {
        self.fetch(Method::GET, endpoint, HeaderMap::new(), None, codes)
    }

    /// `POST endpoint` with a JSON body.
    pub fn post<B>(&self, endpoint: &str, body: &B, codes: StatusTable) -> ApiResult
    where
        B: Serialize + ?Sized,
    {
        self.fetch_json(Method::POST, endpoint, None, body, codes)
    }

    /// `POST endpoint` with a JSON body and an `If-Match` precondition.
    pub fn post_if_match<B>(
        &self,
        endpoint: &str,
        etag: &str,
        body: &B,
        codes: StatusTable,
    ) -> ApiResult
    where
        B: Serialize + ?Sized,
    {
        self.fetch_json(Method::POST, endpoint, Some(etag), body, codes)
    }

    /// `PUT endpoint` with a JSON body, guarded by the object's `etag`.
    pub fn put<B>(&self, endpoint: &str, etag: &str, body: &B, codes: StatusTable) -> ApiResult
    where
        B: Serialize + ?Sized,
    {
        self.fetch_json(Method::PUT, endpoint, Some(etag), body, codes)
    }

    /// `DELETE endpoint`.
    pub fn delete(&self, endpoint: &str, codes: StatusTable) -> ApiResult {
        self.fetch(Method::DELETE, endpoint, HeaderMap::new(), None, codes)
    }

    fn fetch_json<B>(
        &self,
        method: Method,
        endpoint: &str,
        etag: Option<&str>,
        body: &B,
        codes: StatusTable,
    ) -> ApiResult
    where
        B: Serialize + ?Sized,
    {
        let payload = match serde_json::to_vec(body) {
            Ok(payload) => payload,
            Err(err) => {
                error!(%method, endpoint, %err, "could not encode request body");
                return ApiResult::transport_failure(format!("{UNKNOWN_STATUS_MESSAGE}: {err}"));
            }
        };

        let mut headers = HeaderMap::new();
        if let Some(etag) = etag {
            match HeaderValue::from_str(etag) {
                Ok(value) => {
                    headers.insert(IF_MATCH, value);
                }
                Err(err) => {
                    error!(%method, endpoint, etag, "invalid etag");
                    return ApiResult::transport_failure(format!(
                        "{UNKNOWN_STATUS_MESSAGE}: {err}"
                    ));
                }
            }
        }

        self.fetch(method, endpoint, headers, Some(payload), codes)
    }

    fn fetch(
        &self,
        method: Method,
        endpoint: &str,
        headers: HeaderMap,
        body: Option<Vec<u8>>,
        codes: StatusTable,
    ) -> ApiResult {
        let response = match self.client.send(method.clone(), endpoint, headers, body) {
            Ok(response) => response,
            Err(err) => {
                error!(%method, endpoint, %err, "request failed");
                return ApiResult::transport_failure(format!("{UNKNOWN_STATUS_MESSAGE}: {err}"));
            }
        };

        let http_code = response.status().as_u16();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let content = decode_body(response.body());
        let outcome = classify(codes, http_code);

        if outcome.failed {
            warn!(%method, endpoint, http_code, details = %content, "{}", outcome.message);
        } else {
            debug!(%method, endpoint, http_code, "{}", outcome.message);
        }

        ApiResult {
            http_code,
            message: outcome.message.to_string(),
            content,
            etag,
            changed: outcome.changed,
            failed: outcome.failed,
        }
    }

    /// Asks the server for its version.
    ///
    /// The returned version may be invalid if the server reports something unparsable; that is
    /// detected when the version is compared.
    ///
    /// # Errors
    ///
    /// Fails when the request fails or the response does not carry a version.
    pub fn server_version(&self) -> Result<ServerVersion, ClientError> {
        let result = self.get("version", VERSION);
        if result.failed {
            return Err(ClientError::VersionUnavailable(result.message));
        }

        result
            .content
            .pointer("/versions/checkmk")
            .and_then(Value::as_str)
            .map(ServerVersion::parse)
            .ok_or_else(|| {
                ClientError::VersionUnavailable("response carries no checkmk version".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::http::HttpClientError;
    use crate::http::test::{MockHttpClientMockall, empty_response, json_response, sent_json};

    static TABLE: StatusTable = &[
        (200, StatusOutcome::new(true, false, "done")),
        (409, StatusOutcome::new(false, false, "busy")),
    ];

    #[test]
    fn unknown_codes_are_failures() {
        assert_eq!(classify(TABLE, 200), StatusOutcome::new(true, false, "done"));
        assert_eq!(classify(TABLE, 409), StatusOutcome::new(false, false, "busy"));
        assert_eq!(
            classify(TABLE, 500),
            StatusOutcome::new(false, true, UNKNOWN_STATUS_MESSAGE)
        );
        assert_eq!(
            classify(&[], 200),
            StatusOutcome::new(false, true, UNKNOWN_STATUS_MESSAGE)
        );
    }

    #[test]
    fn response_is_classified_and_decoded() {
        let mut client = MockHttpClientMockall::new();
        client.should_send(
            Method::GET,
            "objects/host_config/web01",
            json_response(200, json!({"id": "web01"})),
        );

        let result = CheckmkApi::new(client).get("objects/host_config/web01", TABLE);

        assert_eq!(
            result,
            ApiResult {
                http_code: 200,
                message: "done".to_string(),
                content: json!({"id": "web01"}),
                etag: "\"d41d8cd98f00b204\"".to_string(),
                changed: true,
                failed: false,
            }
        );
    }

    #[test]
    fn empty_and_non_json_bodies() {
        let mut client = MockHttpClientMockall::new();
        client.should_send(Method::DELETE, "objects/host_config/a", empty_response(409));
        client.should_send(
            Method::DELETE,
            "objects/host_config/b",
            http::Response::builder()
                .status(500)
                .body(b"Internal Server Error".to_vec())
                .unwrap(),
        );
        let api = CheckmkApi::new(client);

        let result = api.delete("objects/host_config/a", TABLE);
        assert_eq!(result.content, json!({}));
        assert!(!result.failed);
        assert_eq!(result.etag, "");

        let result = api.delete("objects/host_config/b", TABLE);
        assert_eq!(result.content, json!("Internal Server Error"));
        assert!(result.failed);
        assert_eq!(result.message, UNKNOWN_STATUS_MESSAGE);
    }

    #[test]
    fn transport_errors_have_code_zero() {
        let mut client = MockHttpClientMockall::new();
        client.should_not_send(HttpClientError::UreqError("connection refused".to_string()));

        let result = CheckmkApi::new(client).get("version", TABLE);

        assert_eq!(result.http_code, 0);
        assert!(result.failed);
        assert!(!result.changed);
        assert!(result.message.contains("connection refused"));
    }

    #[test]
    fn put_sends_body_and_if_match() {
        let mut client = MockHttpClientMockall::new();
        client
            .expect_send()
            .withf(|method, endpoint, headers, body| {
                *method == Method::PUT
                    && endpoint == "objects/host_config/web01"
                    && headers.get(IF_MATCH).is_some_and(|v| v == "\"abc\"")
                    && sent_json(body) == json!({"update_attributes": {"alias": "web"}})
            })
            .once()
            .return_once(|_, _, _, _| Ok(json_response(200, json!({}))));

        let result = CheckmkApi::new(client).put(
            "objects/host_config/web01",
            "\"abc\"",
            &json!({"update_attributes": {"alias": "web"}}),
            TABLE,
        );

        assert!(result.changed);
    }

    #[test]
    fn invalid_etag_is_rejected_before_sending() {
        let client = MockHttpClientMockall::new();
        let result = CheckmkApi::new(client).put("objects/x", "bad\netag", &json!({}), TABLE);

        assert!(result.failed);
        assert_eq!(result.http_code, 0);
    }

    #[test]
    fn server_version_is_read_from_version_endpoint() {
        let mut client = MockHttpClientMockall::new();
        client.should_send(
            Method::GET,
            "version",
            json_response(
                200,
                json!({
                    "site": "central",
                    "versions": {"checkmk": "2.1.0p31.cre"},
                    "edition": "cre",
                }),
            ),
        );

        let version = CheckmkApi::new(client).server_version().unwrap();

        assert_eq!(version, ServerVersion::parse("2.1.0p31"));
        assert!(version.is_raw_edition());
    }

    #[test]
    fn server_version_failures() {
        let mut client = MockHttpClientMockall::new();
        client.should_send(Method::GET, "version", empty_response(401));
        assert_matches!(
            CheckmkApi::new(client).server_version(),
            Err(ClientError::VersionUnavailable(msg)) if msg == UNKNOWN_STATUS_MESSAGE
        );

        let mut client = MockHttpClientMockall::new();
        client.should_send(Method::GET, "version", json_response(200, json!({"site": "x"})));
        assert_matches!(
            CheckmkApi::new(client).server_version(),
            Err(ClientError::VersionUnavailable(_))
        );
    }
}
