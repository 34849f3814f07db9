//! # Synchronous HTTP Client Module
use http::{HeaderMap, Method, Response};

/// An enumeration of potential errors related to the HTTP client.
#[derive(thiserror::Error, Debug)]
pub enum HttpClientError {
    /// Represents ureq crate error.
    #[error("`{0}`")]
    UreqError(String),
    /// Represents reqwest crate error.
    #[error("`{0}`")]
    ReqwestError(String),
    /// The endpoint could not be resolved against the base url.
    #[error("`{0}`")]
    InvalidUrl(#[from] url::ParseError),
    /// Represents an http crate request or response building error.
    #[error("`{0}`")]
    HTTPBodyError(#[from] http::Error),
}

/// A synchronous trait that defines the transport used to reach the REST API.
///
/// `endpoint` is relative to the configured base url. Implementations must not follow redirects
/// and must return non-2xx responses as `Ok`, since callers classify every status code.
pub trait HttpClient {
    /// Sends one request and returns the full response.
    fn send(
        &self,
        method: Method,
        endpoint: &str,
        headers: HeaderMap,
        body: Option<Vec<u8>>,
    ) -> Result<Response<Vec<u8>>, HttpClientError>;
}

#[cfg(feature = "ureq-http")]
pub use ureq_client::HttpClientUreq;

#[cfg(feature = "ureq-http")]
mod ureq_client {
    use http::{HeaderMap, Method, Response};
    use url::Url;

    use super::{HttpClient, HttpClientError};
    use crate::http::HttpConfig;

    /// An implementation of the `HttpClient` trait using the ureq library.
    pub struct HttpClientUreq {
        client: ureq::Agent,
        base_url: Url,
        headers: HeaderMap,
    }

    impl HttpClientUreq {
        /// Construct a new `HttpClientUreq` from the given `HttpConfig`.
        ///
        /// # Examples
        ///
        /// ```
        /// use cmk_client::http::{HttpClientUreq, HttpConfig};
        ///
        /// let config = HttpConfig::new("https://monitoring.example.com", "mysite").unwrap();
        /// let client = HttpClientUreq::new(config);
        /// ```
        pub fn new(config: HttpConfig) -> Self {
            Self {
                client: ureq::Agent::from(&config),
                base_url: config.base_url,
                headers: config.headers,
            }
        }
    }

    /// Build a ureq::Agent from HttpConfig
    impl From<&HttpConfig> for ureq::Agent {
        fn from(value: &HttpConfig) -> Self {
            let tls_config = ureq::tls::TlsConfig::builder()
                .disable_verification(!value.validate_certs)
                .build();

            ureq::Agent::new_with_config(
                ureq::Agent::config_builder()
                    .timeout_global(Some(value.timeout))
                    .http_status_as_error(false)
                    .max_redirects(0)
                    .max_redirects_will_error(false)
                    .tls_config(tls_config)
                    .build(),
            )
        }
    }

    impl HttpClient for HttpClientUreq {
        fn send(
            &self,
            method: Method,
            endpoint: &str,
            headers: HeaderMap,
            body: Option<Vec<u8>>,
        ) -> Result<Response<Vec<u8>>, HttpClientError> {
            let url = self.base_url.join(endpoint)?;
            tracing::trace!(%method, %url, "sending request");

            let mut req = http::Request::builder().method(method).uri(url.as_str());
            for (name, value) in super::merge_headers(&self.headers, headers).iter() {
                req = req.header(name, value);
            }

            let response = match body {
                Some(body) => self.client.run(req.body(body)?),
                None => self.client.run(req.body(())?),
            }
            .map_err(|e| HttpClientError::UreqError(e.to_string()))?;

            build_response(response)
        }
    }

    fn build_response(
        response: http::Response<ureq::Body>,
    ) -> Result<Response<Vec<u8>>, HttpClientError> {
        let (parts, mut body) = response.into_parts();
        let buf = body
            .read_to_vec()
            .map_err(|e| HttpClientError::UreqError(e.to_string()))?;

        Ok(Response::from_parts(parts, buf))
    }
}

/// Overlays per-request headers on the configured defaults.
pub(super) fn merge_headers(defaults: &HeaderMap, extra: HeaderMap) -> HeaderMap {
    let mut merged = defaults.clone();
    for (name, value) in extra.iter() {
        merged.insert(name.clone(), value.clone());
    }
    merged
}
