//! # Checkmk REST API connection configuration.

use std::str::FromStr;
use std::time::Duration;

use http::header::{AUTHORIZATION, InvalidHeaderName, InvalidHeaderValue};
use http::{HeaderMap, HeaderName, HeaderValue};
use url::{ParseError, Url};

/// Default client timeout is 30 seconds
const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Path of the REST API below a site.
const API_PATH: &str = "check_mk/api/1.0/";

/// A struct representing the configuration for the internal HTTP client.
///
/// # Examples
///
/// Creating a new `HttpConfig` for a site:
///
/// ```rust
/// use cmk_client::http::HttpConfig;
///
/// let config = HttpConfig::new("https://monitoring.example.com", "mysite").unwrap();
/// assert_eq!(
///     config.base_url().as_str(),
///     "https://monitoring.example.com/mysite/check_mk/api/1.0/"
/// );
/// ```
///
/// Authenticating as an automation user:
///
/// ```rust
/// use cmk_client::http::HttpConfig;
///
/// let config = HttpConfig::new("https://monitoring.example.com", "mysite")
///     .unwrap()
///     .with_automation_user("automation", "s3cr3t")
///     .unwrap();
/// ```
///
/// Skipping certificate validation and setting a custom timeout:
///
/// ```rust
/// use std::time::Duration;
/// use cmk_client::http::HttpConfig;
///
/// let config = HttpConfig::new("https://monitoring.example.com", "mysite")
///     .unwrap()
///     .with_validate_certs(false)
///     .with_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub(super) base_url: Url,
    pub(super) headers: HeaderMap,
    pub(super) timeout: Duration,
    pub(super) validate_certs: bool,
}

/// An enumeration of potential errors related to the HTTP configuration.
#[derive(thiserror::Error, Debug)]
pub enum HttpConfigError {
    /// HTTP client with an invalid url.
    #[error("`{0}`")]
    InvalidUrl(#[from] ParseError),
    /// HTTP client with an invalid header value.
    #[error("`{0}`")]
    InvalidHeader(#[from] InvalidHeaderValue),
    /// HTTP client with an invalid header name.
    #[error("`{0}`")]
    InvalidHeaderName(#[from] InvalidHeaderName),
    /// The site name is empty.
    #[error("site name must not be empty")]
    EmptySite,
}

impl HttpConfig {
    /// Construct a new `HttpConfig` for the REST API of `site` on `server_url`.
    ///
    /// # Errors
    ///
    /// This function will return an error if the resulting URL is not valid or the site is empty.
    pub fn new(server_url: &str, site: &str) -> Result<Self, HttpConfigError> {
        let site = site.trim_matches('/');
        if site.is_empty() {
            return Err(HttpConfigError::EmptySite);
        }
        let base_url = Url::from_str(&format!(
            "{}/{}/{}",
            server_url.trim_end_matches('/'),
            site,
            API_PATH
        ))?;

        Ok(Self {
            base_url,
            headers: api_headers(),
            timeout: DEFAULT_CLIENT_TIMEOUT,
            validate_certs: true,
        })
    }

    /// Authenticate every request as the given automation user.
    ///
    /// # Errors
    ///
    /// Fails when the credentials cannot be expressed as a header value.
    pub fn with_automation_user(
        mut self,
        user: &str,
        secret: &str,
    ) -> Result<Self, HttpConfigError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {user} {secret}"))?;
        // keeps the secret out of `Debug` output
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    /// Optionally include custom headers into the HTTP requests.
    ///
    /// If the key already exists in the current header map, the new value overwrites the old
    /// one.
    ///
    /// # Errors
    ///
    /// This function will return an error if the provided key or value is not valid.
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Result<Self, HttpConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (ref key, ref val) in headers {
            let _ = self
                .headers
                .insert(HeaderName::from_str(key.as_ref())?, val.as_ref().parse()?);
        }
        Ok(self)
    }

    /// Define a custom timeout for the http client.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Enable or disable TLS certificate validation.
    pub fn with_validate_certs(self, validate_certs: bool) -> Self {
        Self {
            validate_certs,
            ..self
        }
    }

    /// Root URL every endpoint is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

/// Returns a HeaderMap pre-populated with the headers every REST API call carries
fn api_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();

    headers.insert("Accept", HeaderValue::from_static("application/json"));
    headers.insert("Content-Type", HeaderValue::from_static("application/json"));

    headers
}
