//! # Blocking reqwest transport
use http::{HeaderMap, Method, Response};
use url::Url;

use super::http_client::{HttpClient, HttpClientError, merge_headers};
use crate::http::HttpConfig;

/// An implementation of the `HttpClient` trait using the reqwest blocking client.
pub struct HttpClientReqwest {
    client: reqwest::blocking::Client,
    base_url: Url,
    headers: HeaderMap,
}

impl HttpClientReqwest {
    /// Construct a new `HttpClientReqwest` from the given `HttpConfig`.
    ///
    /// # Errors
    ///
    /// Fails when the underlying TLS backend cannot be initialised.
    pub fn new(config: HttpConfig) -> Result<Self, HttpClientError> {
        Ok(Self {
            client: reqwest::blocking::Client::try_from(&config)?,
            base_url: config.base_url,
            headers: config.headers,
        })
    }
}

/// Implement TryFrom trait to create a reqwest blocking client from HttpConfig
impl TryFrom<&HttpConfig> for reqwest::blocking::Client {
    type Error = HttpClientError;
    fn try_from(value: &HttpConfig) -> Result<Self, Self::Error> {
        reqwest::blocking::Client::builder()
            .timeout(value.timeout)
            .danger_accept_invalid_certs(!value.validate_certs)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| HttpClientError::ReqwestError(e.to_string()))
    }
}

impl HttpClient for HttpClientReqwest {
    fn send(
        &self,
        method: Method,
        endpoint: &str,
        headers: HeaderMap,
        body: Option<Vec<u8>>,
    ) -> Result<Response<Vec<u8>>, HttpClientError> {
        let url = self.base_url.join(endpoint)?;
        tracing::trace!(%method, %url, "sending request");

        let mut req = self
            .client
            .request(method, url.as_str())
            .headers(merge_headers(&self.headers, headers));
        if let Some(body) = body {
            req = req.body(body);
        }

        let response = req
            .send()
            .map_err(|e| HttpClientError::ReqwestError(e.to_string()))?;

        let mut builder = Response::builder()
            .status(response.status())
            .version(response.version());
        for (name, value) in response.headers() {
            builder = builder.header(name, value);
        }
        let buf = response
            .bytes()
            .map_err(|e| HttpClientError::ReqwestError(e.to_string()))?;

        Ok(builder.body(buf.to_vec())?)
    }
}
