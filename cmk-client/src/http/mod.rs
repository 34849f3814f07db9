//! HTTP transport for the REST API.

mod config;
mod http_client;
#[cfg(feature = "reqwest-http")]
mod reqwest_client;

// export public structs
pub use config::{HttpConfig, HttpConfigError};
pub use http_client::{HttpClient, HttpClientError};

#[cfg(feature = "ureq-http")]
pub use http_client::HttpClientUreq;
#[cfg(feature = "reqwest-http")]
pub use reqwest_client::HttpClientReqwest;

#[cfg(test)]
pub(crate) use http_client::test;
