//! This module defines the crate level error type.

use thiserror::Error;

use crate::http::{HttpClientError, HttpConfigError};
use crate::operation::bakery::BakeryError;
use crate::operation::discovery::DiscoveryError;

/// Represents the errors that stop an operation before it can report an `ApiResult`.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Represents an HTTP configuration error.
    #[error("`{0}`")]
    HttpConfig(#[from] HttpConfigError),
    /// Represents an HTTP client error.
    #[error("`{0}`")]
    HttpClient(#[from] HttpClientError),
    /// The server version could not be determined.
    #[error("could not determine server version: {0}")]
    VersionUnavailable(String),
    /// Represents a discovery setup error.
    #[error("`{0}`")]
    Discovery(#[from] DiscoveryError),
    /// Represents an agent bakery setup error.
    #[error("`{0}`")]
    Bakery(#[from] BakeryError),
}

/// A type alias for results of client setup.
pub type ClientResult<T> = Result<T, ClientError>;
