//! Blocking client for the Checkmk REST API.
//!
//! The crate runs service discovery, change activation and agent baking as background jobs,
//! waits for them, and reconciles configuration objects idempotently. Every operation reports
//! an [`ApiResult`]; only setup problems such as an unsupported server version are errors.
//!
//! ```no_run
//! use cmk_client::http::{HttpClientUreq, HttpConfig};
//! use cmk_client::operation::discovery::{DiscoveryMode, DiscoveryOrchestrator, DiscoveryRequest};
//! use cmk_client::{CheckmkApi, ClientResult};
//!
//! fn discover() -> ClientResult<()> {
//!     let config = HttpConfig::new("https://monitoring.example.com", "central")?
//!         .with_automation_user("automation", "secret")?;
//!     let api = CheckmkApi::new(HttpClientUreq::new(config));
//!     let version = api.server_version()?;
//!
//!     let request = DiscoveryRequest::single("web01", DiscoveryMode::FixAll)
//!         .with_wait_for_completion(true);
//!     let result = DiscoveryOrchestrator::new(&api, &version, request)?.run();
//!     println!("{}: {}", result.http_code, result.message);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod api;
pub use api::{ApiResult, CheckmkApi};

pub mod differ;

pub mod error;
pub use error::{ClientError, ClientResult};

pub mod http;
pub mod job;
pub mod operation;

pub mod version;
pub use version::{CompatibilityRange, ServerVersion};
