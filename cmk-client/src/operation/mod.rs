//! Top-level operations. Each one drives one or more REST API calls and reports an
//! [`ApiResult`](crate::api::ApiResult).

pub mod activation;
pub mod bakery;
pub mod discovery;
pub mod reconcile;
