//! # Transport Module
//!
//! The boundary to the backend-as-a-service API. Everything above this
//! module treats the backend as an opaque async `execute(request) -> rows`;
//! the concrete implementation speaks PostgREST-style HTTP with bearer-token
//! auth.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpTransport;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ClientError;

/// A single result row, opaque to this layer.
pub type Row = Value;

/// HTTP verb for a rendered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

/// A fully rendered backend request: path, query string pairs and optional
/// JSON body. Produced by the query builder, consumed by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub method: Method,
    /// Table path relative to the REST root, e.g. `/rest/v1/strategies`.
    pub path: String,
    /// Query-string pairs in canonical order.
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Opaque async backend executor.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a rendered request and return the result rows.
    ///
    /// In-flight futures are cancel-safe: dropping the future aborts the
    /// underlying call.
    async fn execute(&self, request: &QueryRequest) -> Result<Vec<Row>, ClientError>;

    /// Cheap liveness probe used by the pool's health loop.
    async fn health_check(&self) -> Result<(), ClientError>;
}
