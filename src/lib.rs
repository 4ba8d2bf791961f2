//! # StrategyForge Client
//!
//! Data-access layer for the StrategyForge backend: a query, cache and
//! connection-pool stack in front of a PostgREST-style HTTP API (the
//! managed Postgres where generated trading-robot sources and their
//! strategies live).
//!
//! ## Features
//! - TTL + LRU query result cache keyed by normalized query signatures
//! - Request deduplication: concurrent identical reads share one backend call
//! - Logical connection pool with read/write roles, region preference and
//!   health checking
//! - Declarative query builder with deterministic sort tie-breaking
//! - Chunked batch writes that tolerate partial failure
//! - One shared retry policy with exponential backoff and jitter
//! - Per-query metrics with a retention window
//!
//! ## Architecture
//! A request flows `QuerySpec → cache check → deduplicator → pool →
//! transport`, with a metric recorded at the end either way. Everything is
//! owned by a [`ForgeClient`] built once at startup; `shutdown()` stops the
//! background tasks (cache sweep, metric pruning, pool health loop) and
//! closes the pool deterministically.
//!
//! ## Example
//! ```no_run
//! use strategyforge_client::{ClientConfig, ForgeClient, FilterOp, QuerySpec};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), strategyforge_client::ClientError> {
//! let client = ForgeClient::new(ClientConfig::from_env()?)?;
//!
//! let active = QuerySpec::select("strategies")
//!     .filter("status", FilterOp::Eq, json!("active"))
//!     .order_by("updated_at", true)
//!     .page(20, 0);
//! let rows = client.query(&active).await?;
//! println!("{} active strategies", rows.len());
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod dedupe;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod query;
pub mod retry;
pub mod tasks;
pub mod transport;

pub use batch::{BatchFailure, BatchOutcome, run_batch};
pub use cache::{CacheStats, QueryCache};
pub use client::ForgeClient;
pub use config::{
    BackendConfig, BatchConfig, CacheConfig, ClientConfig, EndpointConfig, MetricsConfig,
    PoolConfig, RetryConfig,
};
pub use dedupe::RequestDeduplicator;
pub use engine::QueryEngine;
pub use error::ClientError;
pub use metrics::{MetricsRecorder, MetricsSummary, QueryMetric};
pub use pool::{ConnectionPool, PoolStats, Role};
pub use query::{Filter, FilterOp, Operation, Page, QuerySpec, Sort};
pub use retry::RetryPolicy;
pub use tasks::TaskScheduler;
pub use transport::{HttpTransport, Method, QueryRequest, Row, Transport};
