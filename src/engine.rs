//! # Query Engine
//!
//! Executes validated query specs through the cache → deduplicator → pool →
//! transport stack and records a metric for every execution, success or
//! failure.
//!
//! Reads: cache check first; on a miss the normalized signature doubles as
//! the deduplication key, so concurrent identical reads share one backend
//! call, and the leader stores the result back into the cache. Writes
//! bypass the cache entirely, run on a write-role connection and invalidate
//! the table's cache tag on success.

use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::QueryCache;
use crate::dedupe::RequestDeduplicator;
use crate::error::ClientError;
use crate::metrics::{MetricsRecorder, QueryMetric};
use crate::pool::{ConnectionPool, Role};
use crate::query::QuerySpec;
use crate::retry::RetryPolicy;
use crate::transport::Row;

pub struct QueryEngine {
    cache: Arc<QueryCache>,
    dedupe: Arc<RequestDeduplicator>,
    pool: Arc<ConnectionPool>,
    retry: Arc<RetryPolicy>,
    metrics: Arc<MetricsRecorder>,
}

impl QueryEngine {
    pub fn new(
        cache: Arc<QueryCache>,
        dedupe: Arc<RequestDeduplicator>,
        pool: Arc<ConnectionPool>,
        retry: Arc<RetryPolicy>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            cache,
            dedupe,
            pool,
            retry,
            metrics,
        }
    }

    /// Execute a spec with no region preference.
    pub async fn execute(&self, spec: &QuerySpec) -> Result<Arc<Vec<Row>>, ClientError> {
        self.execute_in_region(spec, None).await
    }

    /// Execute a spec, preferring pool connections in `region` when one is
    /// healthy and idle there.
    pub async fn execute_in_region(
        &self,
        spec: &QuerySpec,
        region: Option<&str>,
    ) -> Result<Arc<Vec<Row>>, ClientError> {
        spec.validate()?;
        let started = Instant::now();

        if spec.operation.is_read() {
            self.execute_read(spec, region, started).await
        } else {
            self.execute_write(spec, region, started).await
        }
    }

    async fn execute_read(
        &self,
        spec: &QuerySpec,
        region: Option<&str>,
        started: Instant,
    ) -> Result<Arc<Vec<Row>>, ClientError> {
        let key = spec.cache_key();

        if let Some(rows) = self.cache.get(&key) {
            debug!("cache hit for {key}");
            self.record(spec, started, rows.len(), true, true);
            return Ok(rows);
        }

        let pool = Arc::clone(&self.pool);
        let retry = Arc::clone(&self.retry);
        let cache = Arc::clone(&self.cache);
        let leader_spec = spec.clone();
        let leader_key = key.clone();
        let leader_region = region.map(str::to_string);

        let result = self
            .dedupe
            .run(&key, async move {
                let rows = run_on_pool(
                    &pool,
                    &retry,
                    &leader_spec,
                    Role::Read,
                    leader_region.as_deref(),
                )
                .await?;
                cache.set(
                    &leader_key,
                    Arc::new(rows.clone()),
                    None,
                    vec![leader_spec.table.clone()],
                );
                Ok(rows)
            })
            .await;

        match &result {
            Ok(rows) => self.record(spec, started, rows.len(), false, true),
            Err(_) => self.record(spec, started, 0, false, false),
        }
        result
    }

    async fn execute_write(
        &self,
        spec: &QuerySpec,
        region: Option<&str>,
        started: Instant,
    ) -> Result<Arc<Vec<Row>>, ClientError> {
        let result = run_on_pool(&self.pool, &self.retry, spec, Role::Write, region).await;

        match result {
            Ok(rows) => {
                let invalidated = self.cache.invalidate(&spec.table);
                if invalidated > 0 {
                    debug!(
                        "invalidated {invalidated} cached queries for table {}",
                        spec.table
                    );
                }
                self.record(spec, started, rows.len(), false, true);
                Ok(Arc::new(rows))
            }
            Err(err) => {
                self.record(spec, started, 0, false, false);
                Err(err)
            }
        }
    }

    fn record(
        &self,
        spec: &QuerySpec,
        started: Instant,
        result_count: usize,
        cache_hit: bool,
        success: bool,
    ) {
        self.metrics.record(QueryMetric {
            query_type: spec.query_type(),
            duration_ms: started.elapsed().as_millis() as u64,
            result_count,
            cache_hit,
            success,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Acquire, execute, retry. Connection-level failures flag the connection
/// so the pool excludes it on return.
async fn run_on_pool(
    pool: &ConnectionPool,
    retry: &RetryPolicy,
    spec: &QuerySpec,
    role: Role,
    region: Option<&str>,
) -> Result<Vec<Row>, ClientError> {
    let request = spec.render();
    let what = spec.query_type();

    retry
        .run(&what, || async {
            let mut guard = pool.acquire(role, region).await?;
            let result = guard.transport().execute(&request).await;
            if matches!(
                result,
                Err(ClientError::Transport { status: None, .. }) | Err(ClientError::Timeout(_))
            ) {
                guard.mark_unhealthy();
            }
            result
        })
        .await
}
