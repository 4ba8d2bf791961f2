//! # Client Module
//!
//! [`ForgeClient`] owns the whole stack: pool, cache, deduplicator, engine,
//! metrics and the background scheduler. It is constructed once at
//! application start from a validated [`ClientConfig`] and passed by
//! reference to consumers; `shutdown()` releases everything
//! deterministically. There is no global instance.

use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::batch::{BatchOutcome, run_batch};
use crate::cache::{CacheStats, QueryCache};
use crate::config::{ClientConfig, EndpointConfig};
use crate::dedupe::RequestDeduplicator;
use crate::engine::QueryEngine;
use crate::error::ClientError;
use crate::metrics::{MetricsRecorder, MetricsSummary, QueryMetric};
use crate::pool::{ConnectionFactory, ConnectionPool, PoolStats};
use crate::query::QuerySpec;
use crate::retry::RetryPolicy;
use crate::tasks::TaskScheduler;
use crate::transport::{HttpTransport, Row, Transport};

pub struct ForgeClient {
    config: ClientConfig,
    cache: Arc<QueryCache>,
    pool: Arc<ConnectionPool>,
    metrics: Arc<MetricsRecorder>,
    engine: Arc<QueryEngine>,
    scheduler: TaskScheduler,
}

impl ForgeClient {
    /// Build a client talking HTTP to the configured endpoints.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let backend = config.backend.clone();
        let factory: Box<ConnectionFactory> = Box::new(move |endpoint: &EndpointConfig| {
            let transport =
                HttpTransport::new(&endpoint.url, &backend.api_key, backend.request_timeout)?;
            Ok(Arc::new(transport) as Arc<dyn Transport>)
        });
        Self::with_factory(config, factory)
    }

    /// Build a client with an injected transport factory.
    pub fn with_factory(
        config: ClientConfig,
        factory: Box<ConnectionFactory>,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let cache = Arc::new(QueryCache::new(config.cache.clone()));
        let metrics = Arc::new(MetricsRecorder::new(config.metrics.clone()));
        let pool = Arc::new(ConnectionPool::new(
            config.pool.clone(),
            config.backend.endpoints.clone(),
            factory,
        ));
        let engine = Arc::new(QueryEngine::new(
            Arc::clone(&cache),
            Arc::new(RequestDeduplicator::new()),
            Arc::clone(&pool),
            Arc::new(RetryPolicy::new(config.retry.clone())),
            Arc::clone(&metrics),
        ));

        let scheduler = TaskScheduler::new();
        {
            let cache = Arc::clone(&cache);
            scheduler.spawn_periodic("cache-sweep", config.cache.sweep_interval, move || {
                let cache = Arc::clone(&cache);
                async move {
                    cache.sweep();
                }
            });
        }
        {
            let metrics = Arc::clone(&metrics);
            scheduler.spawn_periodic("metrics-prune", config.metrics.prune_interval, move || {
                let metrics = Arc::clone(&metrics);
                async move {
                    metrics.prune();
                }
            });
        }
        {
            let pool = Arc::clone(&pool);
            scheduler.spawn_periodic(
                "pool-health",
                config.pool.health_check_interval,
                move || {
                    let pool = Arc::clone(&pool);
                    async move {
                        pool.run_health_checks().await;
                    }
                },
            );
        }

        info!(
            "🔌 StrategyForge client ready: {} endpoints, pool cap {} per role",
            config.backend.endpoints.len(),
            config.pool.max_per_role
        );

        Ok(Self {
            config,
            cache,
            pool,
            metrics,
            engine,
            scheduler,
        })
    }

    /// Execute any query spec through the full stack.
    pub async fn query(&self, spec: &QuerySpec) -> Result<Arc<Vec<Row>>, ClientError> {
        self.engine.execute(spec).await
    }

    /// Execute preferring connections in `region`.
    pub async fn query_in_region(
        &self,
        spec: &QuerySpec,
        region: &str,
    ) -> Result<Arc<Vec<Row>>, ClientError> {
        self.engine.execute_in_region(spec, Some(region)).await
    }

    /// Bulk insert: rows are chunked per the batch config and bad records
    /// are isolated instead of failing the whole import.
    pub async fn insert_batch(&self, table: &str, rows: Vec<Value>) -> BatchOutcome<Value> {
        run_batch(rows, &self.config.batch, |chunk| {
            let spec = QuerySpec::insert(table, Value::Array(chunk));
            async move { self.engine.execute(&spec).await.map(|_| ()) }
        })
        .await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    pub fn metrics_snapshot(&self) -> Vec<QueryMetric> {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stop background tasks, close the pool and drop cached state. New
    /// and pending operations fail with [`ClientError::Shutdown`].
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.pool.close();
        self.cache.clear();
        info!("✅ StrategyForge client shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::query::FilterOp;
    use crate::transport::mock::MockTransport;
    use serde_json::json;
    use std::time::Duration;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn client_with(transport: MockTransport) -> (ForgeClient, Arc<MockTransport>) {
        init_tracing();
        let transport = Arc::new(transport);
        let shared = Arc::clone(&transport);
        let factory: Box<ConnectionFactory> =
            Box::new(move |_| Ok(Arc::clone(&shared) as Arc<dyn Transport>));
        let client = ForgeClient::with_factory(test_config(), factory).unwrap();
        (client, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_read_flow() {
        let (client, transport) = client_with(MockTransport::returning(vec![json!({ "id": 1 })]));
        let spec = QuerySpec::select("strategies").filter("status", FilterOp::Eq, json!("active"));

        let rows = client.query(&spec).await.unwrap();
        assert_eq!(rows.len(), 1);
        client.query(&spec).await.unwrap();
        assert_eq!(transport.call_count(), 1);

        let summary = client.metrics_summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.cache_hits, 1);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_sweep_expires_entries_without_lookups() {
        let (client, _) = client_with(MockTransport::returning(vec![json!({ "id": 1 })]));
        let spec = QuerySpec::select("strategies");

        client.query(&spec).await.unwrap();
        assert_eq!(client.cache_stats().entries, 1);

        // default TTL is 30s, sweep interval 10s; the background task must
        // clear the entry with no further lookups
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(client.cache_stats().entries, 0);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_batch_isolates_bad_rows() {
        let (client, _) = client_with(MockTransport::with_handler(|request| {
            let body = request.body.as_ref().and_then(|b| b.as_array()).cloned();
            let poisoned = body
                .unwrap_or_default()
                .iter()
                .any(|row| row.get("name") == Some(&json!("bad")));
            if poisoned {
                Err(ClientError::Validation("row rejected".into()))
            } else {
                Ok(vec![])
            }
        }));

        let rows = vec![
            json!({ "name": "a" }),
            json!({ "name": "b" }),
            json!({ "name": "bad" }),
            json!({ "name": "d" }),
        ];
        let outcome = client.insert_batch("strategies", rows).await;
        assert_eq!(outcome.succeeded.len(), 3);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].item, json!({ "name": "bad" }));
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_fail_after_shutdown() {
        let (client, _) = client_with(MockTransport::returning(vec![]));
        client.shutdown().await;

        let result = client.query(&QuerySpec::select("strategies")).await;
        assert!(matches!(result, Err(ClientError::Shutdown)));
    }
}
