//! In-memory transport used by the test suites.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::ClientError;
use crate::transport::{QueryRequest, Row, Transport};

type Handler = dyn Fn(&QueryRequest) -> Result<Vec<Row>, ClientError> + Send + Sync;

/// Counting mock: every `execute` bumps `calls`, runs the optional latency,
/// then delegates to the handler.
pub(crate) struct MockTransport {
    pub calls: AtomicUsize,
    pub health_calls: AtomicUsize,
    latency: Option<Duration>,
    handler: Arc<Handler>,
    health_ok: std::sync::atomic::AtomicBool,
}

impl MockTransport {
    pub fn returning(rows: Vec<Row>) -> Self {
        Self::with_handler(move |_| Ok(rows.clone()))
    }

    pub fn failing(error: ClientError) -> Self {
        Self::with_handler(move |_| Err(error.clone()))
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&QueryRequest) -> Result<Vec<Row>, ClientError> + Send + Sync + 'static,
    {
        Self {
            calls: AtomicUsize::new(0),
            health_calls: AtomicUsize::new(0),
            latency: None,
            handler: Arc::new(handler),
            health_ok: std::sync::atomic::AtomicBool::new(true),
        }
    }

    /// Simulated backend latency, driven by the paused tokio clock in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.health_ok.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: &QueryRequest) -> Result<Vec<Row>, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        (self.handler)(request)
    }

    async fn health_check(&self) -> Result<(), ClientError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        if self.health_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::transport("mock backend unhealthy"))
        }
    }
}
