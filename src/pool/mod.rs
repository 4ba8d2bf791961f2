//! # Pool Module
//!
//! Logical connection pool over the configured backend endpoints.
//!
//! Selection order on `acquire`: a healthy idle connection in the preferred
//! region, then any healthy idle connection of the role, then lazy creation
//! up to the per-role cap, then a bounded wait for a release. Waiting past
//! the acquire timeout surfaces [`ClientError::PoolExhausted`].
//!
//! Health checks run from the scheduler's periodic task; a connection
//! failing the configured number of consecutive checks is excluded from
//! selection until a later check passes, with a cooldown between attempts.

pub mod connection;

pub use connection::{PooledConnection, Role};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{EndpointConfig, PoolConfig};
use crate::error::ClientError;
use crate::transport::Transport;

/// Builds a transport for an endpoint. Injected so tests can supply mocks.
pub type ConnectionFactory =
    dyn Fn(&EndpointConfig) -> Result<Arc<dyn Transport>, ClientError> + Send + Sync;

struct PoolState {
    idle: Vec<PooledConnection>,
    /// Live (idle + checked-out) connections per role. Never exceeds
    /// `max_per_role`.
    live: HashMap<Role, usize>,
    /// Round-robin cursor per role for lazy creation.
    next_endpoint: HashMap<Role, usize>,
}

struct PoolInner {
    config: PoolConfig,
    endpoints: Vec<EndpointConfig>,
    factory: Box<ConnectionFactory>,
    state: Mutex<PoolState>,
    released: Notify,
    closed: AtomicBool,
}

pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

/// Checked-out connection; returns itself to the pool on drop.
pub struct ConnectionGuard {
    inner: Arc<PoolInner>,
    conn: Option<PooledConnection>,
}

/// Pool counters for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub live_read: usize,
    pub live_write: usize,
    pub idle: usize,
    pub unhealthy: usize,
}

impl ConnectionPool {
    pub fn new(
        config: PoolConfig,
        endpoints: Vec<EndpointConfig>,
        factory: Box<ConnectionFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                endpoints,
                factory,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    live: HashMap::new(),
                    next_endpoint: HashMap::new(),
                }),
                released: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Acquire a connection of `role`, preferring `preferred_region` when a
    /// healthy idle one is available there.
    pub async fn acquire(
        &self,
        role: Role,
        preferred_region: Option<&str>,
    ) -> Result<ConnectionGuard, ClientError> {
        let timeout = self.inner.config.acquire_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(ClientError::Shutdown);
            }

            // Register for release notifications before checking, so a
            // release between the check and the wait is not missed.
            let released = self.inner.released.notified();
            tokio::pin!(released);

            if let Some(conn) = self.try_checkout(role, preferred_region)? {
                return Ok(ConnectionGuard {
                    inner: Arc::clone(&self.inner),
                    conn: Some(conn),
                });
            }

            if tokio::time::timeout_at(deadline, &mut released).await.is_err() {
                warn!("pool exhausted for role {role} after {:?}", timeout);
                return Err(ClientError::PoolExhausted {
                    role,
                    waited_ms: timeout.as_millis() as u64,
                });
            }
        }
    }

    /// One selection pass under the lock. `Ok(None)` means "wait".
    fn try_checkout(
        &self,
        role: Role,
        preferred_region: Option<&str>,
    ) -> Result<Option<PooledConnection>, ClientError> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        let pick = |idle: &[PooledConnection], region: Option<&str>| {
            idle.iter().position(|c| {
                c.role == role
                    && c.healthy
                    && region.map(|r| c.region == r).unwrap_or(true)
            })
        };

        let index = pick(&state.idle, preferred_region).or_else(|| pick(&state.idle, None));
        if let Some(index) = index {
            let mut conn = state.idle.remove(index);
            conn.last_used_at = Instant::now();
            return Ok(Some(conn));
        }

        let live = state.live.get(&role).copied().unwrap_or(0);
        if live < inner.config.max_per_role {
            let endpoint = self.pick_endpoint(&mut state, role, preferred_region)?;
            let transport = (inner.factory)(&endpoint)?;
            *state.live.entry(role).or_insert(0) += 1;
            let conn = PooledConnection::new(role, endpoint.region.clone(), transport);
            debug!(
                "created pool connection {} role={role} region={}",
                conn.id, conn.region
            );
            return Ok(Some(conn));
        }

        Ok(None)
    }

    /// Endpoint for a new connection: preferred region first, then round
    /// robin. Reads fall back to write endpoints when no replica is
    /// configured.
    fn pick_endpoint(
        &self,
        state: &mut PoolState,
        role: Role,
        preferred_region: Option<&str>,
    ) -> Result<EndpointConfig, ClientError> {
        let mut candidates: Vec<&EndpointConfig> = self
            .inner
            .endpoints
            .iter()
            .filter(|e| e.role == role)
            .collect();
        if candidates.is_empty() && role == Role::Read {
            candidates = self
                .inner
                .endpoints
                .iter()
                .filter(|e| e.role == Role::Write)
                .collect();
        }
        if candidates.is_empty() {
            return Err(ClientError::Validation(format!(
                "no endpoint configured for role {role}"
            )));
        }

        if let Some(region) = preferred_region {
            if let Some(endpoint) = candidates.iter().find(|e| e.region == region) {
                return Ok((*endpoint).clone());
            }
        }

        let cursor = state.next_endpoint.entry(role).or_insert(0);
        let endpoint = candidates[*cursor % candidates.len()].clone();
        *cursor = (*cursor + 1) % candidates.len();
        Ok(endpoint)
    }

    /// Exclude a checked-in connection by id, e.g. after a connection-level
    /// transport failure observed outside the health loop.
    pub fn mark_unhealthy(&self, id: Uuid) {
        let mut state = self.inner.state.lock();
        if let Some(conn) = state.idle.iter_mut().find(|c| c.id == id) {
            conn.healthy = false;
            conn.consecutive_failures = self.inner.config.unhealthy_after_failures;
            conn.unhealthy_since = Some(Instant::now());
            warn!("connection {id} marked unhealthy");
        }
    }

    /// One health pass over idle connections, plus idle pruning. Driven by
    /// the scheduler.
    ///
    /// Connections are probed by id: the snapshot is taken under the lock,
    /// the probes run without it, and results are applied only to
    /// connections still idle afterwards, so checkouts during the pass are
    /// safe.
    pub async fn run_health_checks(&self) {
        let now = Instant::now();
        let cooldown = self.inner.config.unhealthy_cooldown;

        let probes: Vec<(Uuid, Arc<dyn Transport>)> = {
            let state = self.inner.state.lock();
            state
                .idle
                .iter()
                .filter(|c| match c.unhealthy_since {
                    // excluded connections sit out their cooldown
                    Some(since) => now.duration_since(since) >= cooldown,
                    None => true,
                })
                .map(|c| (c.id, Arc::clone(&c.transport)))
                .collect()
        };

        for (id, transport) in probes {
            let outcome = transport.health_check().await;
            let mut state = self.inner.state.lock();
            let Some(conn) = state.idle.iter_mut().find(|c| c.id == id) else {
                continue;
            };
            match outcome {
                Ok(()) => {
                    if !conn.healthy {
                        info!("connection {id} recovered");
                        self.inner.released.notify_waiters();
                    }
                    conn.healthy = true;
                    conn.consecutive_failures = 0;
                    conn.unhealthy_since = None;
                }
                Err(err) => {
                    conn.consecutive_failures += 1;
                    debug!(
                        "health check failed for {id} ({} consecutive): {err}",
                        conn.consecutive_failures
                    );
                    if conn.consecutive_failures >= self.inner.config.unhealthy_after_failures {
                        if conn.healthy {
                            warn!("connection {id} excluded after {} failed checks",
                                conn.consecutive_failures);
                        }
                        conn.healthy = false;
                        conn.unhealthy_since = Some(now);
                    }
                }
            }
        }

        self.prune_idle(now);
    }

    /// Drop idle connections past the idle timeout, keeping at least one
    /// per role so the next request does not pay creation latency.
    fn prune_idle(&self, now: Instant) {
        let idle_timeout = self.inner.config.idle_timeout;
        let mut state = self.inner.state.lock();

        let mut keep_per_role: HashMap<Role, usize> = HashMap::new();
        for conn in &state.idle {
            *keep_per_role.entry(conn.role).or_insert(0) += 1;
        }

        let mut index = 0;
        while index < state.idle.len() {
            let conn = &state.idle[index];
            let expired = now.duration_since(conn.last_used_at) >= idle_timeout;
            let removable = keep_per_role.get(&conn.role).copied().unwrap_or(0) > 1;
            if expired && removable {
                let conn = state.idle.remove(index);
                *keep_per_role.entry(conn.role).or_insert(1) -= 1;
                if let Some(live) = state.live.get_mut(&conn.role) {
                    *live = live.saturating_sub(1);
                }
                debug!("pruned idle connection {}", conn.id);
            } else {
                index += 1;
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            live_read: state.live.get(&Role::Read).copied().unwrap_or(0),
            live_write: state.live.get(&Role::Write).copied().unwrap_or(0),
            idle: state.idle.len(),
            unhealthy: state.idle.iter().filter(|c| !c.healthy).count(),
        }
    }

    /// Close the pool: pending and future acquires fail with `Shutdown`,
    /// idle connections are dropped, checked-out guards drain on release.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut state = self.inner.state.lock();
        let PoolState { idle, live, .. } = &mut *state;
        for conn in idle.drain(..) {
            if let Some(count) = live.get_mut(&conn.role) {
                *count = count.saturating_sub(1);
            }
        }
        drop(state);
        self.inner.released.notify_waiters();
        info!("connection pool closed");
    }
}

impl ConnectionGuard {
    pub fn id(&self) -> Uuid {
        self.conn.as_ref().map(|c| c.id).unwrap_or_default()
    }

    pub fn role(&self) -> Role {
        self.conn.as_ref().map(|c| c.role).unwrap_or(Role::Read)
    }

    pub fn region(&self) -> &str {
        self.conn.as_ref().map(|c| c.region.as_str()).unwrap_or("")
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.conn.as_ref().expect("guard always holds a connection").transport)
    }

    /// Flag this connection so the pool excludes it once returned.
    pub fn mark_unhealthy(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.healthy = false;
            conn.consecutive_failures += 1;
            conn.unhealthy_since = Some(Instant::now());
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let mut state = self.inner.state.lock();
        if self.inner.closed.load(Ordering::SeqCst) {
            if let Some(live) = state.live.get_mut(&conn.role) {
                *live = live.saturating_sub(1);
            }
            return;
        }
        conn.last_used_at = Instant::now();
        state.idle.push(conn);
        drop(state);
        self.inner.released.notify_waiters();
    }
}
