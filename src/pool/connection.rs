//! Pooled connection record and role tagging.

use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::transport::Transport;

/// Connection role. Reads may be served by replicas; writes always go to
/// the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Read,
    Write,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Read => write!(f, "read"),
            Role::Write => write!(f, "write"),
        }
    }
}

/// A logical backend connection: one configured endpoint plus its health
/// bookkeeping. The transport itself is stateless HTTP, so "connection"
/// here means a selectable, health-tracked client instance.
pub struct PooledConnection {
    pub id: Uuid,
    pub role: Role,
    pub region: String,
    pub transport: Arc<dyn Transport>,
    pub last_used_at: Instant,
    pub healthy: bool,
    /// Consecutive failed health checks; reset on the first pass.
    pub consecutive_failures: u32,
    /// Set when the connection is excluded; cleared when a check passes.
    pub unhealthy_since: Option<Instant>,
}

impl PooledConnection {
    pub fn new(role: Role, region: String, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            region,
            transport,
            last_used_at: Instant::now(),
            healthy: true,
            consecutive_failures: 0,
            unhealthy_since: None,
        }
    }
}
