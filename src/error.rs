//! # Error Module
//!
//! Typed error taxonomy for the data-access layer. Callers are expected to
//! branch on the variant: `PoolExhausted` and `Transport` mean "temporarily
//! unavailable, retry later", `Validation` means the request itself is bad
//! and retrying cannot help.
//!
//! A cache miss is not an error anywhere in this crate; lookups return
//! `Option` instead.

use crate::pool::Role;

/// Errors surfaced by the query/cache/pool stack.
///
/// The enum is `Clone` so a deduplicated request can hand the same failure
/// to every attached caller.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ClientError {
    /// Malformed query spec or configuration. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// All connections of the requested role stayed busy past the acquire
    /// timeout. Never retried locally; the caller decides when to try again.
    #[error("connection pool exhausted for role {role} after {waited_ms}ms")]
    PoolExhausted { role: Role, waited_ms: u64 },

    /// Underlying network or backend API failure. Retried with backoff up to
    /// the configured attempt cap before surfacing.
    #[error("transport failure{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Transport {
        message: String,
        /// HTTP status if the backend answered at all.
        status: Option<u16>,
    },

    /// An outbound call exceeded its own timeout.
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// The client has been shut down and its pool closed.
    #[error("client is shut down")]
    Shutdown,
}

impl ClientError {
    /// Whether the shared retry policy may re-attempt the operation.
    ///
    /// Only transient transport conditions qualify: connection-level
    /// failures, 5xx responses, 408 and 429. Validation and pool exhaustion
    /// surface immediately since retrying cannot change the outcome.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { status, .. } => match status {
                None => true,
                Some(s) => *s >= 500 || *s == 408 || *s == 429,
            },
            ClientError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Shorthand for a transport error without an HTTP status.
    pub fn transport(message: impl Into<String>) -> Self {
        ClientError::Transport {
            message: message.into(),
            status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability_classes() {
        assert!(ClientError::transport("connection reset").is_retryable());
        assert!(
            ClientError::Transport {
                message: "bad gateway".into(),
                status: Some(502)
            }
            .is_retryable()
        );
        assert!(
            ClientError::Transport {
                message: "rate limited".into(),
                status: Some(429)
            }
            .is_retryable()
        );
        assert!(
            !ClientError::Transport {
                message: "unauthorized".into(),
                status: Some(401)
            }
            .is_retryable()
        );
        assert!(!ClientError::Validation("empty table".into()).is_retryable());
        assert!(
            !ClientError::PoolExhausted {
                role: Role::Read,
                waited_ms: 5000
            }
            .is_retryable()
        );
    }
}
