//! # Cache Module
//!
//! In-memory result cache keyed by the normalized query signature.
//! Best-effort by contract: a lookup either returns a value or a miss,
//! never an error, so caching can never affect correctness.

pub mod query_cache;

pub use query_cache::{CacheStats, QueryCache};
