//! Shared key-value store port.
//!
//! The dispatch core only needs a handful of primitives from the store:
//! conditional set with expiry for leases, plain get/set with expiry for
//! heartbeats, and list range/remove for the shared task queue. The
//! semantics follow Redis (`SET NX PX`, `GET`, `SET PX`, `DEL`, `RPUSH`,
//! `LRANGE`, `LREM`) so a networked backend maps onto it directly.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The key holds a value of a different kind (string vs list).
    #[error("Wrong value type at key: {0}")]
    WrongType(String),

    /// The backend could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Key-value store shared by every coordinator and worker.
#[async_trait]
pub trait Store: Send + Sync {
    /// Set `key` to `value` with expiry only if the key is absent.
    /// Returns whether the value was set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Read a string value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally set `key` to `value` with expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Delete a key of any kind. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete `key` only if it currently holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Append `value` to the list at `key`. Returns the new length.
    async fn push_back(&self, key: &str, value: &str) -> Result<usize, StoreError>;

    /// Read the inclusive range `start..=stop` of the list at `key`.
    /// Negative indexes count from the tail (`-1` is the last element).
    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError>;

    /// Remove occurrences of `value` from the list at `key`: `count > 0`
    /// removes up to `count` from the head, `count < 0` up to `|count|` from
    /// the tail, `0` removes all. Returns the number removed.
    async fn remove(&self, key: &str, count: isize, value: &str) -> Result<usize, StoreError>;
}
