//! Cache capability used for computed permissions, scopes and sessions.
//!
//! Two backends exist: [`RedisCache`] relies on native key expiry, while
//! [`LocalCache`] keeps a mutex-protected map swept on an interval. The
//! backend is picked once at start-up from configuration.

mod local;
mod redis;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

pub use self::redis::RedisCache;
pub use local::LocalCache;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error>;
    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error>;
    /// Remove and return a value in one step. Of several concurrent callers
    /// at most one receives it.
    async fn take(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    /// Add `member` to the set stored at `index_key`, resetting its TTL.
    async fn index_add(
        &self,
        index_key: &str,
        member: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error>;
    async fn index_members(&self, index_key: &str) -> Result<Vec<String>, anyhow::Error>;
    async fn index_remove(&self, index_key: &str, member: &str) -> Result<(), anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
    fn backend_name(&self) -> &'static str;
}

/// Cache key layout.
pub mod keys {
    use crate::models::UserId;

    pub fn permissions(user_id: UserId) -> String {
        format!("authz:perm:{}", user_id)
    }

    /// Scope entries embed the department-tree generation so that any
    /// structural change makes older entries unreachable.
    pub fn scope(generation: u64, user_id: UserId) -> String {
        format!("authz:scope:{}:{}", generation, user_id)
    }

    /// Invalidation epoch of one cached area (`perm`, `scope`) for a user.
    pub fn epoch(area: &str, user_id: UserId) -> String {
        format!("authz:epoch:{}:{}", area, user_id)
    }

    pub fn session(token_id: &str) -> String {
        format!("authz:session:{}", token_id)
    }

    pub fn refresh(token_hash: &str) -> String {
        format!("authz:refresh:{}", token_hash)
    }

    pub fn user_sessions(user_id: UserId) -> String {
        format!("authz:user_sessions:{}", user_id)
    }

    pub fn user_refresh_tokens(user_id: UserId) -> String {
        format!("authz:user_refresh:{}", user_id)
    }
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheBackend,
    key: &str,
) -> Result<Option<T>, anyhow::Error> {
    match cache.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Corrupt cache entry at {}: {}", key, e)),
        None => Ok(None),
    }
}

pub(crate) async fn set_json<T: Serialize + Sync>(
    cache: &dyn CacheBackend,
    key: &str,
    value: &T,
    ttl_seconds: u64,
) -> Result<(), anyhow::Error> {
    let raw = serde_json::to_string(value)
        .map_err(|e| anyhow::anyhow!("Failed to encode cache entry {}: {}", key, e))?;
    cache.set(key, &raw, ttl_seconds).await
}

pub(crate) async fn take_json<T: DeserializeOwned>(
    cache: &dyn CacheBackend,
    key: &str,
) -> Result<Option<T>, anyhow::Error> {
    match cache.take(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Corrupt cache entry at {}: {}", key, e)),
        None => Ok(None),
    }
}

/// Current invalidation epoch. `None` until the first invalidation.
///
/// Cached entries carry the epoch read before they were computed; an entry
/// whose epoch no longer matches is treated as a miss.
pub(crate) async fn current_epoch(
    cache: &dyn CacheBackend,
    key: &str,
) -> Result<Option<String>, anyhow::Error> {
    cache.get(key).await
}

/// Move the epoch on. The epoch outlives every entry tagged before the bump,
/// so a computation that started earlier can never match it again.
pub(crate) async fn bump_epoch(
    cache: &dyn CacheBackend,
    key: &str,
    entry_ttl_seconds: u64,
) -> Result<(), anyhow::Error> {
    let epoch = Uuid::new_v4().to_string();
    cache
        .set(key, &epoch, entry_ttl_seconds.saturating_mul(2))
        .await
}
