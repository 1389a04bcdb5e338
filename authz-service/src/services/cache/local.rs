use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::CacheBackend;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Index(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local cache. Reads treat expired entries as absent; a sweep task
/// evicts them. Sweep and invalidation share the same mutex.
#[derive(Debug, Default)]
pub struct LocalCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, anyhow::Error> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Local cache mutex poisoned: {}", e))
    }

    /// Evict expired entries, returning how many were removed.
    pub fn sweep(&self) -> Result<usize, anyhow::Error> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> Result<usize, anyhow::Error> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, anyhow::Error> {
        Ok(self.lock()?.is_empty())
    }

    /// Spawn the periodic sweep. The task ends once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    tracing::debug!("Local cache dropped, stopping sweeper");
                    break;
                };
                match cache.sweep() {
                    Ok(0) => {}
                    Ok(evicted) => tracing::debug!(evicted, "Swept expired cache entries"),
                    Err(e) => tracing::error!(error = %e, "Cache sweep failed"),
                }
            }
        })
    }

    fn deadline(ttl_seconds: u64) -> Instant {
        Instant::now() + Duration::from_secs(ttl_seconds)
    }
}

#[async_trait]
impl CacheBackend for LocalCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let expired = match entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                return match &entry.value {
                    Value::Text(text) => Ok(Some(text.clone())),
                    Value::Index(_) => Err(anyhow::anyhow!("Cache key {} holds an index", key)),
                };
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        self.lock()?.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Self::deadline(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        let now = Instant::now();
        Ok(self
            .lock()?
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn take(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        if let Some(Entry {
            value: Value::Index(_),
            ..
        }) = entries.get(key)
        {
            return Err(anyhow::anyhow!("Cache key {} holds an index", key));
        }
        Ok(entries
            .remove(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| match entry.value {
                Value::Text(text) => Some(text),
                Value::Index(_) => None,
            }))
    }

    async fn index_add(
        &self,
        index_key: &str,
        member: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let mut members = match entries.remove(index_key) {
            Some(Entry {
                value: Value::Index(members),
                expires_at,
            }) if expires_at > now => members,
            _ => BTreeSet::new(),
        };
        members.insert(member.to_string());
        entries.insert(
            index_key.to_string(),
            Entry {
                value: Value::Index(members),
                expires_at: Self::deadline(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn index_members(&self, index_key: &str) -> Result<Vec<String>, anyhow::Error> {
        let now = Instant::now();
        let entries = self.lock()?;
        match entries.get(index_key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::Index(members) => Ok(members.iter().cloned().collect()),
                Value::Text(_) => Err(anyhow::anyhow!("Cache key {} is not an index", index_key)),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn index_remove(&self, index_key: &str, member: &str) -> Result<(), anyhow::Error> {
        let mut entries = self.lock()?;
        let now_empty = match entries.get_mut(index_key) {
            Some(Entry {
                value: Value::Index(members),
                ..
            }) => {
                members.remove(member);
                members.is_empty()
            }
            _ => false,
        };
        if now_empty {
            entries.remove(index_key);
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.lock().map(|_| ())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = LocalCache::new();
        cache.set("k", "v", 60).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_expired() {
        let cache = LocalCache::new();
        cache.set("short", "1", 10).await.unwrap();
        cache.set("long", "2", 600).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.sweep().unwrap(), 1);
        assert_eq!(cache.len().unwrap(), 1);
        assert_eq!(cache.get("long").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_runs_on_interval() {
        let cache = Arc::new(LocalCache::new());
        cache.set("k", "v", 5).await.unwrap();
        let handle = cache.spawn_sweeper(Duration::from_secs(60));

        // Paused time auto-advances through the sweeper's tick.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(cache.is_empty().unwrap());

        drop(cache);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_delete_reports_removal() {
        let cache = LocalCache::new();
        cache.set("k", "v", 60).await.unwrap();
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_hands_value_to_one_caller() {
        let cache = Arc::new(LocalCache::new());
        cache.set("once", "v", 60).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.take("once").await.unwrap() })
            })
            .collect();
        let mut taken = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                taken += 1;
            }
        }
        assert_eq!(taken, 1);
        assert_eq!(cache.get("once").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_ignores_expired_entries() {
        let cache = LocalCache::new();
        cache.set("k", "v", 5).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.take("k").await.unwrap(), None);
        assert!(cache.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_index_operations() {
        let cache = LocalCache::new();
        cache.index_add("idx", "a", 60).await.unwrap();
        cache.index_add("idx", "b", 60).await.unwrap();
        assert_eq!(cache.index_members("idx").await.unwrap(), vec!["a", "b"]);

        cache.index_remove("idx", "a").await.unwrap();
        assert_eq!(cache.index_members("idx").await.unwrap(), vec!["b"]);

        cache.index_remove("idx", "b").await.unwrap();
        assert!(cache.index_members("idx").await.unwrap().is_empty());
        assert!(cache.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let cache = Arc::new(LocalCache::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("k{}", i % 4);
                cache.set(&key, "v", 60).await.unwrap();
                cache.get(&key).await.unwrap();
                cache.delete(&key).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(cache.len().unwrap() <= 4);
    }
}
