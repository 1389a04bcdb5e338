use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, FromRedisValue};
use std::time::Duration;

use super::CacheBackend;
use crate::config::CacheConfig;

/// Redis-backed cache. Expiry is native (`SET .. EX`, `EXPIRE`), so no sweep runs.
#[derive(Clone)]
pub struct RedisCache {
    _client: Client,
    manager: ConnectionManager,
    command_timeout: Duration,
}

impl RedisCache {
    pub async fn new(config: &CacheConfig) -> Result<Self, anyhow::Error> {
        let url = config
            .redis_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Redis cache backend selected without REDIS_URL"))?;

        tracing::info!(url = %url, "Connecting to Redis");
        let client = Client::open(url)?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
            command_timeout: Duration::from_millis(config.command_timeout_ms),
        })
    }

    /// Run a single command, bounded by the configured timeout.
    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd, op: &str) -> Result<T, anyhow::Error> {
        let mut conn = self.manager.clone();
        match tokio::time::timeout(self.command_timeout, cmd.query_async::<_, T>(&mut conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(anyhow::anyhow!("Redis {} failed: {}", op, e)),
            Err(_) => Err(anyhow::anyhow!(
                "Redis {} timed out after {:?}",
                op,
                self.command_timeout
            )),
        }
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        self.query(redis::cmd("GET").arg(key), "GET").await
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        self.query(
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_seconds.max(1)),
            "SET",
        )
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        let removed: i64 = self.query(redis::cmd("DEL").arg(key), "DEL").await?;
        Ok(removed > 0)
    }

    async fn take(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        self.query(redis::cmd("GETDEL").arg(key), "GETDEL").await
    }

    async fn index_add(
        &self,
        index_key: &str,
        member: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SADD")
            .arg(index_key)
            .arg(member)
            .ignore()
            .cmd("EXPIRE")
            .arg(index_key)
            .arg(ttl_seconds.max(1))
            .ignore();

        match tokio::time::timeout(self.command_timeout, pipe.query_async::<_, ()>(&mut conn)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow::anyhow!("Redis SADD failed: {}", e)),
            Err(_) => Err(anyhow::anyhow!(
                "Redis SADD timed out after {:?}",
                self.command_timeout
            )),
        }
    }

    async fn index_members(&self, index_key: &str) -> Result<Vec<String>, anyhow::Error> {
        self.query(redis::cmd("SMEMBERS").arg(index_key), "SMEMBERS")
            .await
    }

    async fn index_remove(&self, index_key: &str, member: &str) -> Result<(), anyhow::Error> {
        let _: i64 = self
            .query(redis::cmd("SREM").arg(index_key).arg(member), "SREM")
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let _: String = self
            .query(&redis::cmd("PING"), "PING")
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
