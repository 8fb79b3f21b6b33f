use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;

use super::{CacheError, SessionCache};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

/// Session cache backed by a Redis connection manager.
///
/// Every command runs under `timeout`; a stalled server reads as a failed
/// call, so the caller falls back to the store.
#[derive(Clone)]
pub struct RedisSessionCache {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisSessionCache {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = with_deadline(CONNECT_TIMEOUT, "connect", client.get_connection_manager()).await?;
        tracing::info!("Connected to Redis session cache");
        Ok(Self { conn, timeout })
    }
}

async fn with_deadline<T, F>(limit: Duration, command: &str, fut: F) -> Result<T, CacheError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(CacheError::Backend(format!(
            "{command} timed out after {} ms",
            limit.as_millis()
        ))),
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        with_deadline(self.timeout, "GET", conn.get(key)).await
    }

    async fn put_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        // PX keeps sub-second lifetimes instead of rounding them to zero.
        let millis = ttl.as_millis().max(1) as u64;
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(millis);
        with_deadline(self.timeout, "SET", cmd.query_async::<_, ()>(&mut conn)).await
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        with_deadline(self.timeout, "DEL", conn.del::<_, ()>(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_stalled_command_fails_as_backend_error() {
        let stalled = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, redis::RedisError>(Some("late".to_string()))
        };

        let result = with_deadline(Duration::from_millis(250), "GET", stalled).await;

        match result {
            Err(CacheError::Backend(message)) => assert!(message.contains("GET timed out")),
            other => panic!("expected a backend error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_prompt_command_passes_through() {
        let ready = async { Ok::<_, redis::RedisError>(7) };
        let value = with_deadline(Duration::from_millis(250), "GET", ready).await.unwrap();
        assert_eq!(value, 7);
    }
}
