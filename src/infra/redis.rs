//! Redis-backed [`CacheStore`].

use std::time::Duration;

use async_trait::async_trait;
use redis::{Client, FromRedisValue, aio::MultiplexedConnection};
use tracing::info;

use crate::cache::{CacheStore, CacheStoreError};

const COMPARE_AND_DELETE: &str = r#"
local v = redis.call('GET', KEYS[1])
if v == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisCacheStore {
    connection: MultiplexedConnection,
    command_timeout: Duration,
}

impl RedisCacheStore {
    pub async fn connect(url: &str, command_timeout: Duration) -> Result<Self, CacheStoreError> {
        let client = Client::open(url).map_err(map_redis_error)?;
        let connection = tokio::time::timeout(
            command_timeout,
            client.get_multiplexed_tokio_connection(),
        )
        .await
        .map_err(|_| CacheStoreError::Timeout)?
        .map_err(map_redis_error)?;

        info!(
            target = "flashsale::infra::redis",
            timeout_ms = command_timeout.as_millis() as u64,
            "connected to redis"
        );
        Ok(Self {
            connection,
            command_timeout,
        })
    }

    async fn query<T: FromRedisValue>(&self, cmd: redis::Cmd) -> Result<T, CacheStoreError> {
        let mut connection = self.connection.clone();
        tokio::time::timeout(self.command_timeout, cmd.query_async(&mut connection))
            .await
            .map_err(|_| CacheStoreError::Timeout)?
            .map_err(map_redis_error)
    }

    pub async fn ping(&self) -> Result<(), CacheStoreError> {
        let reply: String = self.query(redis::cmd("PING")).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(CacheStoreError::protocol(format!("unexpected PING reply `{reply}`")))
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query(cmd).await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheStoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        self.query(cmd).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheStoreError> {
        // SET key value NX PX ttl replies OK or nil.
        let mut cmd = redis::cmd("SET");
        cmd.arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl));
        let reply: Option<String> = self.query(cmd).await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: u64 = self.query(cmd).await?;
        Ok(removed > 0)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CacheStoreError> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(COMPARE_AND_DELETE).arg(1).arg(key).arg(expected);
        let removed: u64 = self.query(cmd).await?;
        Ok(removed > 0)
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheStoreError> {
        let mut cmd = redis::cmd("INCR");
        cmd.arg(key);
        self.query(cmd).await
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn map_redis_error(err: redis::RedisError) -> CacheStoreError {
    if err.is_timeout() {
        CacheStoreError::Timeout
    } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        CacheStoreError::unavailable(err.to_string())
    } else {
        CacheStoreError::protocol(err.to_string())
    }
}
