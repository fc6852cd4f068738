//! Redis-backed list store.
//!
//! Lists live under the rendered cache key and their write stamp under
//! `<key>:stamp`. Multi-step operations run as Lua scripts so each one is
//! atomic on the server.

use std::fmt;

use async_trait::async_trait;
use redis::{AsyncCommands, Script, aio::ConnectionManager};
use tracing::{debug, info};

use crate::cache::{CacheError, ListStore, Stamp};

const PUSH_AND_TRIM: &str = r#"
redis.call('INCR', KEYS[2])
local len = redis.call('LPUSHX', KEYS[1], ARGV[1])
if len > 0 then
  redis.call('LTRIM', KEYS[1], 0, tonumber(ARGV[2]) - 1)
end
return len
"#;

// RPUSH is chunked to stay below Lua's unpack limit.
const FILL_IF_STAMP: &str = r#"
local current = tonumber(redis.call('GET', KEYS[2]) or '0')
if current ~= tonumber(ARGV[1]) then
  return 0
end
redis.call('DEL', KEYS[1])
for i = 2, #ARGV, 1000 do
  redis.call('RPUSH', KEYS[1], unpack(ARGV, i, math.min(i + 999, #ARGV)))
end
return 1
"#;

const DELETE: &str = r#"
redis.call('INCR', KEYS[2])
redis.call('DEL', KEYS[1])
return 1
"#;

fn stamp_key(key: &str) -> String {
    format!("{key}:stamp")
}

/// List store shared across processes through Redis.
///
/// An empty list cannot be stored, so a filled-but-empty feed is a miss on
/// the next read.
#[derive(Clone)]
pub struct RedisListStore {
    conn: ConnectionManager,
    redis_url: String,
    push_script: Script,
    fill_script: Script,
    delete_script: Script,
}

impl fmt::Debug for RedisListStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisListStore")
            .field("redis_url", &self.redis_url)
            .finish_non_exhaustive()
    }
}

impl RedisListStore {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url).map_err(CacheError::backend)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(CacheError::backend)?;

        info!(
            target = "fanfeed::infra::redis",
            redis_url, "redis list store connected"
        );

        Ok(Self {
            conn,
            redis_url: redis_url.to_string(),
            push_script: Script::new(PUSH_AND_TRIM),
            fill_script: Script::new(FILL_IF_STAMP),
            delete_script: Script::new(DELETE),
        })
    }
}

#[async_trait]
impl ListStore for RedisListStore {
    async fn push_and_trim(
        &self,
        key: &str,
        value: String,
        max_len: usize,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let len: i64 = self
            .push_script
            .key(key)
            .key(stamp_key(key))
            .arg(value)
            .arg(max_len.max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(len > 0)
    }

    async fn range(&self, key: &str) -> Result<Option<Vec<String>>, CacheError> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn
            .lrange(key, 0, -1)
            .await
            .map_err(CacheError::backend)?;
        Ok((!values.is_empty()).then_some(values))
    }

    async fn stamp(&self, key: &str) -> Result<Stamp, CacheError> {
        let mut conn = self.conn.clone();
        let stamp: Option<u64> = conn
            .get(stamp_key(key))
            .await
            .map_err(CacheError::backend)?;
        Ok(stamp.unwrap_or(0))
    }

    async fn fill(
        &self,
        key: &str,
        values: Vec<String>,
        expected: Stamp,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.fill_script.key(key);
        invocation.key(stamp_key(key)).arg(expected);
        for value in values {
            invocation.arg(value);
        }
        let written: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        if written == 0 {
            debug!(
                target = "fanfeed::infra::redis",
                key, expected, "fill skipped after concurrent write"
            );
        }
        Ok(written == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .delete_script
            .key(key)
            .key(stamp_key(key))
            .invoke_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(())
    }
}
