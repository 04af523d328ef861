use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::AppResult;

/// TTL key/value cache in Redis, shared across processes.
///
/// Best-effort only: nothing correctness-critical may live here, and callers
/// treat any error as a miss and recompute. Expiry is enforced by the store
/// itself, so an expired entry reads as absent without a sweeper.
#[derive(Clone)]
pub struct Cache {
    redis: ConnectionManager,
}

impl Cache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(Self::cache_key(key)).await?;

        match raw {
            Some(data) => match serde_json::from_str::<T>(&data) {
                Ok(value) => {
                    debug!(key, "cache hit");
                    Ok(Some(value))
                }
                Err(e) => {
                    warn!(key, error = %e, "cache deserialization failed, dropping entry");
                    let _ = conn.del::<_, ()>(Self::cache_key(key)).await;
                    Ok(None)
                }
            },
            None => {
                debug!(key, "cache miss");
                Ok(None)
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> AppResult<()> {
        let data = serde_json::to_string(value)
            .map_err(|e| crate::error::AppError::Config(format!("cache serialize: {e}")))?;

        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(Self::cache_key(key), data, ttl_secs)
            .await?;
        debug!(key, ttl = ttl_secs, "cache set");
        Ok(())
    }

    fn cache_key(key: &str) -> String {
        format!("cache:{key}")
    }
}
