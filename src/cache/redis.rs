use log::warn;
use redis::{ AsyncCommands, Client, RedisError };
use redis::aio::MultiplexedConnection;
use std::sync::Arc;
use tokio::sync::Mutex;

const KEY_PREFIX: &str = "chatBuddy:response:";

/// Shared Redis copy of cached responses, namespaced under [`KEY_PREFIX`].
#[derive(Clone)]
pub struct RedisMirror {
    conn: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisMirror {
    /// `None` when the URL is invalid or the server cannot be reached; the
    /// cache then stays in memory only.
    pub async fn connect(url: &str) -> Option<Self> {
        let client = match Client::open(url) {
            Ok(client) => client,
            Err(e) => {
                warn!("Invalid cache Redis URL {}: {}", url, e);
                return None;
            }
        };
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => Some(Self { conn: Arc::new(Mutex::new(conn)) }),
            Err(e) => {
                warn!("Cache Redis unavailable at {}: {}", url, e);
                None
            }
        }
    }

    fn key(fingerprint: &str) -> String {
        format!("{}{}", KEY_PREFIX, fingerprint)
    }

    pub async fn get(&self, fingerprint: &str) -> Result<Option<String>, RedisError> {
        let mut conn = self.conn.lock().await;
        conn.get(Self::key(fingerprint)).await
    }

    /// A `ttl_secs` of zero stores the entry without expiry.
    pub async fn set(&self, fingerprint: &str, response: &str, ttl_secs: u64) -> Result<(), RedisError> {
        let mut conn = self.conn.lock().await;
        if ttl_secs > 0 {
            conn.set_ex::<_, _, ()>(Self::key(fingerprint), response, ttl_secs).await
        } else {
            conn.set::<_, _, ()>(Self::key(fingerprint), response).await
        }
    }
}
