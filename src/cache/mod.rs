pub mod redis;

use self::redis::RedisMirror;
use crate::cli::Args;
use crate::models::chat::ChatMessage;
use log::{ debug, warn };
use sha2::{ Digest, Sha256 };
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{ Duration, Instant };
use tokio::sync::Mutex;

struct Entry {
    response: String,
    stored_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, Entry>,
    next_seq: u64,
}

/// Best-effort response cache keyed by a fingerprint of the trailing
/// messages. Misses and backend failures simply fall through.
#[derive(Clone)]
pub struct ResponseCache {
    entries: Arc<Mutex<Entries>>,
    mirror: Option<RedisMirror>,
    ttl: Option<Duration>,
    capacity: usize,
    window: usize,
}

impl ResponseCache {
    pub fn new(ttl_secs: u64, capacity: usize, window: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries::default())),
            mirror: None,
            ttl: if ttl_secs > 0 { Some(Duration::from_secs(ttl_secs)) } else { None },
            capacity: capacity.max(1),
            window: window.max(1),
        }
    }

    pub async fn init(args: &Args) -> Option<Self> {
        if !args.enable_cache {
            return None;
        }
        let mut cache = Self::new(args.cache_ttl, args.cache_capacity, args.cache_window);
        if let Some(url) = args.cache_redis_url.as_deref() {
            cache.mirror = RedisMirror::connect(url).await;
        }
        Some(cache)
    }

    pub fn fingerprint(&self, messages: &[ChatMessage]) -> String {
        let start = messages.len().saturating_sub(self.window);
        let mut hasher = Sha256::new();
        for msg in &messages[start..] {
            hasher.update(msg.role.as_bytes());
            hasher.update([0u8]);
            hasher.update(msg.content.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    fn is_fresh(&self, entry: &Entry) -> bool {
        match self.ttl {
            Some(ttl) => entry.stored_at.elapsed() < ttl,
            None => true,
        }
    }

    pub async fn get(&self, messages: &[ChatMessage]) -> Option<String> {
        let key = self.fingerprint(messages);
        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.map.get(&key) {
                if self.is_fresh(entry) {
                    debug!("Response cache hit (memory) for {}", key);
                    return Some(entry.response.clone());
                }
                entries.map.remove(&key);
            }
        }

        let mirror = self.mirror.as_ref()?;
        match mirror.get(&key).await {
            Ok(Some(response)) => {
                debug!("Response cache hit (redis) for {}", key);
                Some(response)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Response cache lookup failed: {}", e);
                None
            }
        }
    }

    pub async fn put(&self, messages: &[ChatMessage], response: &str) {
        if response.is_empty() {
            return;
        }
        let key = self.fingerprint(messages);
        {
            let mut entries = self.entries.lock().await;
            if entries.map.len() >= self.capacity && !entries.map.contains_key(&key) {
                let oldest = entries.map
                    .iter()
                    .min_by_key(|(_, entry)| entry.seq)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.map.remove(&oldest);
                }
            }
            let seq = entries.next_seq;
            entries.next_seq += 1;
            entries.map.insert(key.clone(), Entry {
                response: response.to_string(),
                stored_at: Instant::now(),
                seq,
            });
        }

        if let Some(mirror) = &self.mirror {
            let ttl = self.ttl.map(|d| d.as_secs()).unwrap_or(0);
            if let Err(e) = mirror.set(&key, response, ttl).await {
                warn!("Response cache write failed: {}", e);
            }
        }
    }
}
