//! Best-effort key/value cache in front of the database.
//!
//! Every public operation swallows backend failures: a broken cache is logged
//! at `warn` and behaves like an empty one. Values are stored as JSON strings.

pub mod keys;

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use serde::{Serialize, de::DeserializeOwned};
use tokio::{sync::RwLock, time::Instant};
use tracing::{info, warn};

use crate::config::CacheSettings;

pub const TTL_SHORT: Duration = Duration::from_secs(300);
pub const TTL_MEDIUM: Duration = Duration::from_secs(1800);
pub const TTL_LONG: Duration = Duration::from_secs(3600);
pub const TTL_VERY_LONG: Duration = Duration::from_secs(86_400);
pub const TTL_LEADERBOARD: Duration = Duration::from_secs(6 * 3600);

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const SCAN_BATCH: usize = 200;
const MEMORY_SWEEP_THRESHOLD: usize = 256;
const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Cache {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Disabled,
    Memory(MemoryStore),
    Redis(ConnectionManager),
}

impl Cache {
    pub fn disabled() -> Self {
        Self {
            backend: Backend::Disabled,
        }
    }

    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory(MemoryStore::default()),
        }
    }

    /// Build the configured backend. An unreachable Redis degrades to no cache.
    pub async fn connect(settings: &CacheSettings) -> Self {
        match settings {
            CacheSettings::Disabled => {
                info!("cache disabled by configuration");
                Self::disabled()
            }
            CacheSettings::Memory => {
                info!("using in-process memory cache");
                Self::memory()
            }
            CacheSettings::Redis(url) => match open_redis(url).await {
                Ok(manager) => {
                    info!("connected to redis cache");
                    Self {
                        backend: Backend::Redis(manager),
                    }
                }
                Err(err) => {
                    warn!(?err, "redis unavailable, continuing without cache");
                    Self::disabled()
                }
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, Backend::Disabled)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = match self.try_get(key).await {
            Ok(payload) => payload?,
            Err(err) => {
                warn!(?err, key, "cache get failed");
                return None;
            }
        };

        match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(?err, key, "discarding undecodable cache entry");
                self.del(&[key.to_string()]).await;
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(?err, key, "failed to encode cache entry");
                return;
            }
        };

        if let Err(err) = self.try_set(key, payload, ttl).await {
            warn!(?err, key, "cache set failed");
        }
    }

    pub async fn del(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        if let Err(err) = self.try_del(keys).await {
            warn!(?err, ?keys, "cache delete failed");
        }
    }

    pub async fn del_pattern(&self, pattern: &str) {
        if let Err(err) = self.try_del_pattern(pattern).await {
            warn!(?err, pattern, "cache pattern delete failed");
        }
    }

    /// Serve `key` from the cache, or run `load` and cache its successful result.
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, ttl: Duration, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            return Ok(hit);
        }

        let value = load().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Reclaim expired in-process entries. Redis expires keys on its own.
    pub async fn purge_expired(&self) -> usize {
        match &self.backend {
            Backend::Memory(store) => store.purge_expired().await,
            Backend::Disabled | Backend::Redis(_) => 0,
        }
    }

    /// Drop the exact key of a family plus every key nested under it.
    pub async fn invalidate_family(&self, family: &keys::KeyFamily) {
        self.del(&[family.exact.clone()]).await;
        self.del_pattern(&family.pattern).await;
    }

    async fn try_get(&self, key: &str) -> Result<Option<String>> {
        match &self.backend {
            Backend::Disabled => Ok(None),
            Backend::Memory(store) => Ok(store.get(key).await),
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let payload: Option<String> =
                    conn.get(key).await.context("redis GET failed")?;
                Ok(payload)
            }
        }
    }

    async fn try_set(&self, key: &str, payload: String, ttl: Duration) -> Result<()> {
        match &self.backend {
            Backend::Disabled => Ok(()),
            Backend::Memory(store) => {
                store.set(key, payload, ttl).await;
                Ok(())
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let _: () = conn
                    .set_ex(key, payload, ttl.as_secs().max(1))
                    .await
                    .context("redis SETEX failed")?;
                Ok(())
            }
        }
    }

    async fn try_del(&self, keys: &[String]) -> Result<()> {
        match &self.backend {
            Backend::Disabled => Ok(()),
            Backend::Memory(store) => {
                store.del(keys).await;
                Ok(())
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let _: () = conn.del(keys).await.context("redis DEL failed")?;
                Ok(())
            }
        }
    }

    async fn try_del_pattern(&self, pattern: &str) -> Result<()> {
        match &self.backend {
            Backend::Disabled => Ok(()),
            Backend::Memory(store) => {
                store.del_pattern(pattern).await;
                Ok(())
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let mut cursor: u64 = 0;
                loop {
                    let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await
                        .context("redis SCAN failed")?;

                    if !batch.is_empty() {
                        let _: () = conn.del(&batch).await.context("redis DEL failed")?;
                    }

                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                Ok(())
            }
        }
    }
}

async fn open_redis(url: &str) -> Result<ConnectionManager> {
    let client = Client::open(url).context("invalid REDIS_URL")?;
    tokio::time::timeout(REDIS_CONNECT_TIMEOUT, client.get_connection_manager())
        .await
        .context("timed out connecting to redis")?
        .context("failed to connect to redis")
}

#[derive(Clone)]
struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

struct MemoryInner {
    entries: HashMap<String, MemoryEntry>,
    swept_at: Instant,
}

struct MemoryEntry {
    payload: String,
    expires_at: Instant,
}

impl MemoryInner {
    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.swept_at = now;
        before - self.entries.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryInner {
                entries: HashMap::new(),
                swept_at: Instant::now(),
            })),
        }
    }
}

impl MemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        {
            let guard = self.inner.read().await;
            match guard.entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.payload.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut guard = self.inner.write().await;
        if guard
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            guard.entries.remove(key);
        }
        None
    }

    /// Writes also reclaim expired entries once the map is large, at most
    /// once per `MEMORY_SWEEP_INTERVAL`.
    async fn set(&self, key: &str, payload: String, ttl: Duration) {
        let now = Instant::now();
        let entry = MemoryEntry {
            payload,
            expires_at: now + ttl,
        };

        let mut guard = self.inner.write().await;
        if guard.entries.len() >= MEMORY_SWEEP_THRESHOLD
            && now.duration_since(guard.swept_at) >= MEMORY_SWEEP_INTERVAL
        {
            guard.sweep(now);
        }
        guard.entries.insert(key.to_string(), entry);
    }

    async fn del(&self, keys: &[String]) {
        let mut guard = self.inner.write().await;
        for key in keys {
            guard.entries.remove(key);
        }
    }

    async fn del_pattern(&self, pattern: &str) {
        let now = Instant::now();
        self.inner
            .write()
            .await
            .entries
            .retain(|key, entry| entry.expires_at > now && !keys::glob_match(pattern, key));
    }

    async fn purge_expired(&self) -> usize {
        self.inner.write().await.sweep(Instant::now())
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}
