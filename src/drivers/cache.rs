//! Cache driver: key -> `CachedResponse` with TTL and LRU eviction.
//! Reference implementations: `InMemory`, optimized `File` (write-ahead
//! logged). SQLite is out of scope.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::dns::DecodedPacket;
use crate::error::Result;

/// `{packet, storedAt, ttl-seconds, expiresAt}`. TTL is the packet's
/// minimum non-OPT TTL, floored at 300s (computed by the caller via
/// `DecodedPacket::min_ttl_secs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub packet: DecodedPacket,
    pub stored_at: i64,
    pub ttl_secs: u32,
    pub expires_at: i64,
}

impl CachedResponse {
    pub fn new(packet: DecodedPacket, now_ms: i64) -> Self {
        let ttl_secs = packet.min_ttl_secs();
        Self {
            packet,
            stored_at: now_ms,
            ttl_secs,
            expires_at: now_ms + ttl_secs as i64 * 1000,
        }
    }

    pub fn is_valid(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at
    }

    fn with_ttl_override(mut self, ttl_override_ms: i64) -> Self {
        self.ttl_secs = (ttl_override_ms / 1000).max(0) as u32;
        self.expires_at = self.stored_at + ttl_override_ms;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
}

/// Shared contract for every cache driver reference implementation.
#[async_trait]
pub trait CacheDriver: Send + Sync {
    async fn get(&self, key: &str) -> Option<CachedResponse>;
    async fn set(&self, key: String, value: CachedResponse, ttl_override_ms: Option<i64>);
    async fn delete(&self, key: &str) -> bool;
    async fn has(&self, key: &str) -> bool;
    async fn keys(&self) -> Vec<String>;
    async fn size(&self) -> usize;
    async fn clear(&self);
    async fn cleanup(&self);
    async fn evict_expired(&self) -> usize;
    async fn evict_lru(&self, n: usize) -> usize;
    async fn stats(&self) -> CacheStats;
}

struct Entry {
    value: CachedResponse,
}

struct Shared {
    map: RwLock<HashMap<String, Entry>>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Shared {
    fn new(max_size: usize) -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn now_ms() -> i64 {
        crate::dns::packet::now_ms()
    }

    fn get(&self, key: &str) -> Option<CachedResponse> {
        let now = Self::now_ms();
        let expired = {
            let map = self.map.read();
            match map.get(key) {
                Some(entry) if entry.value.is_valid(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => true,
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        };
        if expired {
            self.map.write().remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    fn set(&self, key: String, mut value: CachedResponse, ttl_override_ms: Option<i64>) {
        if let Some(ttl) = ttl_override_ms {
            value = value.with_ttl_override(ttl);
        }
        {
            let mut map = self.map.write();
            map.insert(key, Entry { value });
        }
        self.evict_over_capacity();
    }

    fn evict_over_capacity(&self) -> usize {
        let mut map = self.map.write();
        if map.len() <= self.max_size {
            return 0;
        }
        let overflow = map.len() - self.max_size;
        let mut by_age: Vec<(String, i64)> =
            map.iter().map(|(k, v)| (k.clone(), v.value.stored_at)).collect();
        by_age.sort_by_key(|(_, stored_at)| *stored_at);
        let mut evicted = 0;
        for (key, _) in by_age.into_iter().take(overflow) {
            map.remove(&key);
            evicted += 1;
        }
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    fn evict_lru(&self, n: usize) -> usize {
        let mut map = self.map.write();
        let mut by_age: Vec<(String, i64)> =
            map.iter().map(|(k, v)| (k.clone(), v.value.stored_at)).collect();
        by_age.sort_by_key(|(_, stored_at)| *stored_at);
        let mut evicted = 0;
        for (key, _) in by_age.into_iter().take(n) {
            map.remove(&key);
            evicted += 1;
        }
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    fn evict_expired(&self) -> usize {
        let now = Self::now_ms();
        let mut map = self.map.write();
        let expired: Vec<String> = map
            .iter()
            .filter(|(_, v)| !v.value.is_valid(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            map.remove(key);
        }
        self.evictions.fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            size: self.map.read().len(),
            hits,
            misses,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// In-memory map with periodic background cleanup (default every 60s).
pub struct InMemoryCacheDriver {
    shared: Shared,
}

impl InMemoryCacheDriver {
    pub const DEFAULT_MAX_SIZE: usize = 10_000;
    pub const DEFAULT_CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

    pub fn new(max_size: usize) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self { shared: Shared::new(max_size) })
    }

    /// Spawns the periodic expired-entry sweep. The returned handle is
    /// aborted by the caller (typically the `Manager`) on shutdown.
    pub fn spawn_background_cleanup(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let driver = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Self::DEFAULT_CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                let evicted = driver.shared.evict_expired();
                if evicted > 0 {
                    tracing::debug!(evicted, "cache background cleanup");
                }
            }
        })
    }
}

impl Default for InMemoryCacheDriver {
    fn default() -> Self {
        Self { shared: Shared::new(Self::DEFAULT_MAX_SIZE) }
    }
}

#[async_trait]
impl CacheDriver for InMemoryCacheDriver {
    async fn get(&self, key: &str) -> Option<CachedResponse> {
        self.shared.get(key)
    }

    async fn set(&self, key: String, value: CachedResponse, ttl_override_ms: Option<i64>) {
        self.shared.set(key, value, ttl_override_ms);
    }

    async fn delete(&self, key: &str) -> bool {
        self.shared.map.write().remove(key).is_some()
    }

    async fn has(&self, key: &str) -> bool {
        self.shared.get(key).is_some()
    }

    async fn keys(&self) -> Vec<String> {
        self.shared.map.read().keys().cloned().collect()
    }

    async fn size(&self) -> usize {
        self.shared.map.read().len()
    }

    async fn clear(&self) {
        self.shared.map.write().clear();
    }

    async fn cleanup(&self) {
        self.shared.evict_expired();
    }

    async fn evict_expired(&self) -> usize {
        self.shared.evict_expired()
    }

    async fn evict_lru(&self, n: usize) -> usize {
        self.shared.evict_lru(n)
    }

    async fn stats(&self) -> CacheStats {
        self.shared.stats()
    }
}

/// One WAL operation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WalOp {
    Set { key: String, entry: CachedResponse },
    Delete { key: String },
    Clear,
}

/// In-memory authoritative store plus an append-only write-ahead log.
/// Startup: read `cache.json`, replay `operations.log` in order, evict
/// expired. Mutation: update memory, append one WAL line. Background
/// save every 30s rewrites `cache.json` and truncates the WAL.
/// Compaction also triggers once the WAL exceeds 1000 entries.
pub struct FileCacheDriver {
    shared: Shared,
    dir: PathBuf,
    wal_len: AtomicU64,
}

impl FileCacheDriver {
    pub const DEFAULT_MAX_SIZE: usize = 10_000;
    pub const SAVE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
    pub const EVICTION_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5 * 60);
    pub const COMPACTION_THRESHOLD: u64 = 1000;

    fn snapshot_path(dir: &PathBuf) -> PathBuf {
        dir.join("cache.json")
    }

    fn wal_path(dir: &PathBuf) -> PathBuf {
        dir.join("operations.log")
    }

    pub async fn open(dir: PathBuf, max_size: usize) -> Result<std::sync::Arc<Self>> {
        tokio::fs::create_dir_all(&dir).await?;
        let shared = Shared::new(max_size);

        if let Ok(contents) = tokio::fs::read_to_string(Self::snapshot_path(&dir)).await {
            if let Ok(snapshot) = serde_json::from_str::<HashMap<String, CachedResponse>>(&contents) {
                let mut map = shared.map.write();
                for (key, value) in snapshot {
                    map.insert(key, Entry { value });
                }
            }
        }

        let mut wal_len = 0u64;
        if let Ok(contents) = tokio::fs::read_to_string(Self::wal_path(&dir)).await {
            for line in contents.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WalOp>(line) {
                    Ok(WalOp::Set { key, entry }) => {
                        shared.map.write().insert(key, Entry { value: entry });
                    }
                    Ok(WalOp::Delete { key }) => {
                        shared.map.write().remove(&key);
                    }
                    Ok(WalOp::Clear) => {
                        shared.map.write().clear();
                    }
                    Err(err) => warn!(%err, "skipping unreadable WAL line"),
                }
                wal_len += 1;
            }
        }

        shared.evict_expired();

        let driver = std::sync::Arc::new(Self {
            shared,
            dir,
            wal_len: AtomicU64::new(wal_len),
        });
        Ok(driver)
    }

    async fn append_wal(&self, op: &WalOp) {
        let Ok(line) = serde_json::to_string(op) else { return };
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(Self::wal_path(&self.dir))
            .await;
        match file {
            Ok(mut file) => {
                if file.write_all(line.as_bytes()).await.is_ok() {
                    let _ = file.write_all(b"\n").await;
                    let len = self.wal_len.fetch_add(1, Ordering::Relaxed) + 1;
                    if len >= Self::COMPACTION_THRESHOLD {
                        self.compact().await;
                    }
                }
            }
            Err(err) => warn!(%err, "failed to append cache WAL entry"),
        }
    }

    async fn save_snapshot(&self) {
        let snapshot: HashMap<String, CachedResponse> = {
            let map = self.shared.map.read();
            map.iter().map(|(k, v)| (k.clone(), v.value.clone())).collect()
        };
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                if let Err(err) = tokio::fs::write(Self::snapshot_path(&self.dir), json).await {
                    warn!(%err, "failed to save cache snapshot");
                }
            }
            Err(err) => warn!(%err, "failed to serialize cache snapshot"),
        }
    }

    async fn truncate_wal(&self) {
        if let Err(err) = tokio::fs::write(Self::wal_path(&self.dir), b"").await {
            warn!(%err, "failed to truncate cache WAL");
        }
        self.wal_len.store(0, Ordering::Relaxed);
    }

    /// Rewrite the snapshot from memory and truncate the WAL.
    pub async fn compact(&self) {
        self.save_snapshot().await;
        self.truncate_wal().await;
    }

    pub fn spawn_background_tasks(self: &std::sync::Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let save_driver = std::sync::Arc::clone(self);
        let save_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Self::SAVE_INTERVAL);
            loop {
                ticker.tick().await;
                save_driver.compact().await;
            }
        });
        let evict_driver = std::sync::Arc::clone(self);
        let evict_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Self::EVICTION_INTERVAL);
            loop {
                ticker.tick().await;
                evict_driver.shared.evict_expired();
            }
        });
        vec![save_task, evict_task]
    }
}

#[async_trait]
impl CacheDriver for FileCacheDriver {
    async fn get(&self, key: &str) -> Option<CachedResponse> {
        self.shared.get(key)
    }

    async fn set(&self, key: String, value: CachedResponse, ttl_override_ms: Option<i64>) {
        let value = if let Some(ttl) = ttl_override_ms {
            value.with_ttl_override(ttl)
        } else {
            value
        };
        self.shared.set(key.clone(), value.clone(), None);
        self.append_wal(&WalOp::Set { key, entry: value }).await;
    }

    async fn delete(&self, key: &str) -> bool {
        let removed = self.shared.map.write().remove(key).is_some();
        if removed {
            self.append_wal(&WalOp::Delete { key: key.to_string() }).await;
        }
        removed
    }

    async fn has(&self, key: &str) -> bool {
        self.shared.get(key).is_some()
    }

    async fn keys(&self) -> Vec<String> {
        self.shared.map.read().keys().cloned().collect()
    }

    async fn size(&self) -> usize {
        self.shared.map.read().len()
    }

    async fn clear(&self) {
        self.shared.map.write().clear();
        self.append_wal(&WalOp::Clear).await;
    }

    async fn cleanup(&self) {
        self.shared.evict_expired();
        self.compact().await;
    }

    async fn evict_expired(&self) -> usize {
        self.shared.evict_expired()
    }

    async fn evict_lru(&self, n: usize) -> usize {
        self.shared.evict_lru(n)
    }

    async fn stats(&self) -> CacheStats {
        self.shared.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsClass, DnsHeader, DnsQr, DnsType};

    fn sample_packet(name: &str, ttl: u32) -> DecodedPacket {
        use crate::dns::{Answer, DnsQuestion, RData};
        use std::net::Ipv4Addr;
        DecodedPacket {
            header: DnsHeader { qr: DnsQr::Response, ..DnsHeader::default() },
            questions: vec![DnsQuestion {
                name: name.to_string(),
                qtype: DnsType::A,
                qclass: DnsClass::IN,
            }],
            answers: vec![Answer {
                name: name.to_string(),
                rtype: DnsType::A,
                rclass: DnsClass::IN,
                ttl: Some(ttl),
                data: RData::A(Ipv4Addr::new(93, 184, 216, 34)),
            }],
            authorities: vec![],
            additionals: vec![],
        }
    }

    #[tokio::test]
    async fn hit_then_miss_after_expiry() {
        let driver = InMemoryCacheDriver::new(10);
        let now = crate::dns::packet::now_ms();
        let mut cached = CachedResponse::new(sample_packet("example.com", 60), now);
        cached.expires_at = now - 1;
        driver.set("example.com:A:IN".to_string(), cached, None).await;
        assert!(driver.get("example.com:A:IN").await.is_none());
        assert_eq!(driver.stats().await.size, 0);
    }

    #[tokio::test]
    async fn lru_evicts_oldest_on_overflow() {
        let driver = InMemoryCacheDriver::new(2);
        let base = crate::dns::packet::now_ms();
        for (i, name) in ["a.com", "b.com", "c.com"].iter().enumerate() {
            let cached = CachedResponse::new(sample_packet(name, 300), base + i as i64);
            driver.set(format!("{name}:A:IN"), cached, None).await;
        }
        assert_eq!(driver.size().await, 2);
        assert!(driver.get("a.com:A:IN").await.is_none());
        assert!(driver.get("c.com:A:IN").await.is_some());
    }

    #[tokio::test]
    async fn clear_resets_stats() {
        let driver = InMemoryCacheDriver::new(10);
        let now = crate::dns::packet::now_ms();
        driver
            .set(
                "example.com:A:IN".to_string(),
                CachedResponse::new(sample_packet("example.com", 60), now),
                None,
            )
            .await;
        driver.clear().await;
        assert_eq!(driver.stats().await.size, 0);
    }

    #[tokio::test]
    async fn wal_replay_after_crash_reproduces_state() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FileCacheDriver::open(dir.path().to_path_buf(), 100).await.unwrap();
        let now = crate::dns::packet::now_ms();
        driver
            .set(
                "a.com:A:IN".to_string(),
                CachedResponse::new(sample_packet("a.com", 300), now),
                None,
            )
            .await;
        driver
            .set(
                "b.com:A:IN".to_string(),
                CachedResponse::new(sample_packet("b.com", 300), now),
                None,
            )
            .await;
        driver.delete("a.com:A:IN").await;

        // Simulate a crash: reopen without compacting first.
        let reopened = FileCacheDriver::open(dir.path().to_path_buf(), 100).await.unwrap();
        assert!(reopened.get("a.com:A:IN").await.is_none());
        assert!(reopened.get("b.com:A:IN").await.is_some());
    }
}
