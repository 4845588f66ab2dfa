//! Blacklist/whitelist drivers: identical contract, differing only in
//! pipeline semantics (deny-list vs allow-gate). Reference implementations:
//! `InMemory`, WAL-backed `File`. SQLite is out of scope.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::dns::util::{normalize_domain, normalize_pattern};
use crate::error::Result;

/// Whether a driver instance is acting as a deny-list or an allow-gate.
/// Purely a labeling concern — `ListDriver` behaves identically either
/// way; the resolver decides what `is_blocked`/`is_allowed` means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Blacklist,
    Whitelist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListSource {
    Manual,
    Import,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEntry {
    pub domain: String,
    pub reason: Option<String>,
    pub category: Option<String>,
    pub source: ListSource,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListStats {
    pub total_entries: usize,
    pub categories: HashMap<String, usize>,
    pub sources: HashMap<String, usize>,
    pub recently_added: usize,
}

/// Shared contract for blacklist and whitelist reference implementations.
/// `is_blocked`/`is_allowed` are convenience aliases over the same lookup —
/// exact match first, then wildcard, then implicit subdomain match.
#[async_trait]
pub trait ListDriver: Send + Sync {
    async fn add(&self, domain: &str, reason: Option<String>, category: Option<String>);
    async fn remove(&self, domain: &str) -> bool;
    async fn contains(&self, domain: &str) -> bool;
    async fn list(&self, category: Option<&str>) -> Vec<ListEntry>;
    async fn clear(&self);
    async fn get_rule(&self, domain: &str) -> Option<ListEntry>;
    async fn import(&self, entries: Vec<ListEntry>) -> usize;
    async fn export(&self) -> Vec<ListEntry>;
    async fn stats(&self) -> ListStats;
    async fn cleanup(&self);

    async fn is_blocked(&self, domain: &str) -> bool {
        self.contains(domain).await
    }

    async fn is_allowed(&self, domain: &str) -> bool {
        self.contains(domain).await
    }

    async fn get_blocking_rule(&self, domain: &str) -> Option<ListEntry> {
        self.get_rule(domain).await
    }

    async fn get_allowing_rule(&self, domain: &str) -> Option<ListEntry> {
        self.get_rule(domain).await
    }
}

/// Wildcard match per invariant I5: exact equality, OR `pattern` contains
/// `*` interpreted as `.*` across a dot-escaped literal, OR `domain` ends
/// with `.` + `pattern` (implicit subdomain wildcard).
fn pattern_matches(domain: &str, pattern: &str) -> bool {
    if domain == pattern {
        return true;
    }
    if pattern.contains('*') {
        let translated = translate_wildcard(pattern);
        if let Ok(re) = regex::Regex::new(&format!("^{translated}$")) {
            if re.is_match(domain) {
                return true;
            }
        }
    }
    if let Some(suffix) = domain.strip_suffix(pattern) {
        if suffix.ends_with('.') {
            return true;
        }
    }
    false
}

/// Turn a `*`-glob pattern into a regex body: `*` becomes `.*`, every other
/// regex metacharacter is escaped so the rest of the pattern matches
/// literally.
fn translate_wildcard(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == '*' {
            out.push_str(".*");
        } else if ".^$+?()[]{}|\\".contains(c) {
            out.push('\\');
            out.push(c);
        } else {
            out.push(c);
        }
    }
    out
}

struct Shared {
    entries: RwLock<HashMap<String, ListEntry>>,
    wildcards_enabled: bool,
}

impl Shared {
    fn new(wildcards_enabled: bool) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            wildcards_enabled,
        }
    }

    fn add(&self, domain: &str, reason: Option<String>, category: Option<String>, source: ListSource) {
        let domain = normalize_pattern(domain);
        self.entries.write().insert(
            domain.clone(),
            ListEntry {
                domain,
                reason,
                category,
                source,
                added_at: Utc::now(),
            },
        );
    }

    fn remove(&self, domain: &str) -> bool {
        self.entries.write().remove(&normalize_pattern(domain)).is_some()
    }

    fn get_rule(&self, domain: &str) -> Option<ListEntry> {
        let domain = normalize_domain(domain);
        let entries = self.entries.read();
        if let Some(entry) = entries.get(&domain) {
            return Some(entry.clone());
        }
        if self.wildcards_enabled {
            for (pattern, entry) in entries.iter() {
                if pattern_matches(&domain, pattern) {
                    return Some(entry.clone());
                }
            }
        }
        None
    }

    fn contains(&self, domain: &str) -> bool {
        self.get_rule(domain).is_some()
    }

    fn list(&self, category: Option<&str>) -> Vec<ListEntry> {
        self.entries
            .read()
            .values()
            .filter(|e| category.is_none_or(|c| e.category.as_deref() == Some(c)))
            .cloned()
            .collect()
    }

    fn clear(&self) {
        self.entries.write().clear();
    }

    fn import(&self, entries: Vec<ListEntry>) -> usize {
        let mut map = self.entries.write();
        let mut inserted = 0;
        for entry in entries {
            let domain = normalize_pattern(&entry.domain);
            if !map.contains_key(&domain) {
                map.insert(domain.clone(), ListEntry { domain, ..entry });
                inserted += 1;
            }
        }
        inserted
    }

    fn export(&self) -> Vec<ListEntry> {
        self.entries.read().values().cloned().collect()
    }

    fn stats(&self) -> ListStats {
        let entries = self.entries.read();
        let cutoff = Utc::now() - ChronoDuration::hours(24);
        let mut categories = HashMap::new();
        let mut sources = HashMap::new();
        let mut recently_added = 0;
        for entry in entries.values() {
            if let Some(cat) = &entry.category {
                *categories.entry(cat.clone()).or_insert(0) += 1;
            }
            let source_key = match entry.source {
                ListSource::Manual => "manual",
                ListSource::Import => "import",
                ListSource::Auto => "auto",
            };
            *sources.entry(source_key.to_string()).or_insert(0) += 1;
            if entry.added_at >= cutoff {
                recently_added += 1;
            }
        }
        ListStats {
            total_entries: entries.len(),
            categories,
            sources,
            recently_added,
        }
    }
}

/// Map keyed by normalized domain.
pub struct InMemoryListDriver {
    shared: Shared,
}

impl InMemoryListDriver {
    pub fn new(wildcards_enabled: bool) -> Self {
        Self { shared: Shared::new(wildcards_enabled) }
    }
}

impl Default for InMemoryListDriver {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ListDriver for InMemoryListDriver {
    async fn add(&self, domain: &str, reason: Option<String>, category: Option<String>) {
        self.shared.add(domain, reason, category, ListSource::Manual);
    }

    async fn remove(&self, domain: &str) -> bool {
        self.shared.remove(domain)
    }

    async fn contains(&self, domain: &str) -> bool {
        self.shared.contains(domain)
    }

    async fn list(&self, category: Option<&str>) -> Vec<ListEntry> {
        self.shared.list(category)
    }

    async fn clear(&self) {
        self.shared.clear();
    }

    async fn get_rule(&self, domain: &str) -> Option<ListEntry> {
        self.shared.get_rule(domain)
    }

    async fn import(&self, entries: Vec<ListEntry>) -> usize {
        self.shared.import(entries)
    }

    async fn export(&self) -> Vec<ListEntry> {
        self.shared.export()
    }

    async fn stats(&self) -> ListStats {
        self.shared.stats()
    }

    async fn cleanup(&self) {}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WalOp {
    Add { entry: ListEntry },
    Remove { domain: String },
    Clear,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct IndexDocument {
    domains: Vec<String>,
    compacted_at: Option<DateTime<Utc>>,
}

/// Maintains `domains.json` (authoritative snapshot), `wal.log`
/// (append-only), and `index.json` (domain list + compaction timestamp)
/// inside a dedicated directory. A presence `HashSet` gives a fast-path
/// negative check; pending writes/deletes are batched and flushed to the
/// WAL every 100ms. Compaction runs when the WAL reaches 1000 entries.
pub struct FileListDriver {
    shared: Shared,
    dir: PathBuf,
    presence: RwLock<HashSet<String>>,
    pending: Mutex<Vec<WalOp>>,
    wal_len: AtomicU64,
}

impl FileListDriver {
    pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
    pub const COMPACTION_THRESHOLD: u64 = 1000;

    fn domains_path(dir: &PathBuf) -> PathBuf {
        dir.join("domains.json")
    }

    fn wal_path(dir: &PathBuf) -> PathBuf {
        dir.join("wal.log")
    }

    fn index_path(dir: &PathBuf) -> PathBuf {
        dir.join("index.json")
    }

    pub async fn open(dir: PathBuf, wildcards_enabled: bool) -> Result<std::sync::Arc<Self>> {
        tokio::fs::create_dir_all(&dir).await?;
        let shared = Shared::new(wildcards_enabled);

        if let Ok(contents) = tokio::fs::read_to_string(Self::domains_path(&dir)).await {
            if let Ok(entries) = serde_json::from_str::<Vec<ListEntry>>(&contents) {
                let mut map = shared.entries.write();
                for entry in entries {
                    map.insert(entry.domain.clone(), entry);
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
                    Ok(WalOp::Add { entry }) => {
                        shared.entries.write().insert(entry.domain.clone(), entry);
                    }
                    Ok(WalOp::Remove { domain }) => {
                        shared.entries.write().remove(&domain);
                    }
                    Ok(WalOp::Clear) => {
                        shared.entries.write().clear();
                    }
                    Err(err) => warn!(%err, "skipping unreadable list WAL line"),
                }
                wal_len += 1;
            }
        }

        let presence = shared.entries.read().keys().cloned().collect();

        Ok(std::sync::Arc::new(Self {
            shared,
            dir,
            presence: RwLock::new(presence),
            pending: Mutex::new(Vec::new()),
            wal_len: AtomicU64::new(wal_len),
        }))
    }

    pub fn spawn_flush_task(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let driver = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Self::FLUSH_INTERVAL);
            loop {
                ticker.tick().await;
                driver.flush().await;
            }
        })
    }

    async fn flush(&self) {
        let batch: Vec<WalOp> = {
            let mut pending = self.pending.lock();
            std::mem::take(&mut *pending)
        };
        if batch.is_empty() {
            return;
        }
        let mut buf = String::new();
        for op in &batch {
            if let Ok(line) = serde_json::to_string(op) {
                buf.push_str(&line);
                buf.push('\n');
            }
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(Self::wal_path(&self.dir))
            .await;
        match file {
            Ok(mut file) => {
                if file.write_all(buf.as_bytes()).await.is_ok() {
                    let len = self.wal_len.fetch_add(batch.len() as u64, Ordering::Relaxed)
                        + batch.len() as u64;
                    if len >= Self::COMPACTION_THRESHOLD {
                        self.compact().await;
                    }
                }
            }
            Err(err) => warn!(%err, "failed to flush list WAL batch"),
        }
    }

    /// Merge the WAL into the authoritative snapshot, rewrite
    /// `domains.json` and `index.json`, truncate the WAL.
    pub async fn compact(&self) {
        self.flush().await;
        let entries = self.shared.export();
        match serde_json::to_string(&entries) {
            Ok(json) => {
                if let Err(err) = tokio::fs::write(Self::domains_path(&self.dir), json).await {
                    warn!(%err, "failed to rewrite domains.json");
                }
            }
            Err(err) => warn!(%err, "failed to serialize domains.json"),
        }
        let index = IndexDocument {
            domains: entries.iter().map(|e| e.domain.clone()).collect(),
            compacted_at: Some(Utc::now()),
        };
        if let Ok(json) = serde_json::to_string(&index) {
            let _ = tokio::fs::write(Self::index_path(&self.dir), json).await;
        }
        if let Err(err) = tokio::fs::write(Self::wal_path(&self.dir), b"").await {
            warn!(%err, "failed to truncate list WAL");
        }
        self.wal_len.store(0, Ordering::Relaxed);
    }
}

#[async_trait]
impl ListDriver for FileListDriver {
    async fn add(&self, domain: &str, reason: Option<String>, category: Option<String>) {
        let domain = normalize_pattern(domain);
        self.shared.add(&domain, reason, category, ListSource::Manual);
        self.presence.write().insert(domain.clone());
        // Exact key lookup, not `get_rule` — that normalizes its argument as
        // a domain being resolved (stripping a leading "*."), which would
        // miss the pattern key we just inserted.
        let entry = self.shared.entries.read().get(&domain).cloned().expect("just inserted");
        self.pending.lock().push(WalOp::Add { entry });
    }

    async fn remove(&self, domain: &str) -> bool {
        let domain = normalize_pattern(domain);
        let removed = self.shared.remove(&domain);
        if removed {
            self.presence.write().remove(&domain);
            self.pending.lock().push(WalOp::Remove { domain });
        }
        removed
    }

    async fn contains(&self, domain: &str) -> bool {
        let normalized = normalize_domain(domain);
        if !self.shared.wildcards_enabled && !self.presence.read().contains(&normalized) {
            return false;
        }
        self.shared.contains(domain)
    }

    async fn list(&self, category: Option<&str>) -> Vec<ListEntry> {
        self.shared.list(category)
    }

    async fn clear(&self) {
        self.shared.clear();
        self.presence.write().clear();
        self.pending.lock().push(WalOp::Clear);
    }

    async fn get_rule(&self, domain: &str) -> Option<ListEntry> {
        self.shared.get_rule(domain)
    }

    async fn import(&self, entries: Vec<ListEntry>) -> usize {
        let inserted = self.shared.import(entries);
        let mut presence = self.presence.write();
        *presence = self.shared.entries.read().keys().cloned().collect();
        drop(presence);
        for entry in self.shared.export() {
            self.pending.lock().push(WalOp::Add { entry });
        }
        inserted
    }

    async fn export(&self) -> Vec<ListEntry> {
        self.shared.export()
    }

    async fn stats(&self) -> ListStats {
        self.shared.stats()
    }

    async fn cleanup(&self) {
        self.compact().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exact_match_blocks() {
        let driver = InMemoryListDriver::new(true);
        driver.add("ads.example", None, None).await;
        assert!(driver.is_blocked("ads.example").await);
        assert!(!driver.is_blocked("clean.example").await);
    }

    #[tokio::test]
    async fn wildcard_pattern_matches_subdomains() {
        let driver = InMemoryListDriver::new(true);
        driver.add("*.ads.example", None, None).await;
        assert!(driver.contains("tracker.ads.example").await);
        // An explicit wildcard entry covers subdomains only, not the apex.
        assert!(!driver.contains("ads.example").await);
    }

    #[tokio::test]
    async fn implicit_subdomain_wildcard() {
        let driver = InMemoryListDriver::new(true);
        driver.add("ads.example", None, None).await;
        assert!(driver.contains("tracker.ads.example").await);
    }

    #[tokio::test]
    async fn import_skips_existing() {
        let driver = InMemoryListDriver::new(true);
        driver.add("a.com", None, None).await;
        let inserted = driver
            .import(vec![
                ListEntry {
                    domain: "a.com".into(),
                    reason: None,
                    category: None,
                    source: ListSource::Import,
                    added_at: Utc::now(),
                },
                ListEntry {
                    domain: "b.com".into(),
                    reason: None,
                    category: None,
                    source: ListSource::Import,
                    added_at: Utc::now(),
                },
            ])
            .await;
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn clear_resets_stats() {
        let driver = InMemoryListDriver::new(true);
        driver.add("a.com", None, None).await;
        driver.clear().await;
        assert_eq!(driver.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn wal_replay_after_crash_reproduces_state() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FileListDriver::open(dir.path().to_path_buf(), true).await.unwrap();
        driver.add("a", None, None).await;
        driver.add("b", None, None).await;
        driver.add("c", None, None).await;
        driver.flush().await;

        let reopened = FileListDriver::open(dir.path().to_path_buf(), true).await.unwrap();
        assert!(reopened.contains("a").await);
        assert!(reopened.contains("b").await);
        assert!(reopened.contains("c").await);
        let mut domains: Vec<String> = reopened.list(None).await.into_iter().map(|e| e.domain).collect();
        domains.sort();
        assert_eq!(domains, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }
}
