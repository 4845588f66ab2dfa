//! Log driver: append/query structured log entries. Reference
//! implementations: `Console`, `InMemory`, `File`. The SQLite variant is
//! out of scope — only the trait is specified.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::Result;

/// Which transport a query arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
    Doh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub address: String,
    pub port: u16,
    pub transport: Transport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub qtype: String,
    pub class: String,
}

/// The `processing{}` block nested under a log entry. An older flat
/// `provider/attempt/responseTime`-at-root shape was considered and
/// dropped in favor of this nested one — see DESIGN.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Processing {
    pub provider: Option<String>,
    #[serde(rename = "responseTime")]
    pub response_time_ms: Option<u64>,
    pub cached: bool,
    pub blocked: bool,
    pub whitelisted: bool,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerEventType {
    Started,
    Stopped,
    Crashed,
}

/// Tagged union over request/response/error/server_event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    Request {
        id: String,
        timestamp: DateTime<Utc>,
        level: LogLevel,
        client: ClientInfo,
        query: QueryInfo,
    },
    Response {
        id: String,
        timestamp: DateTime<Utc>,
        level: LogLevel,
        client: ClientInfo,
        query: QueryInfo,
        processing: Processing,
    },
    Error {
        id: String,
        timestamp: DateTime<Utc>,
        level: LogLevel,
        client: ClientInfo,
        query: QueryInfo,
        processing: Processing,
    },
    ServerEvent {
        id: String,
        timestamp: DateTime<Utc>,
        level: LogLevel,
        event_type: ServerEventType,
        port: u16,
        message: String,
        config_changes: Option<serde_json::Value>,
    },
}

impl LogEntry {
    pub fn id(&self) -> &str {
        match self {
            LogEntry::Request { id, .. }
            | LogEntry::Response { id, .. }
            | LogEntry::Error { id, .. }
            | LogEntry::ServerEvent { id, .. } => id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LogEntry::Request { timestamp, .. }
            | LogEntry::Response { timestamp, .. }
            | LogEntry::Error { timestamp, .. }
            | LogEntry::ServerEvent { timestamp, .. } => *timestamp,
        }
    }

    pub fn query_name(&self) -> Option<&str> {
        match self {
            LogEntry::Request { query, .. }
            | LogEntry::Response { query, .. }
            | LogEntry::Error { query, .. } => Some(&query.name),
            LogEntry::ServerEvent { .. } => None,
        }
    }

    pub fn processing(&self) -> Option<&Processing> {
        match self {
            LogEntry::Response { processing, .. } | LogEntry::Error { processing, .. } => {
                Some(processing)
            }
            _ => None,
        }
    }

    pub fn client_ip(&self) -> Option<&str> {
        match self {
            LogEntry::Request { client, .. }
            | LogEntry::Response { client, .. }
            | LogEntry::Error { client, .. } => Some(&client.address),
            LogEntry::ServerEvent { .. } => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            LogEntry::Request { .. } => "request",
            LogEntry::Response { .. } => "response",
            LogEntry::Error { .. } => "error",
            LogEntry::ServerEvent { .. } => "server_event",
        }
    }
}

/// Filter combination accepted by `LogDriver::get_logs`.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub entry_type: Option<&'static str>,
    pub domain: Option<String>,
    pub provider: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub client_ip: Option<String>,
    pub success: Option<bool>,
    pub cached: Option<bool>,
    pub blocked: Option<bool>,
    pub whitelisted: Option<bool>,
    pub request_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl LogFilter {
    fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(t) = self.entry_type {
            if entry.kind() != t {
                return false;
            }
        }
        if let Some(domain) = &self.domain {
            match entry.query_name() {
                Some(name) if name.to_lowercase().contains(&domain.to_lowercase()) => {}
                _ => return false,
            }
        }
        if let Some(provider) = &self.provider {
            match entry.processing().and_then(|p| p.provider.as_deref()) {
                Some(p) if p == provider => {}
                _ => return false,
            }
        }
        if let Some(start) = self.start_time {
            if entry.timestamp() < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if entry.timestamp() > end {
                return false;
            }
        }
        if let Some(ip) = &self.client_ip {
            match entry.client_ip() {
                Some(a) if a == ip => {}
                _ => return false,
            }
        }
        if let Some(success) = self.success {
            match entry.processing() {
                Some(p) if p.success == success => {}
                _ => return false,
            }
        }
        if let Some(cached) = self.cached {
            match entry.processing() {
                Some(p) if p.cached == cached => {}
                _ => return false,
            }
        }
        if let Some(blocked) = self.blocked {
            match entry.processing() {
                Some(p) if p.blocked == blocked => {}
                _ => return false,
            }
        }
        if let Some(whitelisted) = self.whitelisted {
            match entry.processing() {
                Some(p) if p.whitelisted == whitelisted => {}
                _ => return false,
            }
        }
        if let Some(request_id) = &self.request_id {
            if entry.id() != request_id {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogStats {
    pub total_entries: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Shared contract for every log driver reference implementation. Must
/// never panic or propagate an error to the resolve pipeline — a driver
/// failure degrades silently.
#[async_trait]
pub trait LogDriver: Send + Sync {
    async fn log(&self, entry: LogEntry);
    async fn get_logs(&self, filter: &LogFilter) -> Vec<LogEntry>;
    async fn clear(&self);
    async fn cleanup(&self);
    async fn stats(&self) -> LogStats;

    /// `{request, response-or-error}` sharing `request_id`, per I1.
    async fn get_request_response_pair(
        &self,
        request_id: &str,
    ) -> (Option<LogEntry>, Option<LogEntry>) {
        let entries = self
            .get_logs(&LogFilter {
                request_id: Some(request_id.to_string()),
                ..Default::default()
            })
            .await;
        let mut request = None;
        let mut response = None;
        for entry in entries {
            match &entry {
                LogEntry::Request { .. } => request = Some(entry),
                LogEntry::Response { .. } | LogEntry::Error { .. } => response = Some(entry),
                LogEntry::ServerEvent { .. } => {}
            }
        }
        (request, response)
    }

    /// Requests with no matching response/error and vice versa.
    async fn get_orphans(&self) -> Vec<LogEntry> {
        let all = self.get_logs(&LogFilter::default()).await;
        let mut requests = std::collections::HashMap::new();
        let mut responses = std::collections::HashMap::new();
        for entry in &all {
            match entry {
                LogEntry::Request { id, .. } => {
                    requests.insert(id.clone(), entry.clone());
                }
                LogEntry::Response { id, .. } | LogEntry::Error { id, .. } => {
                    responses.insert(id.clone(), entry.clone());
                }
                LogEntry::ServerEvent { .. } => {}
            }
        }
        let mut orphans = Vec::new();
        for (id, entry) in &requests {
            if !responses.contains_key(id) {
                orphans.push(entry.clone());
            }
        }
        for (id, entry) in &responses {
            if !requests.contains_key(id) {
                orphans.push(entry.clone());
            }
        }
        orphans
    }
}

/// Writes a human-formatted line to stdout via `tracing`. `get_logs`
/// always returns empty; `stats` tracks count/first/last only.
pub struct ConsoleLogDriver {
    count: AtomicU64,
    first: Mutex<Option<DateTime<Utc>>>,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl ConsoleLogDriver {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            first: Mutex::new(None),
            last: Mutex::new(None),
        }
    }
}

impl Default for ConsoleLogDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogDriver for ConsoleLogDriver {
    async fn log(&self, entry: LogEntry) {
        match &entry {
            LogEntry::Request { client, query, .. } => {
                tracing::info!(
                    client = %client.address, query = %query.name, qtype = %query.qtype,
                    "dns request"
                );
            }
            LogEntry::Response { processing, query, .. } => {
                tracing::info!(
                    query = %query.name, provider = ?processing.provider,
                    cached = processing.cached, blocked = processing.blocked,
                    "dns response"
                );
            }
            LogEntry::Error { processing, query, .. } => {
                tracing::warn!(
                    query = %query.name, provider = ?processing.provider,
                    error = ?processing.error, "dns error"
                );
            }
            LogEntry::ServerEvent { event_type, message, .. } => {
                tracing::info!(?event_type, message = %message, "server event");
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        let now = entry.timestamp();
        let mut first = self.first.lock();
        if first.is_none() {
            *first = Some(now);
        }
        *self.last.lock() = Some(now);
    }

    async fn get_logs(&self, _filter: &LogFilter) -> Vec<LogEntry> {
        Vec::new()
    }

    async fn clear(&self) {
        self.count.store(0, Ordering::Relaxed);
        *self.first.lock() = None;
        *self.last.lock() = None;
    }

    async fn cleanup(&self) {}

    async fn stats(&self) -> LogStats {
        LogStats {
            total_entries: self.count.load(Ordering::Relaxed) as usize,
            oldest_entry: *self.first.lock(),
            newest_entry: *self.last.lock(),
        }
    }
}

/// Ring buffer with `max_entries` (default 10 000).
pub struct InMemoryLogDriver {
    entries: Mutex<VecDeque<LogEntry>>,
    max_entries: usize,
}

impl InMemoryLogDriver {
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries,
        }
    }
}

impl Default for InMemoryLogDriver {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl LogDriver for InMemoryLogDriver {
    async fn log(&self, entry: LogEntry) {
        let mut entries = self.entries.lock();
        entries.push_back(entry);
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
    }

    async fn get_logs(&self, filter: &LogFilter) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let mut matched: Vec<LogEntry> = entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        if let Some(offset) = filter.offset {
            matched = matched.into_iter().skip(offset).collect();
        }
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        matched
    }

    async fn clear(&self) {
        self.entries.lock().clear();
    }

    async fn cleanup(&self) {}

    async fn stats(&self) -> LogStats {
        let entries = self.entries.lock();
        LogStats {
            total_entries: entries.len(),
            oldest_entry: entries.front().map(|e| e.timestamp()),
            newest_entry: entries.back().map(|e| e.timestamp()),
        }
    }
}

/// One JSON document per line, appended; `cleanup` rewrites survivors
/// within the retention window (default 7 days).
pub struct FileLogDriver {
    path: PathBuf,
    retention: ChronoDuration,
    cache: Mutex<VecDeque<LogEntry>>,
}

impl FileLogDriver {
    pub const DEFAULT_RETENTION_DAYS: i64 = 7;

    pub async fn open(path: PathBuf) -> Result<Self> {
        let mut cache = VecDeque::new();
        if let Ok(contents) = tokio::fs::read_to_string(&path).await {
            for line in contents.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogEntry>(line) {
                    Ok(entry) => cache.push_back(entry),
                    Err(err) => warn!(%err, "skipping unreadable log line"),
                }
            }
        }
        Ok(Self {
            path,
            retention: ChronoDuration::days(Self::DEFAULT_RETENTION_DAYS),
            cache: Mutex::new(cache),
        })
    }

    async fn append_line(&self, entry: &LogEntry) {
        let Ok(line) = serde_json::to_string(entry) else {
            return;
        };
        let file = OpenOptions::new().create(true).append(true).open(&self.path).await;
        match file {
            Ok(mut file) => {
                if let Err(err) = file.write_all(line.as_bytes()).await {
                    warn!(%err, "failed to append log entry");
                    return;
                }
                let _ = file.write_all(b"\n").await;
            }
            Err(err) => warn!(%err, "failed to open log file"),
        }
    }

    async fn rewrite(&self) {
        let entries = self.cache.lock().clone();
        let mut buf = String::new();
        for entry in &entries {
            if let Ok(line) = serde_json::to_string(entry) {
                buf.push_str(&line);
                buf.push('\n');
            }
        }
        if let Err(err) = tokio::fs::write(&self.path, buf).await {
            warn!(%err, "failed to rewrite log file");
        }
    }
}

#[async_trait]
impl LogDriver for FileLogDriver {
    async fn log(&self, entry: LogEntry) {
        self.cache.lock().push_back(entry.clone());
        self.append_line(&entry).await;
    }

    async fn get_logs(&self, filter: &LogFilter) -> Vec<LogEntry> {
        let entries = self.cache.lock();
        let mut matched: Vec<LogEntry> = entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        if let Some(offset) = filter.offset {
            matched = matched.into_iter().skip(offset).collect();
        }
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        matched
    }

    async fn clear(&self) {
        self.cache.lock().clear();
        self.rewrite().await;
    }

    async fn cleanup(&self) {
        let cutoff = Utc::now() - self.retention;
        {
            let mut entries = self.cache.lock();
            entries.retain(|e| e.timestamp() >= cutoff);
        }
        self.rewrite().await;
    }

    async fn stats(&self) -> LogStats {
        let entries = self.cache.lock();
        LogStats {
            total_entries: entries.len(),
            oldest_entry: entries.front().map(|e| e.timestamp()),
            newest_entry: entries.back().map(|e| e.timestamp()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(id: &str, name: &str) -> LogEntry {
        LogEntry::Request {
            id: id.to_string(),
            timestamp: Utc::now(),
            level: LogLevel::Info,
            client: ClientInfo {
                address: "127.0.0.1".into(),
                port: 5353,
                transport: Transport::Udp,
            },
            query: QueryInfo {
                name: name.to_string(),
                qtype: "A".into(),
                class: "IN".into(),
            },
        }
    }

    #[tokio::test]
    async fn in_memory_respects_max_entries() {
        let driver = InMemoryLogDriver::new(2);
        driver.log(req("1", "a.com")).await;
        driver.log(req("2", "b.com")).await;
        driver.log(req("3", "c.com")).await;
        let stats = driver.stats().await;
        assert_eq!(stats.total_entries, 2);
    }

    #[tokio::test]
    async fn clear_resets_stats() {
        let driver = InMemoryLogDriver::new(10);
        driver.log(req("1", "a.com")).await;
        driver.clear().await;
        let stats = driver.stats().await;
        assert_eq!(stats.total_entries, 0);
    }

    #[tokio::test]
    async fn domain_filter_matches_substring() {
        let driver = InMemoryLogDriver::new(10);
        driver.log(req("1", "ads.example.com")).await;
        driver.log(req("2", "clean.example.com")).await;
        let filtered = driver
            .get_logs(&LogFilter {
                domain: Some("ads".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].query_name(), Some("ads.example.com"));
    }
}
