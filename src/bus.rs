//! Process-wide SSE fan-out. Channels are path-shaped strings; clients
//! subscribe with prefix matching and are dropped on the first send error,
//! since subscribers must be treated as independently failing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::drivers::logs::LogEntry;

pub const CHANNEL_STATUS: &str = "dns/status";
pub const CHANNEL_INFO: &str = "dns/info";
pub const CHANNEL_LOG_EVENT: &str = "dns/log/event";
pub const CHANNEL_LOG_REFRESH: &str = "dns/log/";
pub const CHANNEL_CACHE_REFRESH: &str = "dns/cache/";
pub const CHANNEL_BLACKLIST_REFRESH: &str = "dns/blacklist/";
pub const CHANNEL_WHITELIST_REFRESH: &str = "dns/whitelist/";
pub const CHANNEL_HEARTBEAT: &str = "system/heartbeat";

pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A message destined for one channel.
#[derive(Debug, Clone)]
pub enum BusMessage {
    Status(serde_json::Value),
    Info(serde_json::Value),
    LogEvent(LogEntry),
    LogRefresh(serde_json::Value),
    CacheRefresh(serde_json::Value),
    BlacklistRefresh(serde_json::Value),
    WhitelistRefresh(serde_json::Value),
    Heartbeat,
}

impl BusMessage {
    fn channel(&self) -> &'static str {
        match self {
            BusMessage::Status(_) => CHANNEL_STATUS,
            BusMessage::Info(_) => CHANNEL_INFO,
            BusMessage::LogEvent(_) => CHANNEL_LOG_EVENT,
            BusMessage::LogRefresh(_) => CHANNEL_LOG_REFRESH,
            BusMessage::CacheRefresh(_) => CHANNEL_CACHE_REFRESH,
            BusMessage::BlacklistRefresh(_) => CHANNEL_BLACKLIST_REFRESH,
            BusMessage::WhitelistRefresh(_) => CHANNEL_WHITELIST_REFRESH,
            BusMessage::Heartbeat => CHANNEL_HEARTBEAT,
        }
    }

    fn payload(&self) -> serde_json::Value {
        match self {
            BusMessage::Status(v)
            | BusMessage::Info(v)
            | BusMessage::LogRefresh(v)
            | BusMessage::CacheRefresh(v)
            | BusMessage::BlacklistRefresh(v)
            | BusMessage::WhitelistRefresh(v) => v.clone(),
            BusMessage::LogEvent(entry) => {
                serde_json::to_value(entry).unwrap_or(serde_json::Value::Null)
            }
            BusMessage::Heartbeat => serde_json::json!({"ping": "pong"}),
        }
    }

    /// `{type, data, timestamp}` SSE message envelope.
    pub fn to_sse_frame(&self) -> String {
        let envelope = serde_json::json!({
            "type": self.channel(),
            "data": self.payload(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        format!("data: {}\n\n", envelope)
    }
}

struct Subscriber {
    id: u64,
    prefixes: Vec<String>,
    sender: mpsc::UnboundedSender<String>,
}

fn matches_any_prefix(channel: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| channel.starts_with(p.as_str()))
}

/// Maintains a mutable client set guarded for concurrent
/// subscribe/unsubscribe/emit.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(Vec::new()), next_id: AtomicU64::new(0) }
    }

    /// Subscribe to any channel whose path starts with one of `prefixes`.
    /// Returns the receiving half of an SSE frame stream and an id used
    /// to unsubscribe.
    pub fn subscribe(&self, prefixes: Vec<String>) -> (u64, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber { id, prefixes, sender: tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }

    /// Deliver `message` to every subscriber whose prefix list matches
    /// its channel. A client is dropped on the first send error (dead
    /// channel).
    pub fn publish(&self, message: BusMessage) {
        let channel = message.channel();
        let frame = message.to_sse_frame();
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| {
            if matches_any_prefix(channel, &sub.prefixes) {
                sub.sender.send(frame.clone()).is_ok()
            } else {
                true
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Spawns the periodic `system/heartbeat` emitter.
    pub fn spawn_heartbeat(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let bus = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                bus.publish(BusMessage::Heartbeat);
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_matching_channel() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe(vec![CHANNEL_STATUS.to_string()]);
        bus.publish(BusMessage::Status(serde_json::json!({"enabled": true})));
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("dns/status"));
        assert!(frame.contains("enabled"));
    }

    #[tokio::test]
    async fn subscriber_does_not_receive_other_channels() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe(vec![CHANNEL_STATUS.to_string()]);
        bus.publish(BusMessage::Info(serde_json::json!({})));
        // give the unbounded channel a chance; it should simply have nothing
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.subscribe(vec![CHANNEL_STATUS.to_string()]);
        bus.unsubscribe(id);
        bus.publish(BusMessage::Status(serde_json::json!({})));
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dead_subscriber_is_dropped_on_send_error() {
        let bus = EventBus::new();
        let (_id, rx) = bus.subscribe(vec![CHANNEL_STATUS.to_string()]);
        drop(rx);
        bus.publish(BusMessage::Status(serde_json::json!({})));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn prefix_match_covers_log_channel_family() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe(vec!["dns/log/".to_string()]);
        bus.publish(BusMessage::LogRefresh(serde_json::json!({"count": 3})));
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("dns/log/"));
    }
}
