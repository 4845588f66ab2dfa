//! Optional per-provider call counters backing the provider-ordering
//! heuristic. Follows a per-key `DashMap` counter pattern, repurposed here
//! for call volume/failure-rate bookkeeping instead of throttling.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::{OrderProviders, Provider};

const NEXTDNS_HOURLY_THRESHOLD: u64 = 100;
const WINDOW: Duration = Duration::from_secs(3600);

#[derive(Default)]
struct Counters {
    calls: AtomicU64,
    failures: AtomicU64,
}

/// Tracks per-provider call/failure counts in rolling hourly windows.
/// Strategy, not a default — opt in when call-volume-aware ordering is wanted.
pub struct ProviderTracker {
    windows: DashMap<String, (Instant, Counters)>,
}

impl ProviderTracker {
    pub fn new() -> Self {
        Self { windows: DashMap::new() }
    }

    fn current_window<'a>(&'a self, provider: &str) -> dashmap::mapref::one::RefMut<'a, String, (Instant, Counters)> {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(provider.to_string())
            .or_insert_with(|| (now, Counters::default()));
        if now.duration_since(entry.0) >= WINDOW {
            *entry = (now, Counters::default());
        }
        entry
    }

    pub fn record_call(&self, provider: &str, success: bool) {
        let entry = self.current_window(provider);
        entry.1.calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            entry.1.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn hourly_calls(&self, provider: &str) -> u64 {
        self.windows
            .get(provider)
            .map(|e| e.1.calls.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn failure_rate(&self, provider: &str) -> f64 {
        self.windows
            .get(provider)
            .map(|e| {
                let calls = e.1.calls.load(Ordering::Relaxed);
                let failures = e.1.failures.load(Ordering::Relaxed);
                if calls == 0 {
                    0.0
                } else {
                    failures as f64 / calls as f64
                }
            })
            .unwrap_or(0.0)
    }
}

impl Default for ProviderTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Deprioritizes NextDNS once its hourly call count exceeds
/// [`NEXTDNS_HOURLY_THRESHOLD`], then orders the remainder by ascending
/// failure rate. The ordering computed for one query is frozen at call
/// time (the returned `Vec` is a snapshot), satisfying the "monotonic
/// w.r.t. in-flight queries" requirement without further synchronization.
pub struct TrackedOrdering {
    tracker: Arc<ProviderTracker>,
}

impl TrackedOrdering {
    pub fn new(tracker: Arc<ProviderTracker>) -> Self {
        Self { tracker }
    }
}

impl OrderProviders for TrackedOrdering {
    fn order<'a>(&self, providers: &'a [Arc<dyn Provider>]) -> Vec<Arc<dyn Provider>> {
        let mut ranked: Vec<(bool, u64, String, Arc<dyn Provider>)> = providers
            .iter()
            .map(|p| {
                let name = p.name().to_string();
                let overloaded = name == "nextdns" && self.tracker.hourly_calls(&name) > NEXTDNS_HOURLY_THRESHOLD;
                let failure_rate_bucket = (self.tracker.failure_rate(&name) * 1_000_000.0) as u64;
                (overloaded, failure_rate_bucket, name, Arc::clone(p))
            })
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        ranked.into_iter().map(|(_, _, _, p)| p).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::error::Result;

    struct Named(&'static str);

    #[async_trait]
    impl Provider for Named {
        fn name(&self) -> &str {
            self.0
        }
        async fn resolve(&self, _query: &[u8]) -> Result<Vec<u8>> {
            Ok(vec![])
        }
    }

    #[test]
    fn deprioritizes_overloaded_nextdns() {
        let tracker = Arc::new(ProviderTracker::new());
        for _ in 0..150 {
            tracker.record_call("nextdns", true);
        }
        let ordering = TrackedOrdering::new(Arc::clone(&tracker));
        let providers: Vec<Arc<dyn Provider>> =
            vec![Arc::new(Named("nextdns")), Arc::new(Named("cloudflare"))];
        let ordered = ordering.order(&providers);
        assert_eq!(ordered[0].name(), "cloudflare");
        assert_eq!(ordered[1].name(), "nextdns");
    }

    #[test]
    fn orders_by_ascending_failure_rate() {
        let tracker = Arc::new(ProviderTracker::new());
        tracker.record_call("flaky", false);
        tracker.record_call("flaky", true);
        tracker.record_call("stable", true);
        tracker.record_call("stable", true);
        let ordering = TrackedOrdering::new(Arc::clone(&tracker));
        let providers: Vec<Arc<dyn Provider>> =
            vec![Arc::new(Named("flaky")), Arc::new(Named("stable"))];
        let ordered = ordering.order(&providers);
        assert_eq!(ordered[0].name(), "stable");
        assert_eq!(ordered[1].name(), "flaky");
    }
}
