//! Orchestrates the query pipeline (gate -> cache -> upstream ->
//! cache-store -> respond). Owns one provider list and one instance of
//! each driver kind; state mutations are atomic with respect to
//! in-flight `resolve` calls.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{BusMessage, EventBus};
use crate::dns::{self, DecodedPacket};
use crate::drivers::cache::{CacheDriver, CachedResponse};
use crate::drivers::list::ListDriver;
use crate::drivers::logs::{
    ClientInfo, LogDriver, LogEntry, LogLevel, Processing, QueryInfo, Transport,
};
use crate::providers::tracker::ProviderTracker;
use crate::providers::{AsConfiguredOrdering, OrderProviders, Provider};

/// Snapshot of the client that sent the query.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub address: String,
    pub port: u16,
    pub transport: Transport,
}

/// Result of one `Resolver::resolve` call.
pub struct ResolveOutcome {
    pub response_bytes: Vec<u8>,
    pub response_time_ms: u64,
    pub cached: bool,
    pub blocked: bool,
    pub whitelisted: bool,
    pub provider: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

/// The four driver instances the resolver owns.
pub struct Drivers {
    pub logs: Arc<dyn LogDriver>,
    pub cache: Arc<dyn CacheDriver>,
    pub blacklist: Arc<dyn ListDriver>,
    pub whitelist: Arc<dyn ListDriver>,
}

/// The state a `resolve` call reads: providers + drivers, replaced
/// atomically by the `Manager` on reconfigure. Readers take a clone of
/// the `Arc` at call start, so a reconfigure mid-flight never tears a
/// single resolve.
struct ResolverState {
    providers: Vec<Arc<dyn Provider>>,
    drivers: Arc<Drivers>,
    ordering: Arc<dyn OrderProviders>,
}

pub struct Resolver {
    state: RwLock<Arc<ResolverState>>,
    bus: Arc<EventBus>,
    /// Call/failure bookkeeping for [`crate::providers::tracker::TrackedOrdering`].
    /// Kept outside `ResolverState` and updated on every upstream attempt
    /// regardless of which ordering is active, so switching to it mid-run
    /// sees history rather than a cold start.
    tracker: Arc<ProviderTracker>,
}

impl Resolver {
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        drivers: Drivers,
        bus: Arc<EventBus>,
    ) -> Self {
        let state = ResolverState {
            providers,
            drivers: Arc::new(drivers),
            ordering: Arc::new(AsConfiguredOrdering),
        };
        Self {
            state: RwLock::new(Arc::new(state)),
            bus,
            tracker: Arc::new(ProviderTracker::new()),
        }
    }

    pub fn tracker(&self) -> Arc<ProviderTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn update_providers(&self, providers: Vec<Arc<dyn Provider>>) {
        let mut state = self.state.write();
        let next = ResolverState {
            providers,
            drivers: Arc::clone(&state.drivers),
            ordering: Arc::clone(&state.ordering),
        };
        *state = Arc::new(next);
    }

    pub fn set_drivers(&self, drivers: Drivers) {
        let mut state = self.state.write();
        let next = ResolverState {
            providers: state.providers.clone(),
            drivers: Arc::new(drivers),
            ordering: Arc::clone(&state.ordering),
        };
        *state = Arc::new(next);
    }

    pub fn set_ordering(&self, ordering: Arc<dyn OrderProviders>) {
        let mut state = self.state.write();
        let next = ResolverState {
            providers: state.providers.clone(),
            drivers: Arc::clone(&state.drivers),
            ordering,
        };
        *state = Arc::new(next);
    }

    pub fn drivers(&self) -> Arc<Drivers> {
        Arc::clone(&self.state.read().drivers)
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.state.read().providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Dispatch one log entry synchronously to the event bus and
    /// asynchronously (fire-and-forget) to the log driver. Neither
    /// dispatch affects the response path on failure.
    fn emit(&self, drivers: &Arc<Drivers>, entry: LogEntry) {
        self.bus.publish(BusMessage::LogEvent(entry.clone()));
        let logs = Arc::clone(&drivers.logs);
        tokio::spawn(async move {
            logs.log(entry).await;
        });
    }

    fn request_entry(id: &str, client: &ClientContext, question: &dns::DnsQuestion) -> LogEntry {
        LogEntry::Request {
            id: id.to_string(),
            timestamp: chrono::Utc::now(),
            level: LogLevel::Info,
            client: ClientInfo {
                address: client.address.clone(),
                port: client.port,
                transport: client.transport,
            },
            query: QueryInfo {
                name: question.name.clone(),
                qtype: question.qtype.to_string(),
                class: question.qclass.to_string(),
            },
        }
    }

    fn response_entry(
        id: &str,
        client: &ClientContext,
        question: &dns::DnsQuestion,
        processing: Processing,
        is_error: bool,
    ) -> LogEntry {
        let client_info = ClientInfo {
            address: client.address.clone(),
            port: client.port,
            transport: client.transport,
        };
        let query = QueryInfo {
            name: question.name.clone(),
            qtype: question.qtype.to_string(),
            class: question.qclass.to_string(),
        };
        if is_error {
            LogEntry::Error {
                id: id.to_string(),
                timestamp: chrono::Utc::now(),
                level: LogLevel::Error,
                client: client_info,
                query,
                processing,
            }
        } else {
            LogEntry::Response {
                id: id.to_string(),
                timestamp: chrono::Utc::now(),
                level: LogLevel::Info,
                client: client_info,
                query,
                processing,
            }
        }
    }

    /// The query pipeline: decode -> gate -> cache -> upstream -> store ->
    /// respond. Never panics or propagates an error to the caller — every
    /// failure mode is translated into a valid DNS response.
    pub async fn resolve(&self, query_bytes: &[u8], client: ClientContext) -> ResolveOutcome {
        let started = Instant::now();
        let state = Arc::clone(&self.state.read());
        let drivers = Arc::clone(&state.drivers);
        let request_id = Uuid::new_v4().to_string();

        // 1. Decode and extract question.
        let decoded = match DecodedPacket::decode(query_bytes) {
            Ok(packet) => packet,
            Err(err) => {
                let entry = Self::response_entry(
                    &request_id,
                    &client,
                    &dns::DnsQuestion {
                        name: String::new(),
                        qtype: dns::DnsType::Other(0),
                        qclass: dns::DnsClass::IN,
                    },
                    Processing {
                        provider: None,
                        response_time_ms: Some(started.elapsed().as_millis() as u64),
                        cached: false,
                        blocked: false,
                        whitelisted: false,
                        success: false,
                        error: Some(err.to_string()),
                    },
                    true,
                );
                self.emit(&drivers, entry);
                return ResolveOutcome {
                    response_bytes: dns::craft_servfail_from_bytes(query_bytes),
                    response_time_ms: started.elapsed().as_millis() as u64,
                    cached: false,
                    blocked: false,
                    whitelisted: false,
                    provider: None,
                    success: false,
                    error: Some(err.to_string()),
                };
            }
        };

        let question = match decoded.extract_question() {
            Some(q) => q.clone(),
            None => {
                return ResolveOutcome {
                    response_bytes: dns::craft_servfail(&decoded),
                    response_time_ms: started.elapsed().as_millis() as u64,
                    cached: false,
                    blocked: false,
                    whitelisted: false,
                    provider: None,
                    success: false,
                    error: Some("no question in packet".to_string()),
                };
            }
        };

        // 2. Gate: whitelist/blacklist.
        let blocked = drivers.blacklist.is_blocked(&question.name).await;
        let whitelist_stats = drivers.whitelist.stats().await;
        let whitelist_empty = whitelist_stats.total_entries == 0;
        let whitelisted = !whitelist_empty && drivers.whitelist.is_allowed(&question.name).await;
        let should_block = (blocked && !whitelisted) || (!whitelist_empty && !whitelisted);

        if should_block {
            let response_bytes = dns::craft_nxdomain(&decoded);
            let provider_label = if blocked { "blacklist" } else { "whitelist" };
            self.emit(&drivers, Self::request_entry(&request_id, &client, &question));
            self.emit(
                &drivers,
                Self::response_entry(
                    &request_id,
                    &client,
                    &question,
                    Processing {
                        provider: Some(provider_label.to_string()),
                        response_time_ms: Some(started.elapsed().as_millis() as u64),
                        cached: false,
                        blocked: true,
                        whitelisted,
                        success: true,
                        error: None,
                    },
                    false,
                ),
            );
            return ResolveOutcome {
                response_bytes,
                response_time_ms: started.elapsed().as_millis() as u64,
                cached: false,
                blocked: true,
                whitelisted,
                provider: Some(provider_label.to_string()),
                success: true,
                error: None,
            };
        }

        // 3. Cache lookup.
        let key = dns::cache_key(&question);
        if let Some(cached) = drivers.cache.get(&key).await {
            let response_bytes = dns::craft_from_cached(&decoded, &cached.packet, cached.expires_at);
            self.emit(&drivers, Self::request_entry(&request_id, &client, &question));
            self.emit(
                &drivers,
                Self::response_entry(
                    &request_id,
                    &client,
                    &question,
                    Processing {
                        provider: Some("cache".to_string()),
                        response_time_ms: Some(started.elapsed().as_millis() as u64),
                        cached: true,
                        blocked: false,
                        whitelisted,
                        success: true,
                        error: None,
                    },
                    false,
                ),
            );
            return ResolveOutcome {
                response_bytes,
                response_time_ms: started.elapsed().as_millis() as u64,
                cached: true,
                blocked: false,
                whitelisted,
                provider: Some("cache".to_string()),
                success: true,
                error: None,
            };
        }

        // 4. Emit request log entry, correlated by request_id (always
        // before any response/error entry).
        self.emit(&drivers, Self::request_entry(&request_id, &client, &question));

        // 5. Upstream fan-out, in the ordering policy's order.
        let ordered_providers = state.ordering.order(&state.providers);
        for provider in &ordered_providers {
            match provider.resolve(query_bytes).await {
                Ok(response_bytes) => {
                    self.tracker.record_call(provider.name(), true);
                    // 6. Cache the parsed response (best-effort decode).
                    if let Ok(response_packet) = DecodedPacket::decode(&response_bytes) {
                        let cached = CachedResponse::new(response_packet, dns::now_ms());
                        drivers.cache.set(key.clone(), cached, None).await;
                    } else {
                        warn!(provider = provider.name(), "upstream response failed to decode; serving raw");
                    }

                    self.emit(
                        &drivers,
                        Self::response_entry(
                            &request_id,
                            &client,
                            &question,
                            Processing {
                                provider: Some(provider.name().to_string()),
                                response_time_ms: Some(started.elapsed().as_millis() as u64),
                                cached: false,
                                blocked: false,
                                whitelisted,
                                success: true,
                                error: None,
                            },
                            false,
                        ),
                    );
                    return ResolveOutcome {
                        response_bytes,
                        response_time_ms: started.elapsed().as_millis() as u64,
                        cached: false,
                        blocked: false,
                        whitelisted,
                        provider: Some(provider.name().to_string()),
                        success: true,
                        error: None,
                    };
                }
                Err(err) => {
                    self.tracker.record_call(provider.name(), false);
                    debug!(provider = provider.name(), %err, "upstream attempt failed");
                    self.emit(
                        &drivers,
                        Self::response_entry(
                            &request_id,
                            &client,
                            &question,
                            Processing {
                                provider: Some(provider.name().to_string()),
                                response_time_ms: Some(started.elapsed().as_millis() as u64),
                                cached: false,
                                blocked: false,
                                whitelisted,
                                success: false,
                                error: Some(err.to_string()),
                            },
                            true,
                        ),
                    );
                }
            }
        }

        // 7. All providers failed.
        self.emit(
            &drivers,
            Self::response_entry(
                &request_id,
                &client,
                &question,
                Processing {
                    provider: Some("dns_resolver".to_string()),
                    response_time_ms: Some(started.elapsed().as_millis() as u64),
                    cached: false,
                    blocked: false,
                    whitelisted,
                    success: false,
                    error: Some("All providers failed".to_string()),
                },
                true,
            ),
        );
        ResolveOutcome {
            response_bytes: dns::craft_servfail(&decoded),
            response_time_ms: started.elapsed().as_millis() as u64,
            cached: false,
            blocked: false,
            whitelisted,
            provider: None,
            success: false,
            error: Some("All providers failed".to_string()),
        }
    }
}
