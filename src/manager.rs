//! Process-wide lifecycle controller: loads the persisted config, builds
//! the driver/provider graph, and starts/stops the UDP listener. The HTTP
//! control API stays up independent of this — so a client can flip the
//! proxy on again even while it's stopped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::error;

use crate::bus::{BusMessage, EventBus};
use crate::config::{ConfigDocument, ConfigStore, DriverSelection, ProviderOrderingKind, SecondaryDns};
use crate::drivers::factory;
use crate::drivers::logs::{LogEntry, LogLevel, ServerEventType};
use crate::error::Result;
use crate::providers::tracker::TrackedOrdering;
use crate::providers::{
    AsConfiguredOrdering, CloudflareProvider, GoogleProvider, NextDnsProvider, OpenDnsProvider,
    OrderProviders, Provider, SystemProvider,
};
use crate::resolver::{Drivers, Resolver};
use crate::server::udp::UdpListener;

/// Upstream used by the System provider when no finer host resolver
/// configuration is available.
const FALLBACK_SYSTEM_RESOLVER: &str = "127.0.0.1:53";

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub is_running: bool,
    pub port: u16,
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub enabled: bool,
    pub server: Option<ServerStatus>,
    #[serde(rename = "currentNextDnsConfigId")]
    pub current_nextdns_config_id: Option<String>,
}

struct UdpHandle {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

pub struct Manager {
    config: Arc<ConfigStore>,
    bus: Arc<EventBus>,
    resolver: Arc<Resolver>,
    http_client: Client,
    running: AtomicBool,
    port: AtomicU16,
    document: RwLock<ConfigDocument>,
    udp: SyncMutex<Option<UdpHandle>>,
}

impl Manager {
    pub fn new(config: ConfigStore, bus: Arc<EventBus>) -> Self {
        let drivers = Drivers {
            logs: Arc::new(crate::drivers::logs::ConsoleLogDriver::new()),
            cache: crate::drivers::cache::InMemoryCacheDriver::new(10_000),
            blacklist: Arc::new(crate::drivers::list::InMemoryListDriver::new(true)),
            whitelist: Arc::new(crate::drivers::list::InMemoryListDriver::new(true)),
        };
        let resolver = Arc::new(Resolver::new(Vec::new(), drivers, Arc::clone(&bus)));
        Self {
            config: Arc::new(config),
            bus,
            resolver,
            http_client: Client::new(),
            running: AtomicBool::new(false),
            port: AtomicU16::new(0),
            document: RwLock::new(ConfigDocument::default()),
            udp: SyncMutex::new(None),
        }
    }

    pub fn resolver(&self) -> Arc<Resolver> {
        Arc::clone(&self.resolver)
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    fn build_providers(&self, document: &ConfigDocument) -> Vec<Arc<dyn Provider>> {
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
        providers.push(Arc::new(NextDnsProvider::new(
            self.http_client.clone(),
            document.server.nextdns_config_id.clone(),
        )));
        let secondary: Arc<dyn Provider> = match document.server.secondary_dns {
            SecondaryDns::Cloudflare => Arc::new(CloudflareProvider::new(self.http_client.clone())),
            SecondaryDns::Google => Arc::new(GoogleProvider::new(self.http_client.clone())),
            SecondaryDns::Opendns => Arc::new(OpenDnsProvider::new(self.http_client.clone())),
        };
        providers.push(secondary);
        let fallback_addr: SocketAddr =
            FALLBACK_SYSTEM_RESOLVER.parse().expect("valid fallback address");
        providers.push(Arc::new(SystemProvider::new(fallback_addr)));
        providers
    }

    async fn build_drivers(&self, document: &ConfigDocument) -> Result<Drivers> {
        Ok(Drivers {
            logs: factory::build_log_driver(&document.drivers.logs).await?,
            cache: factory::build_cache_driver(&document.drivers.cache).await?,
            blacklist: factory::build_list_driver(&document.drivers.blacklist, "blacklist").await?,
            whitelist: factory::build_list_driver(&document.drivers.whitelist, "whitelist").await?,
        })
    }

    /// Loads config, assembles drivers/providers, and starts the UDP
    /// listener. `port` overrides the persisted server port when given.
    pub async fn start(&self, port: Option<u16>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let document = self.config.load().await;
        let port = port.unwrap_or(document.server.port);

        match self.start_with_document(&document, port).await {
            Ok(()) => {
                *self.document.write().await = document;
                self.port.store(port, Ordering::SeqCst);
                self.running.store(true, Ordering::SeqCst);
                self.emit_server_event(ServerEventType::Started, "manager started", None, port);
                self.bus
                    .publish(BusMessage::Status(serde_json::json!({"enabled": true, "port": port})));
                self.bus.publish(BusMessage::Info(serde_json::json!({
                    "providers": self.resolver.provider_names(),
                })));
                Ok(())
            }
            Err(err) => {
                error!(%err, "manager startup failed");
                self.emit_server_event(
                    ServerEventType::Crashed,
                    &format!("startup failed: {err}"),
                    Some(serde_json::json!({"error": err.to_string(), "errorStack": format!("{err:?}")})),
                    port,
                );
                self.running.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn build_ordering(&self, document: &ConfigDocument) -> Arc<dyn OrderProviders> {
        match document.server.ordering {
            ProviderOrderingKind::AsConfigured => Arc::new(AsConfiguredOrdering),
            ProviderOrderingKind::Tracked => Arc::new(TrackedOrdering::new(self.resolver.tracker())),
        }
    }

    async fn start_with_document(&self, document: &ConfigDocument, port: u16) -> Result<()> {
        let drivers = self.build_drivers(document).await?;
        let providers = self.build_providers(document);
        self.resolver.set_drivers(drivers);
        self.resolver.update_providers(providers);
        self.resolver.set_ordering(self.build_ordering(document));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let listener = UdpListener::bind(port, self.resolver(), self.bus()).await?;
        let join = tokio::spawn(listener.serve(shutdown_rx));
        *self.udp.lock() = Some(UdpHandle { shutdown_tx, join });
        Ok(())
    }

    pub async fn stop(&self) {
        let handle = self.udp.lock().take();
        if let Some(handle) = handle {
            let _ = handle.shutdown_tx.send(());
            let _ = handle.join.await;
        }
        self.running.store(false, Ordering::SeqCst);
        self.emit_server_event(
            ServerEventType::Stopped,
            "manager stopped",
            None,
            self.port.load(Ordering::SeqCst),
        );
        self.bus.publish(BusMessage::Status(serde_json::json!({"enabled": false})));
    }

    pub async fn toggle(&self) {
        if self.running.load(Ordering::SeqCst) {
            self.stop().await;
        } else {
            let _ = self.start(None).await;
        }
    }

    pub async fn set_nextdns_config_id(&self, id: Option<String>) -> Result<()> {
        let mut document = self.document.write().await;
        document.server.nextdns_config_id = id;
        self.config.save(document.clone()).await?;
        let providers = self.build_providers(&document);
        self.resolver.update_providers(providers);
        self.bus.publish(BusMessage::Info(serde_json::json!({
            "nextdnsConfigId": document.server.nextdns_config_id,
        })));
        Ok(())
    }

    /// Swaps one driver scope ("logs" | "cache" | "blacklist" | "whitelist")
    /// to a new driver type, persisting the selection.
    pub async fn update_driver_configuration(&self, scope: &str, driver_type: &str) -> Result<()> {
        let mut document = self.document.write().await;
        let selection = DriverSelection {
            driver_type: driver_type.to_string(),
            options: serde_json::json!({}),
        };
        match scope {
            "logs" => document.drivers.logs = selection,
            "cache" => document.drivers.cache = selection,
            "blacklist" => document.drivers.blacklist = selection,
            "whitelist" => document.drivers.whitelist = selection,
            other => {
                return Err(crate::error::WardenError::Config(format!("unknown driver scope: {other}")));
            }
        }
        self.config.save(document.clone()).await?;
        let drivers = self.build_drivers(&document).await?;
        self.resolver.set_drivers(drivers);
        self.bus
            .publish(BusMessage::Info(serde_json::json!({"scope": scope, "driver": driver_type})));
        Ok(())
    }

    pub async fn reload_config(&self) -> Result<()> {
        let document = self.config.load().await;
        let drivers = self.build_drivers(&document).await?;
        let providers = self.build_providers(&document);
        self.resolver.set_drivers(drivers);
        self.resolver.update_providers(providers);
        self.resolver.set_ordering(self.build_ordering(&document));
        *self.document.write().await = document;
        self.bus
            .publish(BusMessage::Info(serde_json::json!({"reloaded": true})));
        Ok(())
    }

    /// Swaps the provider ordering strategy, persisting the selection.
    pub async fn set_provider_ordering(&self, ordering: ProviderOrderingKind) -> Result<()> {
        let mut document = self.document.write().await;
        document.server.ordering = ordering;
        self.config.save(document.clone()).await?;
        self.resolver.set_ordering(self.build_ordering(&document));
        self.bus
            .publish(BusMessage::Info(serde_json::json!({"providerOrdering": document.server.ordering})));
        Ok(())
    }

    pub async fn get_status(&self) -> ManagerStatus {
        let running = self.running.load(Ordering::SeqCst);
        let document = self.document.read().await;
        ManagerStatus {
            enabled: running,
            server: if running {
                Some(ServerStatus {
                    is_running: true,
                    port: self.port.load(Ordering::SeqCst),
                    providers: self.resolver.provider_names(),
                })
            } else {
                None
            },
            current_nextdns_config_id: document.server.nextdns_config_id.clone(),
        }
    }

    /// `{available, current}` for `GET /api/dns/driver`.
    pub async fn driver_overview(&self) -> serde_json::Value {
        let available = factory::available_drivers();
        let document = self.document.read().await;
        serde_json::json!({
            "available": {
                "logs": available.logs,
                "cache": available.cache,
                "blacklist": available.blacklist,
                "whitelist": available.whitelist,
            },
            "current": {
                "logs": document.drivers.logs.driver_type,
                "cache": document.drivers.cache.driver_type,
                "blacklist": document.drivers.blacklist.driver_type,
                "whitelist": document.drivers.whitelist.driver_type,
            },
        })
    }

    fn emit_server_event(
        &self,
        event_type: ServerEventType,
        message: &str,
        config_changes: Option<serde_json::Value>,
        port: u16,
    ) {
        let entry = LogEntry::ServerEvent {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            level: LogLevel::Info,
            event_type,
            port,
            message: message.to_string(),
            config_changes,
        };
        self.bus.publish(BusMessage::LogEvent(entry.clone()));
        let logs = self.resolver.drivers().logs.clone();
        tokio::spawn(async move {
            logs.log(entry).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(tmp: &std::path::Path) -> Manager {
        let bus = Arc::new(EventBus::new());
        let config = ConfigStore::new(tmp.join("config.json"));
        Manager::new(config, bus)
    }

    #[tokio::test]
    async fn start_then_stop_toggles_running_status() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.start(Some(0)).await.unwrap();
        assert!(manager.get_status().await.enabled);
        manager.stop().await;
        assert!(!manager.get_status().await.enabled);
    }

    #[tokio::test]
    async fn starting_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.start(Some(0)).await.unwrap();
        manager.start(Some(0)).await.unwrap();
        manager.stop().await;
    }

    #[tokio::test]
    async fn set_nextdns_config_id_persists_and_rebuilds_providers() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.start(Some(0)).await.unwrap();
        manager.set_nextdns_config_id(Some("abc123".to_string())).await.unwrap();
        assert_eq!(
            manager.get_status().await.current_nextdns_config_id.as_deref(),
            Some("abc123")
        );
        manager.stop().await;
    }

    #[tokio::test]
    async fn update_driver_configuration_rejects_unknown_scope() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.start(Some(0)).await.unwrap();
        let err = manager.update_driver_configuration("bogus", "inmemory").await;
        assert!(err.is_err());
        manager.stop().await;
    }

    #[tokio::test]
    async fn set_provider_ordering_persists_and_swaps_resolver_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.start(Some(0)).await.unwrap();

        manager.set_provider_ordering(crate::config::ProviderOrderingKind::Tracked).await.unwrap();

        let contents = tokio::fs::read_to_string(dir.path().join("config.json")).await.unwrap();
        assert!(contents.contains("\"tracked\""));

        // A fresh manager reading the same config starts with the tracked
        // strategy already selected.
        let bus2 = Arc::new(EventBus::new());
        let manager2 = Manager::new(ConfigStore::new(dir.path().join("config.json")), bus2);
        manager2.start(Some(0)).await.unwrap();
        let document = manager2.document.read().await;
        assert_eq!(document.server.ordering, crate::config::ProviderOrderingKind::Tracked);
        drop(document);
        manager2.stop().await;

        manager.stop().await;
    }

    #[tokio::test]
    async fn driver_overview_reflects_current_selection() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.start(Some(0)).await.unwrap();
        let overview = manager.driver_overview().await;
        assert_eq!(overview["current"]["cache"], "inmemory");
        manager.stop().await;
    }
}
