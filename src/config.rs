//! The persisted JSON document at `{cwd}/data/dns-config.json` describing
//! server + driver selections. Mirrors a conventional `DnsConfig`-style
//! loading flow: missing/malformed files fall back to defaults rather than
//! failing startup.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;

const DEFAULT_PORT: u16 = 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecondaryDns {
    Cloudflare,
    Google,
    Opendns,
}

impl Default for SecondaryDns {
    fn default() -> Self {
        SecondaryDns::Cloudflare
    }
}

/// Which [`crate::providers::OrderProviders`] strategy the resolver uses
/// for upstream fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderOrderingKind {
    /// The list exactly as assembled.
    AsConfigured,
    /// Deprioritizes providers by call volume/failure rate; see
    /// [`crate::providers::tracker`].
    Tracked,
}

impl Default for ProviderOrderingKind {
    fn default() -> Self {
        ProviderOrderingKind::AsConfigured
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(rename = "nextdnsConfigId")]
    pub nextdns_config_id: Option<String>,
    #[serde(rename = "enableWhitelist")]
    pub enable_whitelist: bool,
    #[serde(rename = "secondaryDns")]
    pub secondary_dns: SecondaryDns,
    #[serde(default, rename = "providerOrdering")]
    pub ordering: ProviderOrderingKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            nextdns_config_id: None,
            enable_whitelist: false,
            secondary_dns: SecondaryDns::default(),
            ordering: ProviderOrderingKind::default(),
        }
    }
}

/// `{type, options}` for one driver slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSelection {
    #[serde(rename = "type")]
    pub driver_type: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

impl DriverSelection {
    fn new(driver_type: &str) -> Self {
        Self {
            driver_type: driver_type.to_string(),
            options: serde_json::json!({}),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSelections {
    pub logs: DriverSelection,
    pub cache: DriverSelection,
    pub blacklist: DriverSelection,
    pub whitelist: DriverSelection,
}

impl Default for DriverSelections {
    fn default() -> Self {
        Self {
            logs: DriverSelection::new("console"),
            cache: DriverSelection::new("inmemory"),
            blacklist: DriverSelection::new("inmemory"),
            whitelist: DriverSelection::new("inmemory"),
        }
    }
}

/// The full persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub server: ServerConfig,
    pub drivers: DriverSelections,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            drivers: DriverSelections::default(),
            last_updated: None,
        }
    }
}

impl ConfigDocument {
    /// Per-field validation: invalid fields silently revert to their
    /// default rather than failing the whole load.
    fn sanitize(mut self) -> Self {
        if self.server.port == 0 {
            warn!("config: invalid port, reverting to default");
            self.server.port = DEFAULT_PORT;
        }
        if self.drivers.logs.driver_type.trim().is_empty() {
            self.drivers.logs = DriverSelection::new("console");
        }
        if self.drivers.cache.driver_type.trim().is_empty() {
            self.drivers.cache = DriverSelection::new("inmemory");
        }
        if self.drivers.blacklist.driver_type.trim().is_empty() {
            self.drivers.blacklist = DriverSelection::new("inmemory");
        }
        if self.drivers.whitelist.driver_type.trim().is_empty() {
            self.drivers.whitelist = DriverSelection::new("inmemory");
        }
        self
    }
}

/// Serializes load/save behind one critical section so concurrent callers
/// never interleave a read with a write.
pub struct ConfigStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path, guard: Mutex::new(()) }
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("data").join("dns-config.json")
    }

    /// Missing file -> default document. Malformed file -> warn and use
    /// defaults. Environment variables are applied as fallbacks for
    /// fields the document omits.
    pub async fn load(&self) -> ConfigDocument {
        let _guard = self.guard.lock().await;
        Self::load_from(&self.path).await
    }

    async fn load_from(path: &Path) -> ConfigDocument {
        let mut document = match tokio::fs::read_to_string(path).await {
            Ok(contents) => match serde_json::from_str::<ConfigDocument>(&contents) {
                Ok(doc) => doc.sanitize(),
                Err(err) => {
                    // A type mismatch on any one field fails the whole
                    // document here, not just that field — every other
                    // persisted value (nextdns config id, driver
                    // selections, ...) reverts to default too. Per-field
                    // recovery would need a custom Deserialize impl.
                    warn!(%err, "malformed config document, using defaults");
                    ConfigDocument::default()
                }
            },
            Err(_) => ConfigDocument::default(),
        };

        if document.server.nextdns_config_id.is_none() {
            if let Ok(id) = std::env::var("NEXTDNS_CONFIG_ID") {
                document.server.nextdns_config_id = Some(id);
            }
        }
        if let Ok(port) = std::env::var("DNS_PROXY_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                document.server.port = port;
            }
        }

        document
    }

    pub async fn save(&self, mut document: ConfigDocument) -> Result<()> {
        let _guard = self.guard.lock().await;
        document.last_updated = Some(Utc::now());
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&document)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let doc = ConfigStore::load_from(&path).await;
        assert_eq!(doc.server.port, DEFAULT_PORT);
    }

    #[tokio::test]
    async fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let doc = ConfigStore::load_from(&path).await;
        assert_eq!(doc.server.port, DEFAULT_PORT);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        let mut doc = ConfigDocument::default();
        doc.server.port = 5353;
        store.save(doc).await.unwrap();
        let loaded = store.load().await;
        assert_eq!(loaded.server.port, 5353);
    }

    #[test]
    fn zero_port_reverts_to_default() {
        let mut doc = ConfigDocument::default();
        doc.server.port = 0;
        let doc = doc.sanitize();
        assert_eq!(doc.server.port, DEFAULT_PORT);
    }
}
