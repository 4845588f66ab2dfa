//! String-keyed constructor for each driver kind/implementation. Resolves a
//! [`crate::config::DriverSelection`] to a concrete instance, validating the
//! key up front at config-load time rather than dispatching lazily on the
//! hot path.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::DriverSelection;
use crate::drivers::cache::{CacheDriver, FileCacheDriver, InMemoryCacheDriver};
use crate::drivers::list::{FileListDriver, InMemoryListDriver, ListDriver};
use crate::drivers::logs::{ConsoleLogDriver, FileLogDriver, InMemoryLogDriver, LogDriver};
use crate::error::{Result, WardenError};

const DATA_DIR: &str = "data";

pub async fn build_log_driver(selection: &DriverSelection) -> Result<Arc<dyn LogDriver>> {
    match selection.driver_type.as_str() {
        "console" => Ok(Arc::new(ConsoleLogDriver::new())),
        "inmemory" => {
            let max_entries = selection
                .options
                .get("maxEntries")
                .and_then(|v| v.as_u64())
                .unwrap_or(InMemoryLogDriver::DEFAULT_MAX_ENTRIES as u64) as usize;
            Ok(Arc::new(InMemoryLogDriver::new(max_entries)))
        }
        "file" => {
            let path = selection
                .options
                .get("path")
                .and_then(|v| v.as_str())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DATA_DIR).join("logs.jsonl"));
            Ok(Arc::new(FileLogDriver::open(path).await?))
        }
        "sqlite" => Err(WardenError::Config(
            "sqlite log driver is out of scope: only the driver contract is specified".into(),
        )),
        other => Err(WardenError::Config(format!("unknown log driver: {other}"))),
    }
}

pub async fn build_cache_driver(selection: &DriverSelection) -> Result<Arc<dyn CacheDriver>> {
    match selection.driver_type.as_str() {
        "inmemory" => {
            let max_size = selection
                .options
                .get("maxSize")
                .and_then(|v| v.as_u64())
                .unwrap_or(InMemoryCacheDriver::DEFAULT_MAX_SIZE as u64) as usize;
            let driver = InMemoryCacheDriver::new(max_size);
            driver.spawn_background_cleanup();
            Ok(driver)
        }
        "file" | "optimized-file" => {
            let dir = selection
                .options
                .get("dir")
                .and_then(|v| v.as_str())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DATA_DIR).join("cache"));
            let max_size = selection
                .options
                .get("maxSize")
                .and_then(|v| v.as_u64())
                .unwrap_or(FileCacheDriver::DEFAULT_MAX_SIZE as u64) as usize;
            let driver = FileCacheDriver::open(dir, max_size).await?;
            driver.spawn_background_tasks();
            Ok(driver)
        }
        "sqlite" => Err(WardenError::Config(
            "sqlite cache driver is out of scope: only the driver contract is specified".into(),
        )),
        other => Err(WardenError::Config(format!("unknown cache driver: {other}"))),
    }
}

pub async fn build_list_driver(
    selection: &DriverSelection,
    default_subdir: &str,
) -> Result<Arc<dyn ListDriver>> {
    match selection.driver_type.as_str() {
        "inmemory" => Ok(Arc::new(InMemoryListDriver::new(true))),
        "file" | "optimized-file" => {
            let dir = selection
                .options
                .get("dir")
                .and_then(|v| v.as_str())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DATA_DIR).join(default_subdir));
            let driver = FileListDriver::open(dir, true).await?;
            driver.spawn_flush_task();
            Ok(driver)
        }
        "sqlite" => Err(WardenError::Config(format!(
            "sqlite {default_subdir} driver is out of scope: only the driver contract is specified"
        ))),
        other => Err(WardenError::Config(format!(
            "unknown {default_subdir} driver: {other}"
        ))),
    }
}

/// The names recognized by each factory function, surfaced via
/// `GET /api/dns/driver`.
pub fn available_drivers() -> AvailableDrivers {
    AvailableDrivers {
        logs: vec!["console", "inmemory", "file", "sqlite"],
        cache: vec!["inmemory", "file", "optimized-file", "sqlite"],
        blacklist: vec!["inmemory", "file", "optimized-file", "sqlite"],
        whitelist: vec!["inmemory", "file", "optimized-file", "sqlite"],
    }
}

pub struct AvailableDrivers {
    pub logs: Vec<&'static str>,
    pub cache: Vec<&'static str>,
    pub blacklist: Vec<&'static str>,
    pub whitelist: Vec<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn builds_console_log_driver() {
        let selection = DriverSelection {
            driver_type: "console".to_string(),
            options: json!({}),
        };
        assert!(build_log_driver(&selection).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_unknown_driver_kind() {
        let selection = DriverSelection {
            driver_type: "carrier-pigeon".to_string(),
            options: json!({}),
        };
        assert!(build_log_driver(&selection).await.is_err());
    }

    #[tokio::test]
    async fn rejects_sqlite_cache_driver() {
        let selection = DriverSelection {
            driver_type: "sqlite".to_string(),
            options: json!({}),
        };
        assert!(build_cache_driver(&selection).await.is_err());
    }
}
