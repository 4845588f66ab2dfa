//! Exercises the manager against the real `ConfigStore`: driver swaps and
//! reloads persist to disk and take effect without a restart.

use dnswarden::bus::EventBus;
use dnswarden::config::ConfigStore;
use dnswarden::manager::Manager;
use std::sync::Arc;

#[tokio::test]
async fn driver_swap_persists_across_a_fresh_manager() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");

    let bus = Arc::new(EventBus::new());
    let manager = Manager::new(ConfigStore::new(config_path.clone()), bus);
    manager.start(Some(0)).await.unwrap();
    manager.update_driver_configuration("logs", "inmemory").await.unwrap();
    manager.stop().await;

    let contents = tokio::fs::read_to_string(&config_path).await.unwrap();
    assert!(contents.contains("\"logs\""));
    assert!(contents.contains("\"inmemory\""));

    // A second manager reading the same path picks up the persisted selection.
    let bus2 = Arc::new(EventBus::new());
    let manager2 = Manager::new(ConfigStore::new(config_path), bus2);
    manager2.start(Some(0)).await.unwrap();
    let overview = manager2.driver_overview().await;
    assert_eq!(overview["current"]["logs"], "inmemory");
    manager2.stop().await;
}

#[tokio::test]
async fn reload_config_picks_up_externally_written_changes() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");

    let bus = Arc::new(EventBus::new());
    let manager = Manager::new(ConfigStore::new(config_path.clone()), bus);
    manager.start(Some(0)).await.unwrap();

    let mut document = manager.get_status().await;
    assert!(document.current_nextdns_config_id.is_none());

    let store = ConfigStore::new(config_path);
    let mut on_disk = store.load().await;
    on_disk.server.nextdns_config_id = Some("externally-set".to_string());
    store.save(on_disk).await.unwrap();

    manager.reload_config().await.unwrap();
    document = manager.get_status().await;
    assert_eq!(document.current_nextdns_config_id.as_deref(), Some("externally-set"));

    manager.stop().await;
}
