//! End-to-end coverage of the control API surface, driven over real HTTP
//! against the same router `main.rs` assembles.

mod common;

use common::spawn_test_server;

#[tokio::test]
async fn status_reports_enabled_and_port() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(dir.path()).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .get(format!("{}/api/dns/status", server.base_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["enabled"], true);
    assert!(body["server"]["port"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn driver_overview_lists_available_and_current_selections() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(dir.path()).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .get(format!("{}/api/dns/driver", server.base_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(body["available"]["cache"].as_array().unwrap().contains(&serde_json::json!("inmemory")));
    assert_eq!(body["current"]["cache"], "inmemory");
}

#[tokio::test]
async fn toggle_stops_then_restarts_the_proxy() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(dir.path()).await;
    let client = reqwest::Client::new();

    let toggled: serde_json::Value = client
        .post(format!("{}/api/dns/toggle", server.base_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(toggled["enabled"], false);

    let toggled_again: serde_json::Value = client
        .post(format!("{}/api/dns/toggle", server.base_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(toggled_again["enabled"], true);
}

#[tokio::test]
async fn driver_scope_update_rejects_unknown_scope() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(dir.path()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/dns/bogus", server.base_url()))
        .json(&serde_json::json!({"method": "SET", "driver": "inmemory"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn driver_scope_update_rejects_non_set_method() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(dir.path()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/dns/cache", server.base_url()))
        .json(&serde_json::json!({"method": "DELETE", "driver": "inmemory"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn provider_ordering_switches_to_tracked_strategy() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(dir.path()).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/dns/ordering", server.base_url()))
        .json(&serde_json::json!({"ordering": "tracked"}))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let contents = tokio::fs::read_to_string(dir.path().join("config.json")).await.unwrap();
    assert!(contents.contains("\"tracked\""));
}

#[tokio::test]
async fn nextdns_config_id_round_trips_through_status() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(dir.path()).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/dns/nextdns", server.base_url()))
        .json(&serde_json::json!({"configId": "abc123"}))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let status: serde_json::Value = client
        .get(format!("{}/api/dns/status", server.base_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["currentNextDnsConfigId"], "abc123");
}
