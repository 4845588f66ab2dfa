//! Shared fixtures for the integration tests: spins up the real combined
//! HTTP service (control API + DoH) on a loopback port backed by a fresh
//! `Manager`, the same way `main.rs` assembles it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use dnswarden::bus::EventBus;
use dnswarden::config::ConfigStore;
use dnswarden::manager::Manager;
use dnswarden::server::{doh, http};

pub struct TestServer {
    pub addr: SocketAddr,
    pub manager: Arc<Manager>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Boots the manager (UDP listener on an ephemeral port) plus the combined
/// control/DoH HTTP router on another ephemeral port, mirroring `main.rs`.
pub async fn spawn_test_server(config_dir: &std::path::Path) -> TestServer {
    let bus = Arc::new(EventBus::new());
    let config = ConfigStore::new(config_dir.join("config.json"));
    let manager = Arc::new(Manager::new(config, Arc::clone(&bus)));
    manager.start(Some(0)).await.expect("manager should start on an ephemeral port");

    let state = http::AppState { manager: Arc::clone(&manager), bus: Arc::clone(&bus) };
    let app = http::router(state).merge(doh::router(manager.resolver()));
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, make_service).await;
    });

    TestServer { addr, manager, handle }
}

/// A minimal recursive A-query for `name`, wire-encoded.
pub fn build_a_query(name: &str, id: u16) -> Vec<u8> {
    use dnswarden::dns::{DnsClass, DnsHeader, DnsQr, DnsQuestion, DnsType};
    dnswarden::DecodedPacket {
        header: DnsHeader { id, qr: DnsQr::Query, rd: true, qdcount: 1, ..DnsHeader::default() },
        questions: vec![DnsQuestion { name: name.to_string(), qtype: DnsType::A, qclass: DnsClass::IN }],
        answers: vec![],
        authorities: vec![],
        additionals: vec![],
    }
    .encode()
}

