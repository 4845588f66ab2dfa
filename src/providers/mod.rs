//! Abstract DoH upstream with one method, `resolve(query) -> response`.
//! Concrete providers differ only by endpoint URL, following a shared
//! `reqwest`-based upstream client convention.

pub mod tracker;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{Result, WardenError};

pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);
const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

/// Single-method contract every upstream satisfies.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn resolve(&self, query: &[u8]) -> Result<Vec<u8>>;
}

/// Shared POST-body DoH call: `Content-Type`/`Accept:
/// application/dns-message`, body = raw query.
async fn post_doh(client: &Client, endpoint: &str, provider: &str, query: &[u8]) -> Result<Vec<u8>> {
    let response = client
        .post(endpoint)
        .header(reqwest::header::CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
        .header(reqwest::header::ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
        .body(query.to_vec())
        .timeout(UPSTREAM_TIMEOUT)
        .send()
        .await
        .map_err(|err| WardenError::Upstream {
            provider: provider.to_string(),
            reason: err.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(WardenError::Upstream {
            provider: provider.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|err| WardenError::Upstream {
            provider: provider.to_string(),
            reason: err.to_string(),
        })
}

/// `https://{configId}.dns.nextdns.io/dns-query`, or the bare
/// `https://dns.nextdns.io/dns-query` endpoint when no config id is set.
pub struct NextDnsProvider {
    client: Client,
    config_id: Option<String>,
    endpoint: String,
}

impl NextDnsProvider {
    pub fn new(client: Client, config_id: Option<String>) -> Self {
        let endpoint = match &config_id {
            Some(id) if !id.is_empty() => format!("https://{id}.dns.nextdns.io/dns-query"),
            _ => "https://dns.nextdns.io/dns-query".to_string(),
        };
        Self { client, config_id, endpoint }
    }

    pub fn config_id(&self) -> Option<&str> {
        self.config_id.as_deref()
    }
}

#[async_trait]
impl Provider for NextDnsProvider {
    fn name(&self) -> &str {
        "nextdns"
    }

    async fn resolve(&self, query: &[u8]) -> Result<Vec<u8>> {
        post_doh(&self.client, &self.endpoint, self.name(), query).await
    }
}

macro_rules! simple_doh_provider {
    ($struct_name:ident, $name:literal, $endpoint:literal) => {
        pub struct $struct_name {
            client: Client,
        }

        impl $struct_name {
            pub fn new(client: Client) -> Self {
                Self { client }
            }
        }

        #[async_trait]
        impl Provider for $struct_name {
            fn name(&self) -> &str {
                $name
            }

            async fn resolve(&self, query: &[u8]) -> Result<Vec<u8>> {
                post_doh(&self.client, $endpoint, self.name(), query).await
            }
        }
    };
}

simple_doh_provider!(CloudflareProvider, "cloudflare", "https://cloudflare-dns.com/dns-query");
simple_doh_provider!(GoogleProvider, "google", "https://dns.google/dns-query");
simple_doh_provider!(OpenDnsProvider, "opendns", "https://doh.opendns.com/dns-query");

/// Resorts to the host's configured recursive resolver over plain UDP on
/// port 53, bypassing DoH entirely.
pub struct SystemProvider {
    resolver_addr: std::net::SocketAddr,
}

impl SystemProvider {
    pub fn new(resolver_addr: std::net::SocketAddr) -> Self {
        Self { resolver_addr }
    }
}

#[async_trait]
impl Provider for SystemProvider {
    fn name(&self) -> &str {
        "system"
    }

    async fn resolve(&self, query: &[u8]) -> Result<Vec<u8>> {
        let socket = tokio::net::UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|err| WardenError::Upstream {
                provider: self.name().to_string(),
                reason: err.to_string(),
            })?;
        socket
            .connect(self.resolver_addr)
            .await
            .map_err(|err| WardenError::Upstream {
                provider: self.name().to_string(),
                reason: err.to_string(),
            })?;

        tokio::time::timeout(UPSTREAM_TIMEOUT, async {
            socket.send(query).await?;
            let mut buf = vec![0u8; 4096];
            let n = socket.recv(&mut buf).await?;
            buf.truncate(n);
            Ok::<_, std::io::Error>(buf)
        })
        .await
        .map_err(|_| WardenError::Upstream {
            provider: self.name().to_string(),
            reason: "timed out".to_string(),
        })?
        .map_err(|err| WardenError::Upstream {
            provider: self.name().to_string(),
            reason: err.to_string(),
        })
    }
}

/// Provider ordering policy. The base implementation is the list as
/// configured; an optional
/// [`tracker::ProviderOrdering`] reorders by call-volume/failure-rate.
pub trait OrderProviders: Send + Sync {
    fn order<'a>(&self, providers: &'a [std::sync::Arc<dyn Provider>]) -> Vec<std::sync::Arc<dyn Provider>>;
}

/// Reference ordering: the list exactly as configured.
pub struct AsConfiguredOrdering;

impl OrderProviders for AsConfiguredOrdering {
    fn order<'a>(&self, providers: &'a [std::sync::Arc<dyn Provider>]) -> Vec<std::sync::Arc<dyn Provider>> {
        providers.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider {
        name: &'static str,
        should_fail: bool,
        answer: Vec<u8>,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn resolve(&self, _query: &[u8]) -> Result<Vec<u8>> {
            if self.should_fail {
                Err(WardenError::Upstream {
                    provider: self.name.to_string(),
                    reason: "stub failure".to_string(),
                })
            } else {
                Ok(self.answer.clone())
            }
        }
    }

    #[tokio::test]
    async fn stub_provider_fails_as_configured() {
        let stub = StubProvider { name: "p1", should_fail: true, answer: vec![] };
        assert!(stub.resolve(&[]).await.is_err());
    }

    #[test]
    fn nextdns_endpoint_uses_config_id() {
        let client = Client::new();
        let provider = NextDnsProvider::new(client, Some("abc123".to_string()));
        assert_eq!(provider.endpoint, "https://abc123.dns.nextdns.io/dns-query");
    }

    #[test]
    fn nextdns_endpoint_bare_without_config_id() {
        let client = Client::new();
        let provider = NextDnsProvider::new(client, None);
        assert_eq!(provider.endpoint, "https://dns.nextdns.io/dns-query");
    }
}
