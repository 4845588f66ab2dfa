//! UDP listener. Every inbound datagram yields exactly one outbound
//! datagram to its source — decode and resolver errors both craft a
//! SERVFAIL rather than drop the packet.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::bus::{BusMessage, EventBus};
use crate::drivers::logs::{LogEntry, LogLevel, ServerEventType, Transport};
use crate::resolver::{ClientContext, Resolver};

const MAX_DATAGRAM: usize = 4096;

pub struct UdpListener {
    socket: Arc<UdpSocket>,
    port: u16,
    resolver: Arc<Resolver>,
    bus: Arc<EventBus>,
}

impl UdpListener {
    pub async fn bind(port: u16, resolver: Arc<Resolver>, bus: Arc<EventBus>) -> std::io::Result<Self> {
        let addr: SocketAddr = format!("0.0.0.0:{port}").parse().expect("valid bind address");
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket: Arc::new(socket), port, resolver, bus })
    }

    /// Runs the accept loop until `shutdown` fires. Emits `started` on
    /// entry and `stopped`/`crashed` on exit.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<()>) {
        self.emit_server_event(ServerEventType::Started, "UDP listener started", None);
        info!(port = self.port, "udp listener started");

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    self.emit_server_event(ServerEventType::Stopped, "UDP listener stopped", None);
                    info!(port = self.port, "udp listener stopped");
                    return;
                }
                recv = self.socket.recv_from(&mut buf) => {
                    match recv {
                        Ok((len, from)) => {
                            let datagram = buf[..len].to_vec();
                            let resolver = Arc::clone(&self.resolver);
                            let socket = Arc::clone(&self.socket);
                            tokio::spawn(async move {
                                Self::handle_datagram(resolver, socket, datagram, from).await;
                            });
                        }
                        Err(err) => {
                            error!(%err, "udp recv_from failed");
                            self.emit_server_event(
                                ServerEventType::Crashed,
                                &format!("udp recv_from failed: {err}"),
                                None,
                            );
                        }
                    }
                }
            }
        }
    }

    async fn handle_datagram(
        resolver: Arc<Resolver>,
        socket: Arc<UdpSocket>,
        datagram: Vec<u8>,
        from: SocketAddr,
    ) {
        let client = ClientContext {
            address: from.ip().to_string(),
            port: from.port(),
            transport: Transport::Udp,
        };
        let outcome = resolver.resolve(&datagram, client).await;
        if let Err(err) = socket.send_to(&outcome.response_bytes, from).await {
            warn!(%err, %from, "failed to send udp response");
        }
    }

    fn emit_server_event(&self, event_type: ServerEventType, message: &str, config_changes: Option<serde_json::Value>) {
        let entry = LogEntry::ServerEvent {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            level: LogLevel::Info,
            event_type,
            port: self.port,
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
