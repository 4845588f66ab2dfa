//! Listeners: plain UDP, RFC 8484 DoH, and the control/SSE HTTP API.

pub mod doh;
pub mod http;
pub mod udp;

pub use udp::UdpListener;
