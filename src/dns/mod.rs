//! The packet bridge: wire bytes <-> [`DecodedPacket`], plus cache-key
//! derivation and the NXDOMAIN/SERVFAIL/cached-response crafting helpers
//! the resolve pipeline needs.

mod header;
mod question;
mod resource;

pub mod enums;
pub mod packet;
pub mod util;

pub use enums::{DnsClass, DnsOpcode, DnsQr, DnsResponseCode, DnsType};
pub use header::DnsHeader;
pub use packet::{
    cache_key, craft_from_cached, craft_nxdomain, craft_servfail, craft_servfail_from_bytes,
    now_ms, DecodedPacket,
};
pub use question::DnsQuestion;
pub use resource::{Answer, RData};

/// Failure to interpret wire-format bytes as a DNS message. Surfaces to the
/// resolver as `WardenError::MalformedPacket`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("malformed DNS packet: {0}")]
    Malformed(&'static str),
    #[error("unexpected end of packet")]
    Truncated,
    #[error("bitstream error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ParseError {
    fn from(err: std::io::Error) -> Self {
        ParseError::Io(err.to_string())
    }
}
