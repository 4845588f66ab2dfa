use serde::{Deserialize, Serialize};

/// DNS opcode (RFC 1035 §4.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsOpcode {
    Query,
    IQuery,
    Status,
    Other(u8),
}

impl From<u8> for DnsOpcode {
    fn from(value: u8) -> Self {
        match value {
            0 => DnsOpcode::Query,
            1 => DnsOpcode::IQuery,
            2 => DnsOpcode::Status,
            other => DnsOpcode::Other(other),
        }
    }
}

impl From<DnsOpcode> for u8 {
    fn from(val: DnsOpcode) -> Self {
        match val {
            DnsOpcode::Query => 0,
            DnsOpcode::IQuery => 1,
            DnsOpcode::Status => 2,
            DnsOpcode::Other(v) => v,
        }
    }
}

/// Response codes. Only NoError/FormatError/ServerFailure/NameError/Refused
/// are produced by this proxy; others round-trip as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsResponseCode {
    NoError,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
    Other(u8),
}

impl From<u8> for DnsResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0 => DnsResponseCode::NoError,
            1 => DnsResponseCode::FormatError,
            2 => DnsResponseCode::ServerFailure,
            3 => DnsResponseCode::NameError,
            4 => DnsResponseCode::NotImplemented,
            5 => DnsResponseCode::Refused,
            other => DnsResponseCode::Other(other),
        }
    }
}

impl From<DnsResponseCode> for u8 {
    fn from(val: DnsResponseCode) -> Self {
        match val {
            DnsResponseCode::NoError => 0,
            DnsResponseCode::FormatError => 1,
            DnsResponseCode::ServerFailure => 2,
            DnsResponseCode::NameError => 3,
            DnsResponseCode::NotImplemented => 4,
            DnsResponseCode::Refused => 5,
            DnsResponseCode::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsQr {
    Query,
    Response,
}

impl From<bool> for DnsQr {
    fn from(value: bool) -> Self {
        if value { DnsQr::Response } else { DnsQr::Query }
    }
}

impl From<DnsQr> for bool {
    fn from(val: DnsQr) -> Self {
        matches!(val, DnsQr::Response)
    }
}

/// Record type, covering the common DNS record types; unknown values
/// round-trip as `Other` and their rdata is carried as opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DnsType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    CAA,
    OPT,
    ANY,
    Other(u16),
}

impl From<u16> for DnsType {
    fn from(value: u16) -> Self {
        match value {
            1 => DnsType::A,
            2 => DnsType::NS,
            5 => DnsType::CNAME,
            6 => DnsType::SOA,
            12 => DnsType::PTR,
            15 => DnsType::MX,
            16 => DnsType::TXT,
            28 => DnsType::AAAA,
            33 => DnsType::SRV,
            41 => DnsType::OPT,
            257 => DnsType::CAA,
            255 => DnsType::ANY,
            other => DnsType::Other(other),
        }
    }
}

impl From<DnsType> for u16 {
    fn from(val: DnsType) -> Self {
        match val {
            DnsType::A => 1,
            DnsType::NS => 2,
            DnsType::CNAME => 5,
            DnsType::SOA => 6,
            DnsType::PTR => 12,
            DnsType::MX => 15,
            DnsType::TXT => 16,
            DnsType::AAAA => 28,
            DnsType::SRV => 33,
            DnsType::OPT => 41,
            DnsType::CAA => 257,
            DnsType::ANY => 255,
            DnsType::Other(v) => v,
        }
    }
}

impl std::fmt::Display for DnsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsType::Other(v) => write!(f, "TYPE{v}"),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DnsClass {
    IN,
    CH,
    HS,
    ANY,
    Other(u16),
}

impl Default for DnsClass {
    fn default() -> Self {
        DnsClass::IN
    }
}

impl From<u16> for DnsClass {
    fn from(value: u16) -> Self {
        match value {
            1 => DnsClass::IN,
            3 => DnsClass::CH,
            4 => DnsClass::HS,
            255 => DnsClass::ANY,
            other => DnsClass::Other(other),
        }
    }
}

impl From<DnsClass> for u16 {
    fn from(val: DnsClass) -> Self {
        match val {
            DnsClass::IN => 1,
            DnsClass::CH => 3,
            DnsClass::HS => 4,
            DnsClass::ANY => 255,
            DnsClass::Other(v) => v,
        }
    }
}

impl std::fmt::Display for DnsClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsClass::Other(v) => write!(f, "CLASS{v}"),
            other => write!(f, "{:?}", other),
        }
    }
}
