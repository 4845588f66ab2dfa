use std::net::{Ipv4Addr, Ipv6Addr};

use super::enums::{DnsClass, DnsType};
use super::question::{read_u16, read_u32};
use super::util::{decode_name, encode_name};
use super::ParseError;

/// The payload of an [`Answer`], shaped per record type.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    CNAME(String),
    NS(String),
    PTR(String),
    MX { preference: u16, exchange: String },
    TXT(Vec<String>),
    SOA {
        mname: String,
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    CAA { flags: u8, tag: String, value: String },
    /// Unknown record type: round-tripped as opaque bytes.
    Unknown(Vec<u8>),
    /// EDNS(0) pseudo-record (RFC 6891). Carries no TTL.
    Opt {
        udp_payload_size: u16,
        extended_rcode: u8,
        version: u8,
        dnssec_ok: bool,
        options: Vec<u8>,
    },
}

/// A resource record. `ttl` is `None` only for OPT, which carries no TTL.
/// Used for answers, authorities, and additionals alike.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Answer {
    pub name: String,
    pub rtype: DnsType,
    pub rclass: DnsClass,
    pub ttl: Option<u32>,
    pub data: RData,
}

impl Answer {
    pub fn to_wire(&self) -> Vec<u8> {
        let mut bytes = encode_name(&self.name);
        bytes.extend_from_slice(&u16::from(self.rtype).to_be_bytes());

        let rdata = self.rdata_wire();

        if let RData::Opt {
            udp_payload_size,
            extended_rcode,
            version,
            dnssec_ok,
            ..
        } = &self.data
        {
            bytes.extend_from_slice(&udp_payload_size.to_be_bytes());
            let flags: u32 = ((*extended_rcode as u32) << 24)
                | ((*version as u32) << 16)
                | if *dnssec_ok { 0x8000 } else { 0 };
            bytes.extend_from_slice(&flags.to_be_bytes());
        } else {
            bytes.extend_from_slice(&u16::from(self.rclass).to_be_bytes());
            bytes.extend_from_slice(&self.ttl.unwrap_or(0).to_be_bytes());
        }

        bytes.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        bytes.extend(rdata);
        bytes
    }

    fn rdata_wire(&self) -> Vec<u8> {
        match &self.data {
            RData::A(addr) => addr.octets().to_vec(),
            RData::AAAA(addr) => addr.octets().to_vec(),
            RData::CNAME(name) | RData::NS(name) | RData::PTR(name) => encode_name(name),
            RData::MX { preference, exchange } => {
                let mut v = preference.to_be_bytes().to_vec();
                v.extend(encode_name(exchange));
                v
            }
            RData::TXT(strings) => {
                let mut v = Vec::new();
                for s in strings {
                    let bytes = s.as_bytes();
                    let len = bytes.len().min(255);
                    v.push(len as u8);
                    v.extend_from_slice(&bytes[..len]);
                }
                v
            }
            RData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                let mut v = encode_name(mname);
                v.extend(encode_name(rname));
                v.extend_from_slice(&serial.to_be_bytes());
                v.extend_from_slice(&refresh.to_be_bytes());
                v.extend_from_slice(&retry.to_be_bytes());
                v.extend_from_slice(&expire.to_be_bytes());
                v.extend_from_slice(&minimum.to_be_bytes());
                v
            }
            RData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                let mut v = priority.to_be_bytes().to_vec();
                v.extend(weight.to_be_bytes());
                v.extend(port.to_be_bytes());
                v.extend(encode_name(target));
                v
            }
            RData::CAA { flags, tag, value } => {
                let mut v = vec![*flags, tag.len() as u8];
                v.extend(tag.as_bytes());
                v.extend(value.as_bytes());
                v
            }
            RData::Unknown(bytes) => bytes.clone(),
            RData::Opt { options, .. } => options.clone(),
        }
    }

    pub fn from_wire(buf: &[u8], pos: usize) -> Result<(Self, usize), ParseError> {
        let (name, pos) = decode_name(buf, pos)?;
        let rtype = DnsType::from(read_u16(buf, pos)?);
        let mut pos = pos + 2;

        if rtype == DnsType::OPT {
            let udp_payload_size = read_u16(buf, pos)?;
            let flags = read_u32(buf, pos + 2)?;
            pos += 6;
            let rdlen = read_u16(buf, pos)? as usize;
            pos += 2;
            let options = buf
                .get(pos..pos + rdlen)
                .ok_or(ParseError::Truncated)?
                .to_vec();
            pos += rdlen;
            return Ok((
                Answer {
                    name,
                    rtype,
                    rclass: DnsClass::Other(udp_payload_size),
                    ttl: None,
                    data: RData::Opt {
                        udp_payload_size,
                        extended_rcode: (flags >> 24) as u8,
                        version: (flags >> 16) as u8,
                        dnssec_ok: flags & 0x8000 != 0,
                        options,
                    },
                },
                pos,
            ));
        }

        let rclass = DnsClass::from(read_u16(buf, pos)?);
        let ttl = read_u32(buf, pos + 2)?;
        let rdlen = read_u16(buf, pos + 6)? as usize;
        let rdata_start = pos + 8;
        let rdata_end = rdata_start + rdlen;
        if rdata_end > buf.len() {
            return Err(ParseError::Truncated);
        }

        let data = Self::parse_rdata(buf, rtype, rdata_start, rdlen)?;

        Ok((
            Answer {
                name,
                rtype,
                rclass,
                ttl: Some(ttl),
                data,
            },
            rdata_end,
        ))
    }

    fn parse_rdata(
        buf: &[u8],
        rtype: DnsType,
        start: usize,
        len: usize,
    ) -> Result<RData, ParseError> {
        let raw = buf.get(start..start + len).ok_or(ParseError::Truncated)?;
        Ok(match rtype {
            DnsType::A => {
                if raw.len() != 4 {
                    return Err(ParseError::Malformed("A record must be 4 bytes"));
                }
                RData::A(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]))
            }
            DnsType::AAAA => {
                if raw.len() != 16 {
                    return Err(ParseError::Malformed("AAAA record must be 16 bytes"));
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(raw);
                RData::AAAA(Ipv6Addr::from(octets))
            }
            DnsType::CNAME => RData::CNAME(decode_name(buf, start)?.0),
            DnsType::NS => RData::NS(decode_name(buf, start)?.0),
            DnsType::PTR => RData::PTR(decode_name(buf, start)?.0),
            DnsType::MX => {
                let preference = read_u16(buf, start)?;
                let (exchange, _) = decode_name(buf, start + 2)?;
                RData::MX { preference, exchange }
            }
            DnsType::TXT => {
                let mut strings = Vec::new();
                let mut cursor = 0;
                while cursor < raw.len() {
                    let str_len = raw[cursor] as usize;
                    cursor += 1;
                    // A truncated final TXT string is taken as-is rather
                    // than rejected.
                    let end = (cursor + str_len).min(raw.len());
                    strings.push(String::from_utf8_lossy(&raw[cursor..end]).into_owned());
                    cursor = end;
                }
                RData::TXT(strings)
            }
            DnsType::SOA => {
                let (mname, next) = decode_name(buf, start)?;
                let (rname, next) = decode_name(buf, next)?;
                RData::SOA {
                    mname,
                    rname,
                    serial: read_u32(buf, next)?,
                    refresh: read_u32(buf, next + 4)?,
                    retry: read_u32(buf, next + 8)?,
                    expire: read_u32(buf, next + 12)?,
                    minimum: read_u32(buf, next + 16)?,
                }
            }
            DnsType::SRV => {
                let priority = read_u16(buf, start)?;
                let weight = read_u16(buf, start + 2)?;
                let port = read_u16(buf, start + 4)?;
                let (target, _) = decode_name(buf, start + 6)?;
                RData::SRV {
                    priority,
                    weight,
                    port,
                    target,
                }
            }
            DnsType::CAA => {
                if raw.len() < 2 {
                    return Err(ParseError::Malformed("CAA record too short"));
                }
                let tag_len = raw[1] as usize;
                let tag = String::from_utf8_lossy(&raw[2..2 + tag_len.min(raw.len() - 2)]).into_owned();
                let value = String::from_utf8_lossy(&raw[(2 + tag_len).min(raw.len())..]).into_owned();
                RData::CAA {
                    flags: raw[0],
                    tag,
                    value,
                }
            }
            _ => RData::Unknown(raw.to_vec()),
        })
    }
}
