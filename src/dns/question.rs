use super::enums::{DnsClass, DnsType};
use super::util::{decode_name, encode_name};
use super::ParseError;

/// `{name, type, class}`. `class` defaults to `IN`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: DnsType,
    pub qclass: DnsClass,
}

impl DnsQuestion {
    pub fn to_wire(&self) -> Vec<u8> {
        let mut bytes = encode_name(&self.name);
        bytes.extend_from_slice(&u16::from(self.qtype).to_be_bytes());
        bytes.extend_from_slice(&u16::from(self.qclass).to_be_bytes());
        bytes
    }

    pub fn from_wire(buf: &[u8], pos: usize) -> Result<(Self, usize), ParseError> {
        let (name, pos) = decode_name(buf, pos)?;
        let qtype = read_u16(buf, pos)?;
        let qclass = read_u16(buf, pos + 2)?;
        Ok((
            DnsQuestion {
                name,
                qtype: DnsType::from(qtype),
                qclass: DnsClass::from(qclass),
            },
            pos + 4,
        ))
    }
}

pub(super) fn read_u16(buf: &[u8], pos: usize) -> Result<u16, ParseError> {
    let bytes = buf
        .get(pos..pos + 2)
        .ok_or(ParseError::Truncated)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(super) fn read_u32(buf: &[u8], pos: usize) -> Result<u32, ParseError> {
    let bytes = buf
        .get(pos..pos + 4)
        .ok_or(ParseError::Truncated)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
