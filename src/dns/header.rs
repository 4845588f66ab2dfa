use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};
use std::io::Cursor;

use super::enums::{DnsOpcode, DnsQr, DnsResponseCode};
use super::ParseError;

/// The fixed 12-byte DNS header (RFC 1035 §4.1.1).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DnsHeader {
    pub id: u16,
    pub qr: DnsQr,
    pub opcode: DnsOpcode,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: DnsResponseCode,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Default for DnsHeader {
    fn default() -> Self {
        DnsHeader {
            id: 0,
            qr: DnsQr::Query,
            opcode: DnsOpcode::Query,
            aa: false,
            tc: false,
            rd: true,
            ra: false,
            z: 0,
            rcode: DnsResponseCode::NoError,
            qdcount: 0,
            ancount: 0,
            nscount: 0,
            arcount: 0,
        }
    }
}

impl DnsHeader {
    pub fn write(&self, writer: &mut BitWriter<&mut Vec<u8>, BigEndian>) -> Result<(), ParseError> {
        writer.write_var::<u16>(16, self.id)?;
        writer.write_var::<u8>(1, bool::from(self.qr) as u8)?;
        writer.write_var::<u8>(4, u8::from(self.opcode))?;
        writer.write_var::<u8>(1, self.aa as u8)?;
        writer.write_var::<u8>(1, self.tc as u8)?;
        writer.write_var::<u8>(1, self.rd as u8)?;
        writer.write_var::<u8>(1, self.ra as u8)?;
        writer.write_var::<u8>(3, self.z)?;
        writer.write_var::<u8>(4, u8::from(self.rcode))?;
        writer.write_var::<u16>(16, self.qdcount)?;
        writer.write_var::<u16>(16, self.ancount)?;
        writer.write_var::<u16>(16, self.nscount)?;
        writer.write_var::<u16>(16, self.arcount)?;
        Ok(())
    }

    pub fn read(reader: &mut BitReader<Cursor<&[u8]>, BigEndian>) -> Result<Self, ParseError> {
        let id = reader.read_var::<u16>(16)?;
        let qr = DnsQr::from(reader.read_var::<u8>(1)? == 1);
        let opcode = DnsOpcode::from(reader.read_var::<u8>(4)?);
        let aa = reader.read_var::<u8>(1)? == 1;
        let tc = reader.read_var::<u8>(1)? == 1;
        let rd = reader.read_var::<u8>(1)? == 1;
        let ra = reader.read_var::<u8>(1)? == 1;
        let z = reader.read_var::<u8>(3)?;
        let rcode = DnsResponseCode::from(reader.read_var::<u8>(4)?);
        let qdcount = reader.read_var::<u16>(16)?;
        let ancount = reader.read_var::<u16>(16)?;
        let nscount = reader.read_var::<u16>(16)?;
        let arcount = reader.read_var::<u16>(16)?;
        Ok(DnsHeader {
            id,
            qr,
            opcode,
            aa,
            tc,
            rd,
            ra,
            z,
            rcode,
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}
