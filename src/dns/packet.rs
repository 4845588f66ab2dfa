use bitstream_io::{BigEndian, BitReader, BitWriter};
use std::io::Cursor;
use std::time::{SystemTime, UNIX_EPOCH};

use super::enums::{DnsClass, DnsOpcode, DnsQr, DnsResponseCode, DnsType};
use super::header::DnsHeader;
use super::question::DnsQuestion;
use super::resource::{Answer, RData};
use super::ParseError;

const HEADER_LEN: usize = 12;
const MIN_TTL_FLOOR_SECS: u32 = 300;

/// `{id, flags, type, rcode, questions, answers, authorities, additionals}`.
/// The one in-memory representation every wire frame is decoded into, and
/// every crafted response is built from.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DecodedPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<Answer>,
    pub authorities: Vec<Answer>,
    pub additionals: Vec<Answer>,
}

impl DecodedPacket {
    /// Decode wire-format bytes. Fails with `ParseError::Malformed` (mapped
    /// to `WardenError::MalformedPacket` by callers) when bytes are not a
    /// valid DNS message, including the zero-question case.
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < HEADER_LEN {
            return Err(ParseError::Truncated);
        }

        let mut reader: BitReader<Cursor<&[u8]>, BigEndian> = BitReader::new(Cursor::new(bytes));
        let header = DnsHeader::read(&mut reader)?;
        // The header is exactly 12 bytes (96 bits); everything after it is
        // parsed from the raw buffer so compression pointers can jump back
        // into the question/answer sections freely.

        if header.qdcount == 0 {
            return Err(ParseError::Malformed("packet has zero questions"));
        }

        let mut pos = HEADER_LEN;
        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            let (question, next) = DnsQuestion::from_wire(bytes, pos)?;
            questions.push(question);
            pos = next;
        }

        let mut answers = Vec::with_capacity(header.ancount as usize);
        for _ in 0..header.ancount {
            let (answer, next) = Answer::from_wire(bytes, pos)?;
            answers.push(answer);
            pos = next;
        }

        let mut authorities = Vec::with_capacity(header.nscount as usize);
        for _ in 0..header.nscount {
            let (rr, next) = Answer::from_wire(bytes, pos)?;
            authorities.push(rr);
            pos = next;
        }

        let mut additionals = Vec::with_capacity(header.arcount as usize);
        for _ in 0..header.arcount {
            let (rr, next) = Answer::from_wire(bytes, pos)?;
            additionals.push(rr);
            pos = next;
        }

        Ok(DecodedPacket {
            header,
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    /// Encode to wire-format bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authorities.len() as u16;
        header.arcount = self.additionals.len() as u16;

        let mut out = Vec::new();
        {
            let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut out);
            // Header write cannot fail on an in-memory Vec<u8> sink.
            header.write(&mut writer).expect("header write is infallible");
        }
        for q in &self.questions {
            out.extend(q.to_wire());
        }
        for a in &self.answers {
            out.extend(a.to_wire());
        }
        for a in &self.authorities {
            out.extend(a.to_wire());
        }
        for a in &self.additionals {
            out.extend(a.to_wire());
        }
        out
    }

    /// Returns the first question, if any.
    pub fn extract_question(&self) -> Option<&DnsQuestion> {
        self.questions.first()
    }

    /// A/AAAA answer addresses as strings.
    pub fn extract_ips(&self) -> Vec<String> {
        self.answers
            .iter()
            .filter_map(|a| match &a.data {
                RData::A(addr) => Some(addr.to_string()),
                RData::AAAA(addr) => Some(addr.to_string()),
                _ => None,
            })
            .collect()
    }

    /// The minimum TTL across all non-OPT records in the packet, floored
    /// at 300s when no records exist.
    pub fn min_ttl_secs(&self) -> u32 {
        self.answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.additionals.iter())
            .filter_map(|rr| rr.ttl)
            .min()
            .unwrap_or(MIN_TTL_FLOOR_SECS)
    }
}

/// `lower(name) + ':' + type + ':' + class`.
pub fn cache_key(question: &DnsQuestion) -> String {
    format!(
        "{}:{}:{}",
        super::util::normalize_domain(&question.name),
        question.qtype,
        question.qclass
    )
}

fn base_response_header(original: &DecodedPacket, rcode: DnsResponseCode) -> DnsHeader {
    DnsHeader {
        id: original.header.id,
        qr: DnsQr::Response,
        opcode: DnsOpcode::Query,
        aa: false,
        tc: false,
        rd: original.header.rd,
        ra: true,
        z: 0,
        rcode,
        qdcount: original.header.qdcount,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    }
}

/// Craft an NXDOMAIN response preserving the original `id` and `questions`.
pub fn craft_nxdomain(original: &DecodedPacket) -> Vec<u8> {
    DecodedPacket {
        header: base_response_header(original, DnsResponseCode::NameError),
        questions: original.questions.clone(),
        answers: Vec::new(),
        authorities: Vec::new(),
        additionals: Vec::new(),
    }
    .encode()
}

/// Craft a SERVFAIL response preserving the original `id` and `questions`.
pub fn craft_servfail(original: &DecodedPacket) -> Vec<u8> {
    DecodedPacket {
        header: base_response_header(original, DnsResponseCode::ServerFailure),
        questions: original.questions.clone(),
        answers: Vec::new(),
        authorities: Vec::new(),
        additionals: Vec::new(),
    }
    .encode()
}

/// Same as [`craft_nxdomain`] but built straight from raw query bytes, for
/// the case where the query itself failed to decode (so there is no
/// `DecodedPacket` to build on). Falls back to a synthetic id/question-less
/// header when even the id cannot be recovered.
pub fn craft_servfail_from_bytes(query_bytes: &[u8]) -> Vec<u8> {
    let id = if query_bytes.len() >= 2 {
        u16::from_be_bytes([query_bytes[0], query_bytes[1]])
    } else {
        0
    };
    DecodedPacket {
        header: DnsHeader {
            id,
            qr: DnsQr::Response,
            opcode: DnsOpcode::Query,
            aa: false,
            tc: false,
            rd: false,
            ra: true,
            z: 0,
            rcode: DnsResponseCode::ServerFailure,
            qdcount: 0,
            ancount: 0,
            nscount: 0,
            arcount: 0,
        },
        questions: Vec::new(),
        answers: Vec::new(),
        authorities: Vec::new(),
        additionals: Vec::new(),
    }
    .encode()
}

/// Copy a cached packet's answers/authorities/additionals onto the
/// original query, replacing each record's TTL with the remaining TTL,
/// preserving flags from the cached packet.
pub fn craft_from_cached(
    original: &DecodedPacket,
    cached_packet: &DecodedPacket,
    expires_at_ms: i64,
) -> Vec<u8> {
    let now_ms = now_ms();
    let remaining_secs = ((expires_at_ms - now_ms).max(0) / 1000) as u32;

    let rewrite_ttl = |rr: &Answer| -> Answer {
        let mut rr = rr.clone();
        if rr.ttl.is_some() {
            rr.ttl = Some(remaining_secs);
        }
        rr
    };

    let mut header = cached_packet.header.clone();
    header.id = original.header.id;
    header.qdcount = original.questions.len() as u16;

    DecodedPacket {
        header,
        questions: original.questions.clone(),
        answers: cached_packet.answers.iter().map(rewrite_ttl).collect(),
        authorities: cached_packet.authorities.iter().map(rewrite_ttl).collect(),
        additionals: cached_packet.additionals.iter().map(rewrite_ttl).collect(),
    }
    .encode()
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_query(name: &str) -> DecodedPacket {
        DecodedPacket {
            header: DnsHeader {
                id: 0x1234,
                qr: DnsQr::Query,
                rd: true,
                qdcount: 1,
                ..DnsHeader::default()
            },
            questions: vec![DnsQuestion {
                name: name.to_string(),
                qtype: DnsType::A,
                qclass: DnsClass::IN,
            }],
            answers: vec![],
            authorities: vec![],
            additionals: vec![],
        }
    }

    #[test]
    fn round_trips_a_query() {
        let packet = simple_query("example.com");
        let bytes = packet.encode();
        let decoded = DecodedPacket::decode(&bytes).unwrap();
        assert_eq!(decoded.header.id, 0x1234);
        assert_eq!(decoded.questions[0].name, "example.com");
        assert_eq!(decoded.questions[0].qtype, DnsType::A);
    }

    #[test]
    fn zero_questions_is_malformed() {
        let mut packet = simple_query("example.com");
        packet.questions.clear();
        packet.header.qdcount = 0;
        let bytes = packet.encode();
        assert!(DecodedPacket::decode(&bytes).is_err());
    }

    #[test]
    fn cache_key_is_case_insensitive() {
        let q1 = DnsQuestion {
            name: "Example.COM".to_string(),
            qtype: DnsType::A,
            qclass: DnsClass::IN,
        };
        let q2 = DnsQuestion {
            name: "example.com".to_string(),
            qtype: DnsType::A,
            qclass: DnsClass::IN,
        };
        assert_eq!(cache_key(&q1), cache_key(&q2));
        assert_eq!(cache_key(&q1), "example.com:A:IN");
    }

    #[test]
    fn nxdomain_preserves_id_and_question() {
        let packet = simple_query("blocked.example");
        let bytes = craft_nxdomain(&packet);
        let decoded = DecodedPacket::decode(&bytes).unwrap();
        assert_eq!(decoded.header.id, packet.header.id);
        assert_eq!(decoded.header.rcode, DnsResponseCode::NameError);
        assert!(decoded.answers.is_empty());
    }

    #[test]
    fn min_ttl_floors_at_300_with_no_records() {
        let packet = simple_query("no-answers.example");
        assert_eq!(packet.min_ttl_secs(), MIN_TTL_FLOOR_SECS);
    }
}
