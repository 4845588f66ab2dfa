use super::ParseError;

const MAX_LABEL_LEN: usize = 63;
const MAX_POINTER_HOPS: usize = 32;

/// Encode a domain name into DNS wire-format labels, terminated by the root
/// label. No compression is emitted on write — every answer we craft or
/// relay is small enough that omitting compression costs little and keeps
/// the encoder trivially correct.
pub fn encode_name(name: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    let name = name.trim_end_matches('.');
    if !name.is_empty() {
        for label in name.split('.') {
            let label = if label.len() > MAX_LABEL_LEN {
                &label[..MAX_LABEL_LEN]
            } else {
                label
            };
            bytes.push(label.len() as u8);
            bytes.extend(label.as_bytes());
        }
    }
    bytes.push(0);
    bytes
}

/// Decode a domain name starting at `pos` in `buf`, following compression
/// pointers (RFC 1035 §4.1.4). Returns the name and the position in `buf`
/// immediately after the name *as it appears at the call site* (a pointer
/// jump does not advance the caller's cursor past the 2-byte pointer).
pub fn decode_name(buf: &[u8], pos: usize) -> Result<(String, usize), ParseError> {
    let mut labels: Vec<String> = Vec::new();
    let mut cursor = pos;
    let mut hops = 0usize;
    let mut after_first_jump: Option<usize> = None;

    loop {
        let len = *buf
            .get(cursor)
            .ok_or(ParseError::Malformed("read past end of packet"))?;

        if len == 0 {
            cursor += 1;
            break;
        }

        if len & 0xC0 == 0xC0 {
            let lo = *buf
                .get(cursor + 1)
                .ok_or(ParseError::Malformed("truncated compression pointer"))?;
            if after_first_jump.is_none() {
                after_first_jump = Some(cursor + 2);
            }
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return Err(ParseError::Malformed("too many compression pointers"));
            }
            let pointer = (((len & 0x3F) as usize) << 8) | lo as usize;
            if pointer >= buf.len() {
                return Err(ParseError::Malformed("compression pointer out of range"));
            }
            cursor = pointer;
            continue;
        }

        if len as usize > MAX_LABEL_LEN {
            return Err(ParseError::Malformed("label exceeds 63 bytes"));
        }

        let start = cursor + 1;
        let end = start + len as usize;
        if end > buf.len() {
            return Err(ParseError::Malformed("label runs past end of packet"));
        }
        labels.push(String::from_utf8_lossy(&buf[start..end]).into_owned());
        cursor = end;
    }

    let end_pos = after_first_jump.unwrap_or(cursor);
    Ok((labels.join("."), end_pos))
}

/// Normalize a domain for case/shape-insensitive comparison: lower-cased,
/// no trailing dot, no leading wildcard marker.
pub fn normalize_domain(name: &str) -> String {
    let name = name.trim_end_matches('.');
    let name = name.strip_prefix("*.").unwrap_or(name);
    name.to_lowercase()
}

/// Normalize a list *pattern* for storage: lower-cased, no trailing dot,
/// but an explicit leading `"*."` is kept so it can still be recognized as
/// a wildcard pattern on lookup. Use this instead of [`normalize_domain`]
/// anywhere a pattern is being stored rather than looked up.
pub fn normalize_pattern(pattern: &str) -> String {
    pattern.trim_end_matches('.').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_name() {
        let encoded = encode_name("example.com");
        let (decoded, end) = decode_name(&encoded, 0).unwrap();
        assert_eq!(decoded, "example.com");
        assert_eq!(end, encoded.len());
    }

    #[test]
    fn decodes_root() {
        let encoded = encode_name("");
        assert_eq!(encoded, vec![0]);
        let (decoded, _) = decode_name(&encoded, 0).unwrap();
        assert_eq!(decoded, "");
    }

    #[test]
    fn follows_compression_pointer() {
        // "a.com" at offset 0, then a second name that's a pointer back to it.
        let mut buf = encode_name("a.com");
        let pointer_offset = buf.len();
        buf.push(0xC0);
        buf.push(0x00);
        let (decoded, end) = decode_name(&buf, pointer_offset).unwrap();
        assert_eq!(decoded, "a.com");
        assert_eq!(end, pointer_offset + 2);
    }

    #[test]
    fn normalizes_domain() {
        assert_eq!(normalize_domain("Example.COM."), "example.com");
        assert_eq!(normalize_domain("*.example.com"), "example.com");
    }

    #[test]
    fn normalizes_pattern_but_keeps_wildcard_marker() {
        assert_eq!(normalize_pattern("*.Example.COM."), "*.example.com");
        assert_eq!(normalize_pattern("Example.COM."), "example.com");
    }
}
