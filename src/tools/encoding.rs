//! URI component encoding helpers.
//!
//! Mirrors the behavior of the browser `encodeURIComponent`/`decodeURIComponent`
//! pair, which is what the server expects for path segments, query values
//! and cookie values.

/// Percent-encodes every byte except the unreserved `encodeURIComponent` set.
pub fn encode_uri_component(input: &str) -> String {
    let mut result = String::with_capacity(input.len());

    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => result.push(byte as char),
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }

    result
}

/// Decodes `%XX` sequences back into bytes.
///
/// Malformed escapes are kept verbatim and invalid UTF-8 sequences are
/// replaced instead of failing.
pub fn decode_uri_component(input: &str) -> String {
    if !input.contains('%') {
        return input.to_string();
    }

    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Some(byte) = hex_pair(bytes[i + 1], bytes[i + 2]) {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}
