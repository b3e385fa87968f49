//! Text encoding detection and transcoding for descriptor payloads.
//!
//! Legacy formats store descriptor text as UTF-16LE, 8.3.8 stores UTF-8.
//! Payloads may or may not carry a byte-order mark, so decoding goes through
//! `detect` first and falls back to the per-version default.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf16Le,
}

/// Returns the detected encoding and the length of the BOM to skip.
/// Without a BOM, `fallback` wins.
pub fn detect(bytes: &[u8], fallback: Encoding) -> (Encoding, usize) {
    if bytes.starts_with(&[0xef, 0xbb, 0xbf]) {
        (Encoding::Utf8, 3)
    } else if bytes.starts_with(&[0xff, 0xfe]) {
        (Encoding::Utf16Le, 2)
    } else {
        (fallback, 0)
    }
}

/// Decodes `bytes[offset..]` as `encoding` into a `String`.
pub fn to_utf8(bytes: &[u8], offset: usize, encoding: Encoding) -> Result<String> {
    let body = &bytes[offset.min(bytes.len())..];
    match encoding {
        Encoding::Utf8 => String::from_utf8(body.to_vec())
            .map_err(|e| Error::corrupt_record("invalid utf-8 text").with("cause", e)),
        Encoding::Utf16Le => {
            if body.len() % 2 != 0 {
                return Err(Error::corrupt_record("utf-16 payload has odd length")
                    .with("length", body.len()));
            }
            let units: Vec<u16> = body
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16(&units)
                .map_err(|e| Error::corrupt_record("invalid utf-16 text").with("cause", e))
        }
    }
}

/// Convenience wrapper: detect, then decode.
pub fn decode(bytes: &[u8], fallback: Encoding) -> Result<String> {
    let (encoding, bom_len) = detect(bytes, fallback);
    to_utf8(bytes, bom_len, encoding)
}

pub fn encode(text: &str, encoding: Encoding) -> Vec<u8> {
    match encoding {
        Encoding::Utf8 => text.as_bytes().to_vec(),
        Encoding::Utf16Le => text
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect(),
    }
}
