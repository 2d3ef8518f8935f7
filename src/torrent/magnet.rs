//! Magnet URI Parser
//!
//! Format: `magnet:?xt=urn:btih:<hash>&dn=<name>&tr=<tracker>`
//!
//! Only the parameters a derived download uses are kept: the info hash
//! (hex or base32), the display name, trackers and the exact length.

use crate::error::{EngineError, ProtocolErrorKind, Result};
use crate::types::Fingerprint;

use super::metainfo::Sha1Hash;

/// Parsed magnet URI
#[derive(Debug, Clone)]
pub struct MagnetUri {
    /// Info hash (20 bytes)
    pub info_hash: Sha1Hash,
    /// Display name (optional)
    pub display_name: Option<String>,
    /// Tracker URLs
    pub trackers: Vec<String>,
    /// Exact length (optional, rarely used)
    pub exact_length: Option<u64>,
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::protocol(ProtocolErrorKind::InvalidMagnet, message)
}

impl MagnetUri {
    /// Parse a magnet URI string
    pub fn parse(uri: &str) -> Result<Self> {
        let query = uri
            .strip_prefix("magnet:?")
            .ok_or_else(|| invalid("URI must start with 'magnet:?'"))?;

        let mut info_hash: Option<Sha1Hash> = None;
        let mut display_name = None;
        let mut trackers = Vec::new();
        let mut exact_length = None;

        for (key, value) in query.split('&').filter_map(|p| p.split_once('=')) {
            let value = url_decode(value);
            match key {
                "xt" => {
                    if let Some(hash) = parse_btih(&value) {
                        info_hash = Some(hash);
                    }
                }
                "dn" => display_name = Some(value),
                "tr" if !value.is_empty() => {
                    if !trackers.contains(&value) {
                        trackers.push(value);
                    }
                }
                "xl" => exact_length = value.parse().ok(),
                _ => {}
            }
        }

        let info_hash = info_hash
            .ok_or_else(|| invalid("Missing or invalid 'xt' parameter (info hash)"))?;

        Ok(MagnetUri {
            info_hash,
            display_name,
            trackers,
            exact_length,
        })
    }

    /// The info hash as a download fingerprint
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(self.info_hash)
    }

    /// Display name, or the hex info hash when the magnet has none
    pub fn name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| hex::encode(self.info_hash))
    }
}

/// Parse a BitTorrent info hash from an xt parameter (hex or base32)
fn parse_btih(xt: &str) -> Option<Sha1Hash> {
    let hash_str = xt.strip_prefix("urn:btih:")?;
    match hash_str.len() {
        40 => {
            let mut hash = [0u8; 20];
            hex::decode_to_slice(hash_str, &mut hash).ok()?;
            Some(hash)
        }
        32 => base32_decode(hash_str),
        _ => None,
    }
}

/// Decode a 32-character RFC 4648 base32 string into 20 bytes
fn base32_decode(input: &str) -> Option<Sha1Hash> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

    let mut bits = 0u64;
    let mut bit_count = 0u32;
    let mut output = Vec::with_capacity(20);

    for c in input.bytes().map(|c| c.to_ascii_uppercase()) {
        let val = ALPHABET.iter().position(|&x| x == c)? as u64;
        bits = (bits << 5) | val;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            output.push((bits >> bit_count) as u8);
            bits &= (1 << bit_count) - 1;
        }
    }

    output.try_into().ok()
}

/// Percent-decode a query value (`+` is a space)
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let decoded = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match decoded {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}
