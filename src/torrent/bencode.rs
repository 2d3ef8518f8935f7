//! Bencode Decoder
//!
//! Decodes bencoded metadata and can report the raw byte span of a
//! top-level dictionary value. The span is what the info hash is computed
//! over, so it must be taken from the input, never re-encoded.
//!
//! Bencode format:
//! - Integers:   `i<number>e`        Example: `i42e`
//! - Strings:    `<length>:<data>`   Example: `4:spam`
//! - Lists:      `l<items>e`         Example: `l4:spami42ee`
//! - Dicts:      `d<pairs>e`         Example: `d3:cow3:moo4:spam4:eggse`

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EngineError, ProtocolErrorKind, Result};

/// Maximum allowed length for a bencode string (100 MiB)
const MAX_STRING_LENGTH: usize = 100 * 1024 * 1024;

/// Maximum nesting depth of lists and dictionaries
const MAX_DEPTH: usize = 64;

/// A bencode value
#[derive(Clone, PartialEq, Eq)]
pub enum BencodeValue {
    /// Integer value (can be negative)
    Integer(i64),
    /// Byte string (not necessarily valid UTF-8)
    Bytes(Vec<u8>),
    /// List of values
    List(Vec<BencodeValue>),
    /// Dictionary with byte string keys (sorted by key)
    Dict(BTreeMap<Vec<u8>, BencodeValue>),
}

impl fmt::Debug for BencodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "Integer({})", n),
            Self::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) if s.len() <= 50 => write!(f, "Bytes({:?})", s),
                _ => write!(f, "Bytes([{} bytes])", b.len()),
            },
            Self::List(l) => f.debug_tuple("List").field(l).finish(),
            Self::Dict(d) => {
                let mut map = f.debug_map();
                for (k, v) in d {
                    map.entry(&String::from_utf8_lossy(k), v);
                }
                map.finish()
            }
        }
    }
}

fn parse_error(message: impl Into<String>) -> EngineError {
    EngineError::protocol(ProtocolErrorKind::BencodeParse, message)
}

/// Cursor over bencoded input
struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| parse_error("Unexpected end of input"))
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.peek()? != byte {
            return Err(parse_error(format!(
                "Expected {:?} at offset {}",
                byte as char, self.pos
            )));
        }
        self.pos += 1;
        Ok(())
    }

    fn value(&mut self, depth: usize) -> Result<BencodeValue> {
        if depth > MAX_DEPTH {
            return Err(parse_error("Nesting too deep"));
        }
        match self.peek()? {
            b'i' => self.integer().map(BencodeValue::Integer),
            b'0'..=b'9' => self.bytes().map(|b| BencodeValue::Bytes(b.to_vec())),
            b'l' => {
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(BencodeValue::List(items))
            }
            b'd' => {
                let mut items = BTreeMap::new();
                self.dict_entries(|dec, key| {
                    let value = dec.value(depth + 1)?;
                    items.insert(key.to_vec(), value);
                    Ok(())
                })?;
                Ok(BencodeValue::Dict(items))
            }
            c => Err(parse_error(format!(
                "Invalid bencode type marker: {:?}",
                c as char
            ))),
        }
    }

    /// Walk a dictionary, handing each key to `on_entry`, which must
    /// consume the value that follows it.
    fn dict_entries<F>(&mut self, mut on_entry: F) -> Result<()>
    where
        F: FnMut(&mut Self, &'a [u8]) -> Result<()>,
    {
        self.expect(b'd')?;
        let mut last_key: Option<&[u8]> = None;
        while self.peek()? != b'e' {
            let key = self.bytes()?;
            if let Some(prev) = last_key {
                if key <= prev {
                    return Err(parse_error("Dict keys not in sorted order"));
                }
            }
            last_key = Some(key);
            on_entry(self, key)?;
        }
        self.pos += 1;
        Ok(())
    }

    fn integer(&mut self) -> Result<i64> {
        self.expect(b'i')?;
        let data: &'a [u8] = self.data;
        let rest = &data[self.pos..];
        let end = rest
            .iter()
            .position(|&c| c == b'e')
            .ok_or_else(|| parse_error("Unterminated integer"))?;
        let digits = std::str::from_utf8(&rest[..end])
            .map_err(|_| parse_error("Invalid integer encoding"))?;

        let unsigned = digits.strip_prefix('-').unwrap_or(digits);
        if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
            return Err(parse_error(format!("Invalid integer: {:?}", digits)));
        }
        if unsigned.len() > 1 && unsigned.starts_with('0') {
            return Err(parse_error("Invalid integer: leading zero"));
        }
        if digits == "-0" {
            return Err(parse_error("Invalid integer: negative zero"));
        }

        let value = digits
            .parse::<i64>()
            .map_err(|_| parse_error("Integer out of range"))?;
        self.pos += end + 1;
        Ok(value)
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let data: &'a [u8] = self.data;
        let rest = &data[self.pos..];
        let colon = rest
            .iter()
            .position(|&c| c == b':')
            .ok_or_else(|| parse_error("Expected colon in string"))?;
        let len = std::str::from_utf8(&rest[..colon])
            .ok()
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| parse_error("Invalid string length"))?;

        if len > MAX_STRING_LENGTH {
            return Err(parse_error(format!(
                "String length {} exceeds maximum allowed {} bytes",
                len, MAX_STRING_LENGTH
            )));
        }

        let start = colon + 1;
        let available = rest.len() - start;
        if len > available {
            return Err(parse_error(format!(
                "String length {} exceeds available data {}",
                len, available
            )));
        }

        self.pos += start + len;
        Ok(&rest[start..start + len])
    }
}

impl BencodeValue {
    /// Parse a complete bencode value (no trailing data allowed)
    pub fn parse_exact(data: &[u8]) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        let value = decoder.value(0)?;
        if decoder.pos != data.len() {
            return Err(parse_error(format!(
                "Trailing data: {} bytes",
                data.len() - decoder.pos
            )));
        }
        Ok(value)
    }

    /// Encode to bencode bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf);
        buf
    }

    /// Encode to an existing buffer
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Integer(n) => {
                buf.push(b'i');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.push(b'e');
            }
            Self::Bytes(b) => encode_bytes(b, buf),
            Self::List(l) => {
                buf.push(b'l');
                for item in l {
                    item.encode_to(buf);
                }
                buf.push(b'e');
            }
            Self::Dict(d) => {
                buf.push(b'd');
                for (k, v) in d {
                    encode_bytes(k, buf);
                    v.encode_to(buf);
                }
                buf.push(b'e');
            }
        }
    }

    /// Get as string (UTF-8)
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Get as integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as unsigned integer
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Integer(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get as list
    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Get as dict
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, BencodeValue>> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Get dict value by key
    pub fn get(&self, key: &str) -> Option<&BencodeValue> {
        self.as_dict().and_then(|d| d.get(key.as_bytes()))
    }
}

fn encode_bytes(b: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(b.len().to_string().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(b);
}

/// Raw bytes of the value stored under `key` in the top-level dictionary.
///
/// Returns `Ok(None)` when the root is a dictionary without `key`.
pub fn top_level_value_span<'a>(data: &'a [u8], key: &str) -> Result<Option<&'a [u8]>> {
    let mut decoder = Decoder::new(data);
    let mut span = None;
    decoder.dict_entries(|dec, k| {
        let start = dec.pos;
        dec.value(1)?;
        if k == key.as_bytes() {
            span = Some(start..dec.pos);
        }
        Ok(())
    })?;
    if decoder.pos != data.len() {
        return Err(parse_error("Trailing data after root dictionary"));
    }
    Ok(span.map(|range| &data[range]))
}
