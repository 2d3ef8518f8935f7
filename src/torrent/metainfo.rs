//! Torrent Metainfo Parser
//!
//! Parses .torrent files (BEP 3) into the file list, piece layout and
//! trackers a derived download needs, plus the info hash that identifies it.

use sha1::{Digest, Sha1};
use std::path::{Component, Path, PathBuf};

use super::bencode::{top_level_value_span, BencodeValue};
use crate::error::{EngineError, ProtocolErrorKind, Result};
use crate::types::Fingerprint;

/// SHA-1 hash (20 bytes)
pub type Sha1Hash = [u8; 20];

/// Parsed torrent metainfo
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// SHA-1 hash of the bencoded info dictionary
    pub info_hash: Sha1Hash,
    /// The parsed info dictionary
    pub info: Info,
    /// Primary announce URL
    pub announce: Option<String>,
    /// Announce list (BEP 12) - list of tiers, each tier is a list of trackers
    pub announce_list: Vec<Vec<String>>,
}

/// The info dictionary
#[derive(Debug, Clone)]
pub struct Info {
    /// Suggested name for the file or directory
    pub name: String,
    /// Number of bytes per piece
    pub piece_length: u64,
    /// SHA-1 hash of each piece
    pub pieces: Vec<Sha1Hash>,
    /// Files in this torrent
    pub files: Vec<FileInfo>,
    /// Total size of all files
    pub total_size: u64,
    /// Whether this is a single-file torrent
    pub is_single_file: bool,
    /// Private flag (BEP 27)
    pub private: bool,
}

/// Information about a single file in the torrent
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Path relative to the download directory (includes the torrent name
    /// for multi-file torrents)
    pub path: PathBuf,
    /// File size in bytes
    pub length: u64,
    /// Byte offset in the concatenated file stream
    pub offset: u64,
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::protocol(ProtocolErrorKind::InvalidTorrent, message)
}

impl Metainfo {
    /// Parse a .torrent file from bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        let root = BencodeValue::parse_exact(data)?;
        if root.as_dict().is_none() {
            return Err(invalid("Root must be a dictionary"));
        }

        let info_bytes =
            top_level_value_span(data, "info")?.ok_or_else(|| invalid("Missing 'info' key"))?;
        let info_hash: Sha1Hash = Sha1::digest(info_bytes).into();

        let info = root
            .get("info")
            .ok_or_else(|| invalid("Missing 'info' key"))
            .and_then(Self::parse_info)?;

        let announce = root
            .get("announce")
            .and_then(|v| v.as_string())
            .map(String::from);

        let announce_list = Self::parse_announce_list(root.get("announce-list"));

        Ok(Metainfo {
            info_hash,
            info,
            announce,
            announce_list,
        })
    }

    fn parse_info(value: &BencodeValue) -> Result<Info> {
        if value.as_dict().is_none() {
            return Err(invalid("'info' must be a dictionary"));
        }

        let name = value
            .get("name")
            .and_then(|v| v.as_string())
            .ok_or_else(|| invalid("Missing 'name' in info"))?
            .to_string();
        let name_path = sanitize_path(std::iter::once(name.as_str()))?;

        let piece_length = value
            .get("piece length")
            .and_then(|v| v.as_uint())
            .filter(|&len| len > 0)
            .ok_or_else(|| invalid("Missing or invalid 'piece length'"))?;

        let pieces_bytes = value
            .get("pieces")
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| invalid("Missing 'pieces'"))?;
        if pieces_bytes.len() % 20 != 0 {
            return Err(invalid(format!(
                "Invalid pieces length: {} (not a multiple of 20)",
                pieces_bytes.len()
            )));
        }
        let pieces: Vec<Sha1Hash> = pieces_bytes
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let private = value.get("private").and_then(|v| v.as_int()) == Some(1);

        let (files, total_size, is_single_file) = match value.get("files") {
            Some(files_value) => {
                let (files, total) = Self::parse_files(files_value, &name_path)?;
                (files, total, false)
            }
            None => {
                let length = value
                    .get("length")
                    .and_then(|v| v.as_uint())
                    .ok_or_else(|| invalid("Missing 'length' for single-file torrent"))?;
                let file = FileInfo {
                    path: name_path,
                    length,
                    offset: 0,
                };
                (vec![file], length, true)
            }
        };

        let expected_pieces = total_size.div_ceil(piece_length);
        if pieces.len() as u64 != expected_pieces {
            return Err(invalid(format!(
                "Piece count mismatch: have {}, expected {} for {} bytes with {} byte pieces",
                pieces.len(),
                expected_pieces,
                total_size,
                piece_length
            )));
        }

        Ok(Info {
            name,
            piece_length,
            pieces,
            files,
            total_size,
            is_single_file,
            private,
        })
    }

    fn parse_files(value: &BencodeValue, root: &Path) -> Result<(Vec<FileInfo>, u64)> {
        let list = value
            .as_list()
            .ok_or_else(|| invalid("'files' must be a list"))?;
        if list.is_empty() {
            return Err(invalid("'files' must not be empty"));
        }

        let mut files = Vec::with_capacity(list.len());
        let mut offset = 0u64;

        for entry in list {
            let length = entry
                .get("length")
                .and_then(|v| v.as_uint())
                .ok_or_else(|| invalid("Missing 'length' in file entry"))?;

            let components = entry
                .get("path")
                .and_then(|v| v.as_list())
                .ok_or_else(|| invalid("'path' must be a list of strings"))?
                .iter()
                .map(|c| c.as_string().ok_or_else(|| invalid("Path component must be a string")))
                .collect::<Result<Vec<_>>>()?;

            files.push(FileInfo {
                path: root.join(sanitize_path(components.into_iter())?),
                length,
                offset,
            });

            offset = offset
                .checked_add(length)
                .ok_or_else(|| invalid("Total size overflows"))?;
        }

        Ok((files, offset))
    }

    fn parse_announce_list(value: Option<&BencodeValue>) -> Vec<Vec<String>> {
        let Some(tiers) = value.and_then(|v| v.as_list()) else {
            return Vec::new();
        };

        tiers
            .iter()
            .filter_map(|tier| {
                tier.as_list().map(|urls| {
                    urls.iter()
                        .filter_map(|url| url.as_string().map(String::from))
                        .collect()
                })
            })
            .filter(|tier: &Vec<String>| !tier.is_empty())
            .collect()
    }

    /// The info hash as a download fingerprint
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(self.info_hash)
    }

    /// Get the info_hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Tracker tiers, falling back to the lone announce URL
    pub fn tracker_tiers(&self) -> Vec<Vec<String>> {
        if !self.announce_list.is_empty() {
            return self.announce_list.clone();
        }
        self.announce
            .iter()
            .map(|url| vec![url.clone()])
            .collect()
    }
}

/// Join path components, rejecting anything that could escape the
/// download directory
fn sanitize_path<'s>(components: impl Iterator<Item = &'s str>) -> Result<PathBuf> {
    let mut path = PathBuf::new();
    for component in components {
        let mut parsed = Path::new(component).components();
        match (parsed.next(), parsed.next()) {
            (Some(Component::Normal(part)), None) => path.push(part),
            _ => {
                return Err(invalid(format!(
                    "Unsafe path component in torrent: {:?}",
                    component
                )))
            }
        }
    }
    if path.as_os_str().is_empty() {
        return Err(invalid("Empty file path in torrent"));
    }
    Ok(path)
}
