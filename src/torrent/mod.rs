//! BitTorrent Module
//!
//! Metadata formats a completed download may turn out to be:
//! - Bencode decoding
//! - Torrent file parsing (metainfo) and info hash computation
//! - Magnet URI handling

pub mod bencode;
pub mod magnet;
pub mod metainfo;

// Re-export commonly used types
pub use bencode::BencodeValue;
pub use magnet::MagnetUri;
pub use metainfo::{FileInfo, Info, Metainfo, Sha1Hash};
