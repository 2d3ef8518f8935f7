//! Completed `.torrent` downloads become BitTorrent downloads

use crate::error::{EngineError, Result};
use crate::request_group::{DownloadContext, RequestGroup};
use crate::torrent::Metainfo;

use super::{first_entry_matches, PostDownloadHandler};

pub const TORRENT_EXTENSION: &str = ".torrent";
pub const TORRENT_CONTENT_TYPE: &str = "application/x-bittorrent";

#[derive(Debug, Default)]
pub struct TorrentPostDownloadHandler;

impl TorrentPostDownloadHandler {
    pub fn new() -> Self {
        Self
    }
}

impl PostDownloadHandler for TorrentPostDownloadHandler {
    fn name(&self) -> &'static str {
        "torrent"
    }

    fn can_handle(&self, group: &RequestGroup) -> bool {
        first_entry_matches(group, TORRENT_EXTENSION, TORRENT_CONTENT_TYPE)
    }

    fn next_request_groups(
        &self,
        out: &mut Vec<RequestGroup>,
        group: &RequestGroup,
    ) -> Result<()> {
        let path = group.first_file_path().ok_or_else(|| EngineError::InvalidState {
            action: "read torrent metadata",
            current_state: format!("download {} has no output file", group.id()),
        })?;

        let data = std::fs::read(&path).map_err(|e| EngineError::from_io(e, &path))?;
        let metainfo = Metainfo::parse(&data)?;

        tracing::info!(
            "Download {} produced torrent '{}' ({})",
            group.id(),
            metainfo.info.name,
            metainfo.info_hash_hex()
        );

        let context = DownloadContext::from_metainfo(&metainfo, Some(path));
        let mut derived = RequestGroup::new(group.dir(), context);
        derived.set_parent(group.id());
        out.push(derived);
        Ok(())
    }
}
