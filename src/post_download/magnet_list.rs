//! Completed magnet lists become one download per link

use crate::error::{EngineError, ProtocolErrorKind, Result};
use crate::request_group::{DownloadContext, RequestGroup};
use crate::torrent::MagnetUri;

use super::{first_entry_matches, PostDownloadHandler};

pub const MAGNET_LIST_EXTENSION: &str = ".magnet";
pub const MAGNET_LIST_CONTENT_TYPE: &str = "application/x-magnet-list";

/// Reads a file of magnet URIs, one per line.
///
/// Blank lines and lines starting with `#` are ignored. A single bad line
/// rejects the whole file.
#[derive(Debug, Default)]
pub struct MagnetListPostDownloadHandler;

impl MagnetListPostDownloadHandler {
    pub fn new() -> Self {
        Self
    }
}

impl PostDownloadHandler for MagnetListPostDownloadHandler {
    fn name(&self) -> &'static str {
        "magnet-list"
    }

    fn can_handle(&self, group: &RequestGroup) -> bool {
        first_entry_matches(group, MAGNET_LIST_EXTENSION, MAGNET_LIST_CONTENT_TYPE)
    }

    fn next_request_groups(
        &self,
        out: &mut Vec<RequestGroup>,
        group: &RequestGroup,
    ) -> Result<()> {
        let path = group.first_file_path().ok_or_else(|| EngineError::InvalidState {
            action: "read magnet list",
            current_state: format!("download {} has no output file", group.id()),
        })?;

        let data = std::fs::read(&path).map_err(|e| EngineError::from_io(e, &path))?;
        let text = String::from_utf8(data).map_err(|_| {
            EngineError::protocol(
                ProtocolErrorKind::InvalidMagnet,
                format!("{} is not valid UTF-8", path.display()),
            )
        })?;

        let mut derived = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let magnet = MagnetUri::parse(line).map_err(|e| {
                EngineError::protocol(
                    ProtocolErrorKind::InvalidMagnet,
                    format!("{}:{}: {}", path.display(), lineno + 1, e),
                )
            })?;
            let mut child = RequestGroup::new(group.dir(), DownloadContext::from_magnet(&magnet));
            child.set_parent(group.id());
            derived.push(child);
        }

        tracing::info!(
            "Download {} produced {} magnet link(s)",
            group.id(),
            derived.len()
        );
        out.extend(derived);
        Ok(())
    }
}
