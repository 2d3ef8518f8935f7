//! Post-download dispatch
//!
//! When a download completes, its first output file may itself describe
//! more work: a `.torrent` file, or a list of magnet links. Handlers
//! recognise such files and turn them into new [`RequestGroup`]s.

mod magnet_list;
mod torrent;

pub use magnet_list::{
    MagnetListPostDownloadHandler, MAGNET_LIST_CONTENT_TYPE, MAGNET_LIST_EXTENSION,
};
pub use torrent::{TorrentPostDownloadHandler, TORRENT_CONTENT_TYPE, TORRENT_EXTENSION};

use crate::error::Result;
use crate::request_group::RequestGroup;

/// Turns a completed download into follow-up downloads
pub trait PostDownloadHandler: Send + Sync {
    /// Short name for log lines
    fn name(&self) -> &'static str;

    /// Whether this handler understands the group's first output file.
    /// Depends only on that file entry.
    fn can_handle(&self, group: &RequestGroup) -> bool;

    /// Append the downloads described by the completed group's output.
    ///
    /// On error nothing is appended.
    fn next_request_groups(&self, out: &mut Vec<RequestGroup>, group: &RequestGroup)
        -> Result<()>;
}

/// True when the first file entry's path ends with `extension` or its
/// content type is exactly `content_type`
pub(crate) fn first_entry_matches(
    group: &RequestGroup,
    extension: &str,
    content_type: &str,
) -> bool {
    let Some(entry) = group.context().first_file_entry() else {
        return false;
    };
    entry.path().to_string_lossy().ends_with(extension)
        || entry.content_type() == Some(content_type)
}

/// Handlers tried in fixed priority order
pub struct PostDownloadHandlers {
    handlers: Vec<Box<dyn PostDownloadHandler>>,
}

impl PostDownloadHandlers {
    /// Torrent first, then magnet list
    pub fn new() -> Self {
        Self {
            handlers: vec![
                Box::new(TorrentPostDownloadHandler::new()),
                Box::new(MagnetListPostDownloadHandler::new()),
            ],
        }
    }

    /// Registry with no handlers
    pub fn empty() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler with the lowest priority so far
    pub fn push(&mut self, handler: Box<dyn PostDownloadHandler>) {
        self.handlers.push(handler);
    }

    /// First handler that accepts the group
    pub fn find(&self, group: &RequestGroup) -> Option<&dyn PostDownloadHandler> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(group))
            .map(|h| h.as_ref())
    }

    /// Delegate to the first accepting handler; appends nothing when none does
    pub fn next_request_groups(
        &self,
        out: &mut Vec<RequestGroup>,
        group: &RequestGroup,
    ) -> Result<()> {
        match self.find(group) {
            Some(handler) => {
                tracing::debug!(
                    "Download {} is handled by the {} post-download handler",
                    group.id(),
                    handler.name()
                );
                handler.next_request_groups(out, group)
            }
            None => Ok(()),
        }
    }
}

impl Default for PostDownloadHandlers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request_group::DownloadContext;

    fn group(path: &str, content_type: Option<&str>) -> RequestGroup {
        let mut ctx = DownloadContext::new(0, 0, path);
        if let Some(ct) = content_type {
            ctx.first_file_entry_mut().unwrap().set_content_type(ct);
        }
        RequestGroup::new("/tmp", ctx)
    }

    #[test]
    fn test_find_in_priority_order() {
        let handlers = PostDownloadHandlers::new();

        let found = handlers.find(&group("a.torrent", None)).unwrap();
        assert_eq!(found.name(), "torrent");

        let found = handlers.find(&group("list.magnet", None)).unwrap();
        assert_eq!(found.name(), "magnet-list");

        // both criteria hold; torrent wins
        let found = handlers
            .find(&group("a.torrent", Some(MAGNET_LIST_CONTENT_TYPE)))
            .unwrap();
        assert_eq!(found.name(), "torrent");
    }

    #[test]
    fn test_unrecognised_output_yields_nothing() {
        let handlers = PostDownloadHandlers::new();
        let g = group("file.iso", Some("application/octet-stream"));
        assert!(handlers.find(&g).is_none());

        let mut out = Vec::new();
        handlers.next_request_groups(&mut out, &g).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_empty_registry_handles_nothing() {
        let handlers = PostDownloadHandlers::empty();
        assert!(handlers.find(&group("a.torrent", None)).is_none());
    }
}
