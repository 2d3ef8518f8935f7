//! Download tasks
//!
//! A [`RequestGroup`] is one download known to the engine: where it lands,
//! what it is made of ([`DownloadContext`]), how far it got, and which
//! download it was derived from.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::net::Transport;
use crate::torrent::{MagnetUri, Metainfo};
use crate::types::{DownloadId, Fingerprint, Peer};

/// Lifecycle of a download task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupState {
    /// Registered, not started
    Waiting,
    /// Transferring
    Active,
    /// All content retrieved
    Complete,
    /// Gave up
    Error,
}

impl GroupState {
    /// Whether the task has reached a terminal state
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Complete => "complete",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// One output file of a download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    path: PathBuf,
    length: u64,
    offset: u64,
    content_type: Option<String>,
}

impl FileEntry {
    pub fn new(path: impl Into<PathBuf>, length: u64, offset: u64) -> Self {
        Self {
            path: path.into(),
            length,
            offset,
            content_type: None,
        }
    }

    /// Path, relative to the owning group's directory unless absolute
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Byte offset in the concatenated content
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Declared MIME type, if the source reported one
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = Some(content_type.into());
    }
}

/// Layout and identity of a download's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadContext {
    piece_length: u64,
    total_length: u64,
    file_entries: Vec<FileEntry>,
    descriptor_path: Option<PathBuf>,
    fingerprint: Option<Fingerprint>,
    announce_tiers: Vec<Vec<String>>,
    name: String,
}

impl DownloadContext {
    /// Context with a single output file
    pub fn new(piece_length: u64, total_length: u64, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            piece_length,
            total_length,
            file_entries: vec![FileEntry::new(path, total_length, 0)],
            descriptor_path: None,
            fingerprint: None,
            announce_tiers: Vec::new(),
            name,
        }
    }

    /// Context described by parsed torrent metadata
    pub fn from_metainfo(metainfo: &Metainfo, descriptor_path: Option<PathBuf>) -> Self {
        let file_entries = metainfo
            .info
            .files
            .iter()
            .map(|f| FileEntry::new(f.path.clone(), f.length, f.offset))
            .collect();

        Self {
            piece_length: metainfo.info.piece_length,
            total_length: metainfo.info.total_size,
            file_entries,
            descriptor_path,
            fingerprint: Some(metainfo.fingerprint()),
            announce_tiers: metainfo.tracker_tiers(),
            name: metainfo.info.name.clone(),
        }
    }

    /// Context for a magnet link; files stay unknown until metadata arrives
    pub fn from_magnet(magnet: &MagnetUri) -> Self {
        Self {
            piece_length: 0,
            total_length: magnet.exact_length.unwrap_or(0),
            file_entries: Vec::new(),
            descriptor_path: None,
            fingerprint: Some(magnet.fingerprint()),
            announce_tiers: magnet.trackers.iter().map(|t| vec![t.clone()]).collect(),
            name: magnet.name(),
        }
    }

    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn file_entries(&self) -> &[FileEntry] {
        &self.file_entries
    }

    pub fn first_file_entry(&self) -> Option<&FileEntry> {
        self.file_entries.first()
    }

    pub fn first_file_entry_mut(&mut self) -> Option<&mut FileEntry> {
        self.file_entries.first_mut()
    }

    /// Metadata file this context was built from
    pub fn descriptor_path(&self) -> Option<&Path> {
        self.descriptor_path.as_deref()
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.fingerprint
    }

    pub fn set_fingerprint(&mut self, fingerprint: Fingerprint) {
        self.fingerprint = Some(fingerprint);
    }

    pub fn announce_tiers(&self) -> &[Vec<String>] {
        &self.announce_tiers
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Accepted connection that finished its handshake for a group
pub struct InboundPeer {
    pub peer: Peer,
    pub peer_id: [u8; 20],
    pub transport: Box<dyn Transport>,
}

impl fmt::Debug for InboundPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundPeer")
            .field("peer", &self.peer)
            .field("peer_id", &hex::encode(self.peer_id))
            .finish_non_exhaustive()
    }
}

/// A download task
#[derive(Debug)]
pub struct RequestGroup {
    id: DownloadId,
    dir: PathBuf,
    context: DownloadContext,
    state: GroupState,
    parent: Option<DownloadId>,
    followed_by: Vec<DownloadId>,
    post_processed: bool,
    inbound: Vec<InboundPeer>,
}

impl RequestGroup {
    /// New waiting task writing under `dir`
    pub fn new(dir: impl Into<PathBuf>, context: DownloadContext) -> Self {
        Self {
            id: DownloadId::new(),
            dir: dir.into(),
            context,
            state: GroupState::Waiting,
            parent: None,
            followed_by: Vec::new(),
            post_processed: false,
            inbound: Vec::new(),
        }
    }

    pub fn id(&self) -> DownloadId {
        self.id
    }

    /// Base directory for output files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn context(&self) -> &DownloadContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut DownloadContext {
        &mut self.context
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    /// Update the state. A finished task drops its inbound connections.
    pub fn set_state(&mut self, state: GroupState) {
        self.state = state;
        if state.is_finished() {
            self.release_inbound();
        }
    }

    /// Download this task was derived from
    pub fn parent(&self) -> Option<DownloadId> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: DownloadId) {
        self.parent = Some(parent);
    }

    /// Tasks derived from this one after it completed
    pub fn followed_by(&self) -> &[DownloadId] {
        &self.followed_by
    }

    pub(crate) fn add_followed_by(&mut self, children: &[DownloadId]) {
        self.followed_by.extend_from_slice(children);
    }

    pub fn is_post_processed(&self) -> bool {
        self.post_processed
    }

    pub(crate) fn mark_post_processed(&mut self) {
        self.post_processed = true;
    }

    /// On-disk location of the first output file
    pub fn first_file_path(&self) -> Option<PathBuf> {
        self.context
            .first_file_entry()
            .map(|entry| self.dir.join(entry.path()))
    }

    pub fn inbound_peers(&self) -> &[InboundPeer] {
        &self.inbound
    }

    /// Hand over the connections collected so far
    pub fn take_inbound_peers(&mut self) -> Vec<InboundPeer> {
        std::mem::take(&mut self.inbound)
    }

    pub(crate) fn push_inbound(&mut self, peer: InboundPeer) {
        self.inbound.push(peer);
    }

    /// Close every collected connection. Returns how many were closed.
    pub fn release_inbound(&mut self) -> usize {
        let released = self.inbound.len();
        for mut inbound in self.inbound.drain(..) {
            inbound.transport.close();
        }
        if released > 0 {
            tracing::debug!(
                "Closed {} inbound connection(s) of download {}",
                released,
                self.id
            );
        }
        released
    }
}
