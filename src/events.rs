//! Engine events
//!
//! Events broadcast by the engine to subscribers.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::types::{Cuid, DownloadId};

/// Events emitted by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// The peer listener is accepting connections on `port`
    ListenerBound { port: u16 },
    /// An inbound connection was accepted and a handshake unit spawned
    PeerAccepted { addr: SocketAddr, cuid: Cuid },
    /// A handshaken inbound peer was handed to its download
    PeerHandedOff { id: DownloadId, addr: SocketAddr },
    /// Download was added to the registry
    DownloadAdded { id: DownloadId },
    /// Download completed
    DownloadCompleted { id: DownloadId },
    /// Follow-up downloads were derived from a completed download's output
    DownloadsDerived {
        parent: DownloadId,
        children: Vec<DownloadId>,
    },
}
