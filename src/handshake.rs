//! Receiver-side BitTorrent handshake
//!
//! Each accepted connection gets a [`ReceiverHandshakeUnit`]. The unit
//! collects the 68-byte handshake with non-blocking reads, looks up the
//! download whose info hash the remote asked for, and hands the connection
//! to it. Anything else closes the connection.

use std::io;
use std::time::{Duration, Instant};

use crate::command::{Context, Step, WorkUnit};
use crate::error::{EngineError, ProtocolErrorKind, Result};
use crate::events::EngineEvent;
use crate::net::Transport;
use crate::request_group::InboundPeer;
use crate::types::{Cuid, Fingerprint, Peer};

/// Protocol identifier
pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Size of the handshake message
pub const HANDSHAKE_SIZE: usize = 68; // 1 + 19 + 8 + 20 + 20

/// Default cap on connections handed to one download
pub const DEFAULT_MAX_INBOUND_PEERS: usize = 55;

/// Decoded handshake fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: Fingerprint,
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Validate and split a complete handshake message
    pub fn parse(buf: &[u8; HANDSHAKE_SIZE]) -> Result<Self> {
        let pstrlen = buf[0] as usize;
        if pstrlen != PROTOCOL_STRING.len() {
            return Err(EngineError::protocol(
                ProtocolErrorKind::PeerProtocol,
                format!("Invalid protocol string length: {}", pstrlen),
            ));
        }

        if &buf[1..1 + pstrlen] != PROTOCOL_STRING {
            return Err(EngineError::protocol(
                ProtocolErrorKind::PeerProtocol,
                "Invalid protocol string",
            ));
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self {
            reserved,
            info_hash: Fingerprint(info_hash),
            peer_id,
        })
    }

    /// Serialize into wire form
    pub fn to_bytes(&self) -> [u8; HANDSHAKE_SIZE] {
        let mut out = [0u8; HANDSHAKE_SIZE];
        out[0] = PROTOCOL_STRING.len() as u8;
        out[1..20].copy_from_slice(PROTOCOL_STRING);
        out[20..28].copy_from_slice(&self.reserved);
        out[28..48].copy_from_slice(self.info_hash.as_bytes());
        out[48..68].copy_from_slice(&self.peer_id);
        out
    }
}

enum Progress {
    Complete,
    WouldBlock,
    Closed,
    Failed(io::Error),
}

/// Reads the handshake of one inbound connection
pub struct ReceiverHandshakeUnit {
    cuid: Cuid,
    peer: Peer,
    transport: Option<Box<dyn Transport>>,
    buf: [u8; HANDSHAKE_SIZE],
    filled: usize,
    /// `None` when the timeout does not fit in an `Instant`
    deadline: Option<Instant>,
    max_inbound: usize,
}

impl ReceiverHandshakeUnit {
    pub fn new(cuid: Cuid, peer: Peer, transport: Box<dyn Transport>, timeout: Duration) -> Self {
        Self {
            cuid,
            peer,
            transport: Some(transport),
            buf: [0u8; HANDSHAKE_SIZE],
            filled: 0,
            deadline: Instant::now().checked_add(timeout),
            max_inbound: DEFAULT_MAX_INBOUND_PEERS,
        }
    }

    /// Refuse the hand-off once the download already holds `max` connections
    pub fn with_max_inbound(mut self, max: usize) -> Self {
        self.max_inbound = max;
        self
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    fn timed_out(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn fill(&mut self) -> Progress {
        let Some(transport) = self.transport.as_mut() else {
            return Progress::Closed;
        };
        while self.filled < HANDSHAKE_SIZE {
            match transport.read(&mut self.buf[self.filled..]) {
                Ok(0) => return Progress::Closed,
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Progress::WouldBlock,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Progress::Failed(e),
            }
        }
        Progress::Complete
    }

    fn close(&mut self) -> Step {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        Step::Done
    }

    fn hand_off(&mut self, ctx: &mut Context<'_>) -> Step {
        let handshake = match Handshake::parse(&self.buf) {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!("{} - Rejecting {}: {}", self.cuid, self.peer.addr, e);
                return self.close();
            }
        };

        let Some(id) = ctx.registry().find_by_fingerprint(&handshake.info_hash) else {
            tracing::debug!(
                "{} - No download with info hash {} for {}",
                self.cuid,
                handshake.info_hash,
                self.peer.addr
            );
            return self.close();
        };

        let Some(group) = ctx.registry_mut().get_mut(id) else {
            return self.close();
        };
        if group.inbound_peers().len() >= self.max_inbound {
            tracing::debug!(
                "{} - Download {} already holds {} inbound peers; dropping {}",
                self.cuid,
                id,
                self.max_inbound,
                self.peer.addr
            );
            return self.close();
        }
        let Some(transport) = self.transport.take() else {
            return Step::Done;
        };
        group.push_inbound(InboundPeer {
            peer: self.peer.clone(),
            peer_id: handshake.peer_id,
            transport,
        });

        tracing::debug!(
            "{} - Handed {} over to download {}",
            self.cuid,
            self.peer.addr,
            id
        );
        ctx.emit(EngineEvent::PeerHandedOff {
            id,
            addr: self.peer.addr,
        });
        Step::Done
    }
}

impl WorkUnit for ReceiverHandshakeUnit {
    fn cuid(&self) -> Cuid {
        self.cuid
    }

    fn execute(&mut self, ctx: &mut Context<'_>) -> Step {
        if ctx.is_halt_requested() {
            return self.close();
        }

        match self.fill() {
            Progress::Complete => self.hand_off(ctx),
            Progress::WouldBlock if self.timed_out() => {
                tracing::warn!(
                    "{} - Handshake timed out for {} after {} bytes",
                    self.cuid,
                    self.peer.addr,
                    self.filled
                );
                self.close()
            }
            Progress::WouldBlock => Step::Pending,
            Progress::Closed => {
                tracing::debug!("{} - {} closed the connection", self.cuid, self.peer.addr);
                self.close()
            }
            Progress::Failed(e) => {
                tracing::debug!("{} - Read from {} failed: {}", self.cuid, self.peer.addr, e);
                self.close()
            }
        }
    }
}
