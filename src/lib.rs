//! # gosh-intake
//!
//! Connection intake and post-download dispatch for a download engine.
//!
//! ## Features
//!
//! - **Peer listener**: binds one of a shuffled set of candidate ports and
//!   accepts inbound peers in small batches without blocking the scheduler
//! - **Receiver handshake**: reads the BitTorrent handshake and hands the
//!   connection to the download it asked for
//! - **Post-download dispatch**: a completed `.torrent` file or magnet list
//!   turns into new downloads identified by their info hash
//! - **Cooperative scheduling**: single-threaded work units driven by a
//!   Tokio interval
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gosh_intake::{DownloadContext, DownloadEngine, EngineConfig, RequestGroup};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default().listen_port("6881-6999");
//!     let mut engine = DownloadEngine::new(config)?;
//!
//!     // A finished HTTP download that turned out to be a torrent
//!     let dir = engine.config().download_dir.clone();
//!     let id = engine.add(RequestGroup::new(
//!         &dir,
//!         DownloadContext::new(0, 0, "ubuntu.torrent"),
//!     ))?;
//!     let derived = engine.complete(id)?;
//!     println!("Derived downloads: {:?}", derived);
//!
//!     // Accept peers for the derived downloads
//!     if let Some(port) = engine.start_peer_listener()? {
//!         println!("Listening on {}", port);
//!     }
//!     engine.run().await;
//!     Ok(())
//! }
//! ```

// Modules
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod handshake;
pub mod net;
pub mod peer_listen;
pub mod post_download;
pub mod registry;
pub mod request_group;
pub mod torrent;
pub mod types;

// Re-exports for convenience
pub use command::{Context, CuidAllocator, HaltHandle, Step, WorkUnit};
pub use config::{BindExhaustedPolicy, EngineConfig};
pub use engine::DownloadEngine;
pub use error::{EngineError, NetworkErrorKind, ProtocolErrorKind, Result, StorageErrorKind};
pub use events::EngineEvent;
pub use types::{Cuid, DownloadId, Fingerprint, Peer};

// Intake exports
pub use handshake::{
    Handshake, ReceiverHandshakeUnit, DEFAULT_MAX_INBOUND_PEERS, HANDSHAKE_SIZE, PROTOCOL_STRING,
};
pub use net::{PortSequence, TcpTransport, TcpTransportFactory, Transport, TransportFactory};
pub use peer_listen::{PeerListenUnit, ACCEPT_BATCH};

// Task exports
pub use post_download::{
    MagnetListPostDownloadHandler, PostDownloadHandler, PostDownloadHandlers,
    TorrentPostDownloadHandler,
};
pub use registry::TaskRegistry;
pub use request_group::{DownloadContext, FileEntry, GroupState, InboundPeer, RequestGroup};
