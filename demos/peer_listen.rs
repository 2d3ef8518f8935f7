//! Peer listener demo
//!
//! Treats a .torrent file as a finished download, registers the torrent it
//! describes, and accepts inbound peers for it until Ctrl-C.
//!
//! Usage: cargo run --example peer_listen -- path/to/file.torrent [ports]

use gosh_intake::{DownloadContext, DownloadEngine, EngineConfig, EngineEvent, RequestGroup};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let torrent_path = PathBuf::from(
        env::args()
            .nth(1)
            .expect("Usage: peer_listen <path-to-torrent-file> [ports]"),
    );
    let ports = env::args().nth(2).unwrap_or_else(|| "6881-6999".to_string());

    let dir = torrent_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = torrent_path
        .file_name()
        .ok_or("torrent path has no file name")?
        .to_string_lossy()
        .into_owned();

    let config = EngineConfig::new().download_dir(&dir).listen_port(ports);
    let mut engine = DownloadEngine::new(config)?;

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::ListenerBound { port } => println!("Listening on port {port}"),
                EngineEvent::PeerAccepted { addr, cuid } => {
                    println!("Accepted {addr} ({cuid})")
                }
                EngineEvent::PeerHandedOff { id, addr } => {
                    println!("Peer {addr} joined download {id}")
                }
                other => println!("{other:?}"),
            }
        }
    });

    let parent = engine.add(RequestGroup::new(
        &dir,
        DownloadContext::new(0, 0, file_name),
    ))?;
    for id in engine.complete(parent)? {
        if let Some(group) = engine.group(id) {
            let ctx = group.context();
            println!(
                "Derived download {id}: {} ({}, {} bytes)",
                ctx.name(),
                ctx.fingerprint().map(|f| f.to_hex()).unwrap_or_default(),
                ctx.total_length()
            );
        }
    }

    if engine.start_peer_listener()?.is_none() {
        println!("No listen port available");
        return Ok(());
    }

    let halt = engine.halt_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Shutting down...");
            halt.request();
        }
    });

    engine.run().await;
    Ok(())
}
