//! Inbound peer acceptor
//!
//! [`PeerListenUnit`] owns the engine's listening socket. Binding walks a
//! shuffled copy of the candidate ports until one can be bound, listened
//! on and switched to non-blocking mode. Once bound, every step accepts at
//! most [`ACCEPT_BATCH`] pending connections and spawns a
//! [`ReceiverHandshakeUnit`] for each.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::command::{Context, Step, WorkUnit};
use crate::error::Result;
use crate::events::EngineEvent;
use crate::handshake::{ReceiverHandshakeUnit, DEFAULT_MAX_INBOUND_PEERS};
use crate::net::{is_valid_port, PortSequence, Transport, TransportFactory};
use crate::types::{Cuid, Peer};

/// Maximum connections accepted per step
pub const ACCEPT_BATCH: usize = 3;

pub struct PeerListenUnit {
    cuid: Cuid,
    factory: Arc<dyn TransportFactory>,
    socket: Option<Box<dyn Transport>>,
    port: Option<u16>,
    handshake_timeout: Duration,
    max_inbound: usize,
}

impl PeerListenUnit {
    pub fn new(cuid: Cuid, factory: Arc<dyn TransportFactory>, handshake_timeout: Duration) -> Self {
        Self {
            cuid,
            factory,
            socket: None,
            port: None,
            handshake_timeout,
            max_inbound: DEFAULT_MAX_INBOUND_PEERS,
        }
    }

    /// Per-download cap passed on to each handshake unit
    pub fn with_max_inbound(mut self, max: usize) -> Self {
        self.max_inbound = max;
        self
    }

    /// Use `factory` for the next bind
    pub fn set_factory(&mut self, factory: Arc<dyn TransportFactory>) {
        self.factory = factory;
    }

    /// Port currently accepting connections
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn is_bound(&self) -> bool {
        self.socket.is_some()
    }

    /// Bind to the first usable port of `ports`, tried in random order.
    ///
    /// The sequence is drained. Values outside 1..=65535 are skipped.
    /// Returns `None` when no candidate could be bound.
    pub fn bind_port<R: Rng + ?Sized>(
        &mut self,
        ports: &mut PortSequence,
        rng: &mut R,
    ) -> Option<u16> {
        self.shutdown();

        let mut candidates = ports.flush();
        candidates.shuffle(rng);

        for value in candidates {
            if !is_valid_port(value) {
                continue;
            }
            let port = value as u16;
            match self.try_bind(port) {
                Ok(socket) => {
                    tracing::info!(
                        "{} - Using port {} for accepting new connections",
                        self.cuid,
                        port
                    );
                    self.socket = Some(socket);
                    self.port = Some(port);
                    return Some(port);
                }
                Err(e) => {
                    tracing::error!("{} - Failed to bind port {}: {}", self.cuid, port, e);
                }
            }
        }
        None
    }

    /// Fresh transport, bound, listening and non-blocking. Closed on failure.
    fn try_bind(&self, port: u16) -> Result<Box<dyn Transport>> {
        let mut socket = self.factory.create()?;
        match listen_on(socket.as_mut(), port) {
            Ok(()) => Ok(socket),
            Err(e) => {
                socket.close();
                Err(e)
            }
        }
    }

    /// Release the listening socket
    pub fn shutdown(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
        self.port = None;
    }
}

fn listen_on(socket: &mut dyn Transport, port: u16) -> Result<()> {
    socket.bind(port)?;
    socket.begin_listen()?;
    socket.set_non_blocking()
}

fn prepare_accepted(conn: &mut dyn Transport) -> Result<std::net::SocketAddr> {
    let addr = conn.peer_addr()?;
    conn.set_non_blocking()?;
    Ok(addr)
}

/// Accept one pending connection and queue its handshake
fn accept_one(
    listener: &mut dyn Transport,
    ctx: &mut Context<'_>,
    own: Cuid,
    handshake_timeout: Duration,
    max_inbound: usize,
) -> Result<()> {
    let mut conn = listener.accept_connection()?;
    let addr = match prepare_accepted(conn.as_mut()) {
        Ok(addr) => addr,
        Err(e) => {
            conn.close();
            return Err(e);
        }
    };

    let peer = Peer::incoming(addr);
    let cuid = ctx.new_cuid();
    tracing::debug!(
        "{} - Accepted the connection from {}:{}",
        own,
        peer.ip(),
        peer.port()
    );
    ctx.submit(Box::new(
        ReceiverHandshakeUnit::new(cuid, peer, conn, handshake_timeout)
            .with_max_inbound(max_inbound),
    ));
    tracing::debug!("{} - Added {} to receive BitTorrent handshake", own, cuid);
    ctx.emit(EngineEvent::PeerAccepted { addr, cuid });
    Ok(())
}

impl WorkUnit for PeerListenUnit {
    fn cuid(&self) -> Cuid {
        self.cuid
    }

    fn execute(&mut self, ctx: &mut Context<'_>) -> Step {
        if ctx.is_halt_requested() || ctx.registry().all_downloads_finished() {
            self.shutdown();
            return Step::Done;
        }

        let cuid = self.cuid;
        let timeout = self.handshake_timeout;
        let max_inbound = self.max_inbound;
        let Some(socket) = self.socket.as_mut() else {
            return Step::Done;
        };

        for _ in 0..ACCEPT_BATCH {
            match socket.poll_readable() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::debug!("{} - Listening socket poll failed: {}", cuid, e);
                    continue;
                }
            }
            if let Err(e) = accept_one(socket.as_mut(), ctx, cuid, timeout, max_inbound) {
                tracing::debug!("{} - Failed to accept connection: {}", cuid, e);
            }
        }
        Step::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::TestHarness;
    use crate::net::mock::MockNetwork;
    use crate::request_group::{DownloadContext, GroupState, RequestGroup};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn harness_with_download() -> TestHarness {
        let mut harness = TestHarness::new();
        harness
            .registry
            .add(RequestGroup::new("/tmp", DownloadContext::new(16384, 1024, "a.bin")))
            .unwrap();
        harness
    }

    fn bound_unit(net: &MockNetwork, port: u16, harness: &mut TestHarness) -> PeerListenUnit {
        let cuid = harness.cuids.next_cuid();
        let mut unit = PeerListenUnit::new(cuid, net.factory(), TIMEOUT);
        let mut ports = PortSequence::from(vec![port as i32]);
        assert_eq!(unit.bind_port(&mut ports, &mut StdRng::seed_from_u64(0)), Some(port));
        unit
    }

    #[test]
    fn test_single_bindable_port_wins_for_any_seed() {
        for seed in 0..16 {
            let net = MockNetwork::with_bindable(&[6885]);
            let mut unit = PeerListenUnit::new(Cuid(1), net.factory(), TIMEOUT);
            let mut ports = PortSequence::parse("6881-6889").unwrap();

            let port = unit.bind_port(&mut ports, &mut StdRng::seed_from_u64(seed));
            assert_eq!(port, Some(6885));
            assert_eq!(unit.port(), Some(6885));
            assert!(ports.is_empty());

            let s = net.state.lock();
            assert_eq!(s.bind_attempts.last(), Some(&6885));
            // every failed candidate got its own transport, closed afterwards
            assert_eq!(s.created, s.bind_attempts.len());
            assert_eq!(s.closed, s.bind_attempts.len() - 1);
        }
    }

    #[test]
    fn test_shuffle_is_deterministic_per_seed() {
        let attempts = |seed| {
            let net = MockNetwork::default();
            let mut unit = PeerListenUnit::new(Cuid(1), net.factory(), TIMEOUT);
            let mut ports = PortSequence::parse("7000-7019").unwrap();
            assert_eq!(unit.bind_port(&mut ports, &mut StdRng::seed_from_u64(seed)), None);
            let tried = net.state.lock().bind_attempts.clone();
            tried
        };
        let first = attempts(42);
        assert_eq!(first, attempts(42));

        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (7000..7020).collect::<Vec<u16>>());
    }

    #[test]
    fn test_out_of_range_ports_never_attempted() {
        let net = MockNetwork::with_bindable(&[1]);
        let mut unit = PeerListenUnit::new(Cuid(1), net.factory(), TIMEOUT);
        let mut ports = PortSequence::from(vec![0, -5, 65536, 70000, 1]);

        assert_eq!(unit.bind_port(&mut ports, &mut StdRng::seed_from_u64(3)), Some(1));
        let s = net.state.lock();
        assert_eq!(s.bind_attempts, vec![1]);
        assert_eq!(s.created, 1);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let net = MockNetwork::default();
        let mut unit = PeerListenUnit::new(Cuid(1), net.factory(), TIMEOUT);
        let mut ports = PortSequence::from(vec![6881, 6882, 0]);

        assert_eq!(unit.bind_port(&mut ports, &mut StdRng::seed_from_u64(1)), None);
        assert!(!unit.is_bound());
        let s = net.state.lock();
        assert_eq!(s.bind_attempts.len(), 2);
        assert_eq!(s.closed, 2);
    }

    #[test]
    fn test_listen_failure_closes_and_moves_on() {
        let net = MockNetwork::default();
        net.state.lock().listen_fails.insert(6881);
        let mut unit = PeerListenUnit::new(Cuid(1), net.factory(), TIMEOUT);
        let mut ports = PortSequence::from(vec![6881]);

        assert_eq!(unit.bind_port(&mut ports, &mut StdRng::seed_from_u64(1)), None);
        assert_eq!(net.state.lock().closed, 1);
    }

    #[test]
    fn test_accepts_at_most_batch_per_step() {
        let net = MockNetwork::with_bindable(&[6881]);
        let mut harness = harness_with_download();
        let mut unit = bound_unit(&net, 6881, &mut harness);
        for i in 0..5 {
            net.push_connection(&format!("192.168.0.{}:5000", i + 1));
        }

        assert_eq!(unit.execute(&mut harness.ctx()), Step::Pending);
        assert_eq!(net.state.lock().accept_calls, ACCEPT_BATCH);
        assert_eq!(harness.spawned.len(), ACCEPT_BATCH);

        assert_eq!(unit.execute(&mut harness.ctx()), Step::Pending);
        assert_eq!(net.state.lock().accept_calls, 5);
        assert_eq!(harness.spawned.len(), 5);
    }

    #[test]
    fn test_stops_early_when_not_readable() {
        let net = MockNetwork::with_bindable(&[6881]);
        let mut harness = harness_with_download();
        let mut unit = bound_unit(&net, 6881, &mut harness);
        net.push_connection("192.168.0.1:5000");

        assert_eq!(unit.execute(&mut harness.ctx()), Step::Pending);
        let s = net.state.lock();
        assert_eq!(s.accept_calls, 1);
        assert_eq!(s.listener_polls, 2);
    }

    #[test]
    fn test_idle_step_stays_pending() {
        let net = MockNetwork::with_bindable(&[6881]);
        let mut harness = harness_with_download();
        let mut unit = bound_unit(&net, 6881, &mut harness);

        assert_eq!(unit.execute(&mut harness.ctx()), Step::Pending);
        assert_eq!(net.state.lock().accept_calls, 0);
        assert!(harness.spawned.is_empty());
    }

    #[test]
    fn test_spawned_units_get_fresh_cuids() {
        let net = MockNetwork::with_bindable(&[6881]);
        let mut harness = harness_with_download();
        let mut unit = bound_unit(&net, 6881, &mut harness);
        net.push_connection("192.168.0.1:5000");
        net.push_connection("192.168.0.2:5000");
        let mut events = harness.events.subscribe();

        unit.execute(&mut harness.ctx());
        let cuids: Vec<_> = harness.spawned.iter().map(|u| u.cuid()).collect();
        assert_eq!(cuids.len(), 2);
        assert!(cuids[0] < cuids[1]);
        assert!(cuids.iter().all(|c| *c != unit.cuid()));

        match events.try_recv().unwrap() {
            EngineEvent::PeerAccepted { addr, cuid } => {
                assert_eq!(addr.to_string(), "192.168.0.1:5000");
                assert_eq!(cuid, cuids[0]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_accept_error_continues_with_next() {
        let net = MockNetwork::with_bindable(&[6881]);
        let mut harness = harness_with_download();
        let mut unit = bound_unit(&net, 6881, &mut harness);
        net.push_accept_error();
        net.push_connection("192.168.0.1:5000");

        assert_eq!(unit.execute(&mut harness.ctx()), Step::Pending);
        assert_eq!(net.state.lock().accept_calls, 2);
        assert_eq!(harness.spawned.len(), 1);
    }

    #[test]
    fn test_poll_errors_use_up_the_batch() {
        let net = MockNetwork::with_bindable(&[6881]);
        let mut harness = harness_with_download();
        let mut unit = bound_unit(&net, 6881, &mut harness);
        net.push_connection("192.168.0.1:5000");
        net.state.lock().poll_failures = ACCEPT_BATCH;

        assert_eq!(unit.execute(&mut harness.ctx()), Step::Pending);
        {
            let s = net.state.lock();
            assert_eq!(s.listener_polls, ACCEPT_BATCH);
            assert_eq!(s.accept_calls, 0);
            assert_eq!(s.closed, 0);
        }
        assert!(harness.spawned.is_empty());

        // socket stays open and the next step accepts
        assert_eq!(unit.execute(&mut harness.ctx()), Step::Pending);
        assert_eq!(net.state.lock().accept_calls, 1);
        assert_eq!(harness.spawned.len(), 1);
    }

    #[test]
    fn test_halt_finishes_without_accepting() {
        let net = MockNetwork::with_bindable(&[6881]);
        let mut harness = harness_with_download();
        let mut unit = bound_unit(&net, 6881, &mut harness);
        net.push_connection("192.168.0.1:5000");
        harness.halt.request();

        assert_eq!(unit.execute(&mut harness.ctx()), Step::Done);
        let s = net.state.lock();
        assert_eq!(s.listener_polls, 0);
        assert_eq!(s.accept_calls, 0);
        assert_eq!(s.closed, 1);
    }

    #[test]
    fn test_all_finished_finishes_without_accepting() {
        let net = MockNetwork::with_bindable(&[6881]);
        let mut harness = harness_with_download();
        let mut unit = bound_unit(&net, 6881, &mut harness);
        net.push_connection("192.168.0.1:5000");
        let id = harness.registry.iter().next().unwrap().id();
        harness
            .registry
            .get_mut(id)
            .unwrap()
            .set_state(GroupState::Complete);

        assert_eq!(unit.execute(&mut harness.ctx()), Step::Done);
        assert_eq!(net.state.lock().accept_calls, 0);
        assert!(harness.spawned.is_empty());
    }

    #[test]
    fn test_unbound_unit_is_done() {
        let net = MockNetwork::default();
        let mut unit = PeerListenUnit::new(Cuid(1), net.factory(), TIMEOUT);
        let mut harness = harness_with_download();

        assert_eq!(unit.execute(&mut harness.ctx()), Step::Done);
        assert_eq!(net.state.lock().listener_polls, 0);
    }
}
