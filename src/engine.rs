//! Download Engine - Main coordinator
//!
//! The `DownloadEngine` owns the run queue, the task registry, the
//! post-download handlers and the one peer listener. It drives work units
//! tick by tick and emits events.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::command::{Context, CuidAllocator, HaltHandle, Step, WorkUnit};
use crate::config::{BindExhaustedPolicy, EngineConfig};
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::net::{TcpTransportFactory, TransportFactory};
use crate::peer_listen::PeerListenUnit;
use crate::post_download::PostDownloadHandlers;
use crate::registry::TaskRegistry;
use crate::request_group::{GroupState, RequestGroup};
use crate::types::{Cuid, DownloadId};

/// The main download engine
pub struct DownloadEngine {
    /// Configuration
    config: EngineConfig,

    /// Creates a fresh socket per listen attempt
    transport_factory: Arc<dyn TransportFactory>,

    /// Randomness for port selection
    rng: StdRng,

    cuids: CuidAllocator,

    /// Units waiting for their next step
    ready: VecDeque<Box<dyn WorkUnit>>,

    halt: HaltHandle,

    /// All known downloads
    registry: TaskRegistry,

    /// Follow-up download producers, in priority order
    handlers: PostDownloadHandlers,

    /// Created on first request
    peer_listener: Option<Arc<Mutex<PeerListenUnit>>>,

    /// Whether the listener sits in the run queue
    listener_scheduled: bool,

    /// Event broadcaster
    event_tx: broadcast::Sender<EngineEvent>,
}

impl DownloadEngine {
    /// Create a new engine with the given configuration
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        let transport_factory: Arc<dyn TransportFactory> =
            Arc::new(TcpTransportFactory::new(config.bind_address));

        Ok(Self {
            config,
            transport_factory,
            rng: StdRng::from_os_rng(),
            cuids: CuidAllocator::new(),
            ready: VecDeque::new(),
            halt: HaltHandle::new(),
            registry: TaskRegistry::new(),
            handlers: PostDownloadHandlers::new(),
            peer_listener: None,
            listener_scheduled: false,
            event_tx,
        })
    }

    /// Replace the socket factory. An existing listener uses it on its next bind.
    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        if let Some(listener) = &self.peer_listener {
            listener.lock().set_factory(factory.clone());
        }
        self.transport_factory = factory;
        self
    }

    /// Replace the randomness source, e.g. with a seeded one
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Replace the post-download handlers
    pub fn with_handlers(mut self, handlers: PostDownloadHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Issue a correlation id
    pub fn new_cuid(&mut self) -> Cuid {
        self.cuids.next_cuid()
    }

    /// Queue a unit for the next tick
    pub fn submit(&mut self, unit: Box<dyn WorkUnit>) {
        self.ready.push_back(unit);
    }

    /// Number of units waiting to run
    pub fn pending_units(&self) -> usize {
        self.ready.len()
    }

    /// Handle that can request halt from another thread
    pub fn halt_handle(&self) -> HaltHandle {
        self.halt.clone()
    }

    pub fn request_halt(&self) {
        tracing::info!("Halt requested");
        self.halt.request();
    }

    pub fn is_halt_requested(&self) -> bool {
        self.halt.is_requested()
    }

    /// The engine's peer listener, created on first use
    pub fn peer_listener(&mut self) -> Arc<Mutex<PeerListenUnit>> {
        if let Some(listener) = &self.peer_listener {
            return listener.clone();
        }
        let listener = Arc::new(Mutex::new(
            PeerListenUnit::new(
                self.cuids.next_cuid(),
                self.transport_factory.clone(),
                self.config.peer_handshake_timeout(),
            )
            .with_max_inbound(self.config.max_inbound_peers),
        ));
        self.peer_listener = Some(listener.clone());
        listener
    }

    /// Bind the peer listener to one of the configured ports and schedule it.
    ///
    /// Returns the bound port, or `None` when running without inbound
    /// connections under [`BindExhaustedPolicy::Continue`].
    pub fn start_peer_listener(&mut self) -> Result<Option<u16>> {
        let listener = self.peer_listener();
        let bound = listener.lock().port();
        if let Some(port) = bound {
            if !self.listener_scheduled {
                self.emit(EngineEvent::ListenerBound { port });
                self.schedule_listener(listener);
            }
            return Ok(Some(port));
        }

        let mut ports = self.config.listen_ports()?;
        let candidates = ports.len();
        let bound = listener.lock().bind_port(&mut ports, &mut self.rng);

        match bound {
            Some(port) => {
                self.emit(EngineEvent::ListenerBound { port });
                self.schedule_listener(listener);
                Ok(Some(port))
            }
            None => match self.config.on_bind_exhausted {
                BindExhaustedPolicy::Abort => Err(EngineError::BindExhausted { candidates }),
                BindExhaustedPolicy::Continue => {
                    tracing::warn!(
                        "None of the {} candidate port(s) could be bound; \
                         continuing without inbound peer connections",
                        candidates
                    );
                    Ok(None)
                }
            },
        }
    }

    fn schedule_listener(&mut self, listener: Arc<Mutex<PeerListenUnit>>) {
        if !self.listener_scheduled {
            self.listener_scheduled = true;
            self.submit(Box::new(listener));
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn group(&self, id: DownloadId) -> Option<&RequestGroup> {
        self.registry.get(id)
    }

    pub fn group_mut(&mut self, id: DownloadId) -> Option<&mut RequestGroup> {
        self.registry.get_mut(id)
    }

    /// Register a download
    pub fn add(&mut self, group: RequestGroup) -> Result<DownloadId> {
        let id = self.registry.add(group)?;
        tracing::info!("Added download {}", id);
        self.emit(EngineEvent::DownloadAdded { id });
        Ok(id)
    }

    /// Mark a download complete and register whatever its output describes.
    ///
    /// Inbound connections held by the download are closed. Post-processing
    /// happens once per download; later calls return an
    /// empty list. Derived downloads whose fingerprint is already being
    /// downloaded are skipped.
    pub fn complete(&mut self, id: DownloadId) -> Result<Vec<DownloadId>> {
        let group = self
            .registry
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if group.is_post_processed() {
            return Ok(Vec::new());
        }
        group.set_state(GroupState::Complete);
        group.mark_post_processed();
        self.emit(EngineEvent::DownloadCompleted { id });

        let mut derived = Vec::new();
        if let Some(group) = self.registry.get(id) {
            self.handlers.next_request_groups(&mut derived, group)?;
        }

        let mut children = Vec::with_capacity(derived.len());
        for child in derived {
            let fingerprint = child.context().fingerprint();
            match self.add(child) {
                Ok(child_id) => children.push(child_id),
                Err(EngineError::AlreadyExists(_)) => {
                    tracing::warn!(
                        "Download {} describes {} which is already being downloaded; skipping",
                        id,
                        fingerprint.map(|f| f.to_hex()).unwrap_or_default()
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if !children.is_empty() {
            if let Some(group) = self.registry.get_mut(id) {
                group.add_followed_by(&children);
            }
            self.emit(EngineEvent::DownloadsDerived {
                parent: id,
                children: children.clone(),
            });
        }
        Ok(children)
    }

    fn is_peer_listener(&self, cuid: Cuid) -> bool {
        self.peer_listener
            .as_ref()
            .is_some_and(|listener| listener.lock().cuid() == cuid)
    }

    /// Run every unit that was ready when the tick started.
    ///
    /// Units submitted during a step are queued before the submitter is
    /// requeued. Returns the number of steps executed.
    pub fn run_once(&mut self) -> usize {
        let ready = self.ready.len();
        let mut executed = 0;

        for _ in 0..ready {
            let Some(mut unit) = self.ready.pop_front() else {
                break;
            };
            let mut spawned = Vec::new();
            let step = {
                let mut ctx = Context::new(
                    &mut self.cuids,
                    &mut spawned,
                    &self.halt,
                    &mut self.registry,
                    &self.event_tx,
                );
                unit.execute(&mut ctx)
            };
            executed += 1;

            self.ready.extend(spawned);
            if step == Step::Pending {
                self.ready.push_back(unit);
            } else {
                tracing::trace!("{} - finished", unit.cuid());
                if self.is_peer_listener(unit.cuid()) {
                    self.listener_scheduled = false;
                }
            }
        }
        executed
    }

    /// Tick until no unit is left
    pub async fn run(&mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.ready.is_empty() {
            ticker.tick().await;
            self.run_once();
        }
        tracing::debug!("Run queue drained");
    }
}
