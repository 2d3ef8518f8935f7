//! Cooperative work units
//!
//! Everything the engine schedules is a [`WorkUnit`]. A unit performs a
//! bounded amount of non-blocking work per step and reports whether it
//! wants to run again. Units never block and never run concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::events::EngineEvent;
use crate::registry::TaskRegistry;
use crate::types::Cuid;

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The unit is finished and is dropped
    Done,
    /// The unit wants to run again on a later tick
    Pending,
}

/// A schedulable unit of work
pub trait WorkUnit: Send {
    /// Correlation id used in log lines
    fn cuid(&self) -> Cuid;

    /// Run one bounded, non-blocking step
    fn execute(&mut self, ctx: &mut Context<'_>) -> Step;
}

/// Shared units (the peer listener) are scheduled through their handle
impl<T: WorkUnit> WorkUnit for Arc<Mutex<T>> {
    fn cuid(&self) -> Cuid {
        self.lock().cuid()
    }

    fn execute(&mut self, ctx: &mut Context<'_>) -> Step {
        self.lock().execute(ctx)
    }
}

/// Issues correlation ids, starting at 1
#[derive(Debug)]
pub struct CuidAllocator {
    next: u64,
}

impl CuidAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Take the next unused id
    pub fn next_cuid(&mut self) -> Cuid {
        let cuid = Cuid(self.next);
        self.next += 1;
        cuid
    }
}

impl Default for CuidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable halt flag, safe to set from a signal handler thread
#[derive(Debug, Clone, Default)]
pub struct HaltHandle(Arc<AtomicBool>);

impl HaltHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every unit to wind down at its next step
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a unit may touch while it executes
///
/// Borrows the engine's scheduling state for the duration of one step.
pub struct Context<'a> {
    cuids: &'a mut CuidAllocator,
    spawned: &'a mut Vec<Box<dyn WorkUnit>>,
    halt: &'a HaltHandle,
    registry: &'a mut TaskRegistry,
    events: &'a broadcast::Sender<EngineEvent>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        cuids: &'a mut CuidAllocator,
        spawned: &'a mut Vec<Box<dyn WorkUnit>>,
        halt: &'a HaltHandle,
        registry: &'a mut TaskRegistry,
        events: &'a broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            cuids,
            spawned,
            halt,
            registry,
            events,
        }
    }

    /// Fresh correlation id for a unit about to be created
    pub fn new_cuid(&mut self) -> Cuid {
        self.cuids.next_cuid()
    }

    /// Schedule a unit; it runs on a later tick, ahead of the submitter's
    /// own re-run
    pub fn submit(&mut self, unit: Box<dyn WorkUnit>) {
        self.spawned.push(unit);
    }

    pub fn is_halt_requested(&self) -> bool {
        self.halt.is_requested()
    }

    pub fn registry(&self) -> &TaskRegistry {
        &*self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TaskRegistry {
        &mut *self.registry
    }

    /// Broadcast an event; having no subscribers is not an error
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

/// Owned scheduling state for driving units by hand in unit tests
#[cfg(test)]
pub(crate) struct TestHarness {
    pub cuids: CuidAllocator,
    pub spawned: Vec<Box<dyn WorkUnit>>,
    pub halt: HaltHandle,
    pub registry: TaskRegistry,
    pub events: broadcast::Sender<EngineEvent>,
}

#[cfg(test)]
impl TestHarness {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            cuids: CuidAllocator::new(),
            spawned: Vec::new(),
            halt: HaltHandle::new(),
            registry: TaskRegistry::new(),
            events,
        }
    }

    pub fn ctx(&mut self) -> Context<'_> {
        Context::new(
            &mut self.cuids,
            &mut self.spawned,
            &self.halt,
            &mut self.registry,
            &self.events,
        )
    }
}
