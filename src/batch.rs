//! Mutation batcher: per-turn coalescing of mutation records.
//!
//! The batcher is a two-state machine (`Idle`, `PendingFlush`). Recording a
//! mutation while `Idle` schedules a flush task that runs once the current
//! synchronous turn yields; every further record in the same turn lands in
//! the same pending list. The flush drains node-creation descriptors, the
//! string table snapshot and the accumulated mutation buffers into one
//! envelope and transfers it over the channel. This is the system's core
//! coalescing guarantee: at most one envelope per turn, however many
//! `record` calls occurred.

use std::sync::{Arc, Mutex};

use crate::channel::ChannelSender;
use crate::codec::{self, NodeHandle, StringTable};
use crate::error::Result;
use crate::protocol::{Envelope, EnvelopeKind, Mutation, NodeDescriptor, Phase};

/// String-table index meaning "no string" in a node descriptor.
///
/// Never issued as a real index: the table errors out before reaching it.
pub const NO_STRING_INDEX: u16 = u16::MAX;

/// Batcher configuration.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Per-channel transfer-allowed flag; recording is dropped while false.
    pub allow_transfer: bool,
    /// Lifecycle phase to start in. The producer side starts `Initializing`
    /// and walks the full lifecycle; a responder side that only sends
    /// results/events starts directly in `Mutating`.
    pub initial_phase: Phase,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            allow_transfer: true,
            initial_phase: Phase::Initializing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushState {
    Idle,
    PendingFlush,
}

struct BatchState {
    phase: Phase,
    allow_transfer: bool,
    flush_state: FlushState,
    strings: StringTable,
    node_creations: Vec<NodeDescriptor>,
    mutations: Vec<bytes::Bytes>,
}

impl BatchState {
    fn transfer_allowed(&self) -> bool {
        self.phase > Phase::Initializing && self.allow_transfer
    }
}

/// Producer-side mutation batcher. Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct MutationBatcher {
    state: Arc<Mutex<BatchState>>,
    tx: ChannelSender,
}

impl MutationBatcher {
    /// Create a batcher sending envelopes over `tx`.
    pub fn new(tx: ChannelSender, config: BatcherConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BatchState {
                phase: config.initial_phase,
                allow_transfer: config.allow_transfer,
                flush_state: FlushState::Idle,
                strings: StringTable::new(),
                node_creations: Vec::new(),
                mutations: Vec::new(),
            })),
            tx,
        }
    }

    /// Record a mutation for the next flush.
    ///
    /// Dropped silently while transfer is not allowed (phase still
    /// `Initializing` or the per-channel flag is off). Schedules a flush if
    /// none is pending.
    pub fn record(&self, mutation: &Mutation) -> Result<()> {
        let mut state = self.state.lock().expect("batcher state poisoned");
        if !state.transfer_allowed() {
            tracing::trace!(opcode = ?mutation.opcode(), "dropping record, transfer not allowed");
            return Ok(());
        }

        let buf = codec::encode(&mutation.to_values(), &mut state.strings)?;
        state.mutations.push(buf);
        self.schedule_flush(&mut state);
        Ok(())
    }

    /// Queue a node-creation descriptor for the next flush, interning its
    /// strings. Subject to the same transfer guard as `record`.
    pub fn queue_node_creation(
        &self,
        handle: NodeHandle,
        kind: u16,
        name: &str,
        namespace: Option<&str>,
        text: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("batcher state poisoned");
        if !state.transfer_allowed() {
            tracing::trace!(handle = handle.0, "dropping node creation, transfer not allowed");
            return Ok(());
        }

        let name = state.strings.intern(name)?;
        let namespace = match namespace {
            Some(ns) => state.strings.intern(ns)?,
            None => NO_STRING_INDEX,
        };
        let text = match text {
            Some(t) => state.strings.intern(t)?,
            None => NO_STRING_INDEX,
        };
        state.node_creations.push(NodeDescriptor {
            handle,
            kind,
            name,
            namespace,
            text,
        });
        self.schedule_flush(&mut state);
        Ok(())
    }

    fn schedule_flush(&self, state: &mut BatchState) {
        if state.flush_state == FlushState::PendingFlush {
            return;
        }
        state.flush_state = FlushState::PendingFlush;

        let batcher = self.clone();
        // Runs after the current synchronous turn yields; everything
        // recorded in this turn rides the same envelope.
        tokio::spawn(async move {
            batcher.flush_now();
        });
    }

    /// Perform the pending flush immediately.
    ///
    /// Normally driven by the scheduled task; exposed so shutdown paths can
    /// force out the tail of a batch.
    pub fn flush_now(&self) {
        let mut state = self.state.lock().expect("batcher state poisoned");
        if state.flush_state != FlushState::PendingFlush {
            return;
        }
        state.flush_state = FlushState::Idle;

        if state.mutations.is_empty() && state.node_creations.is_empty() {
            return;
        }

        let kind = match state.phase {
            Phase::Hydrating => EnvelopeKind::Hydrate,
            _ => EnvelopeKind::Mutate,
        };
        let node_creations = NodeDescriptor::pack(&state.node_creations);
        state.node_creations.clear();
        let strings = state.strings.drain();
        let mutations = std::mem::take(&mut state.mutations);

        if state.phase == Phase::Hydrating {
            state.phase = state.phase.advance();
        }

        // Send while still holding the state lock: a concurrent flush task
        // cannot drain later records and get its envelope onto the channel
        // first, so envelopes leave in drain order. The unbounded send
        // never blocks.
        let envelope = Envelope {
            kind,
            node_creations,
            strings,
            mutations,
        };
        if let Err(e) = self.tx.send(envelope) {
            tracing::warn!("flush dropped, {}", e);
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.state.lock().expect("batcher state poisoned").phase
    }

    /// Mark initialization complete: the next flush is the hydration
    /// envelope. No-op once past `Initializing`.
    pub fn begin_hydration(&self) {
        let mut state = self.state.lock().expect("batcher state poisoned");
        if state.phase == Phase::Initializing {
            state.phase = Phase::Hydrating;
        }
    }

    /// Toggle the per-channel transfer-allowed flag.
    pub fn set_allow_transfer(&self, allow: bool) {
        self.state
            .lock()
            .expect("batcher state poisoned")
            .allow_transfer = allow;
    }

    /// Intern a string into the shared table (for callers building packed
    /// structures outside the record path).
    pub fn intern(&self, s: &str) -> Result<u16> {
        self.state
            .lock()
            .expect("batcher state poisoned")
            .strings
            .intern(s)
    }
}
