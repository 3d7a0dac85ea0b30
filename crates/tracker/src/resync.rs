//! Hand-off of work produced on other threads back onto the simulation thread.

use crossbeam_channel::{Receiver, Sender, TrySendError};

use phasetrack_common::Entity;
use phasetrack_kernel::Mutation;

use crate::context::{CommandSource, Source};
use crate::error::PhaseError;
use crate::state::PhaseKind;
use crate::tracker::{Host, PhaseTracker};

/// Work submitted from another thread.
#[derive(Debug, Clone, PartialEq)]
pub enum OffThreadRequest {
    Spawn(Entity),
    Command {
        source: CommandSource,
        mutations: Vec<Mutation>,
    },
}

/// Cloneable, `Send` submission handle.
#[derive(Debug, Clone)]
pub struct ResyncHandle {
    sender: Sender<OffThreadRequest>,
}

impl ResyncHandle {
    /// Queue a request. Returns false once the queue is gone or full.
    pub fn submit(&self, request: OffThreadRequest) -> bool {
        match self.sender.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("resync queue full, dropping off-thread request");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn spawn(&self, entity: Entity) -> bool {
        self.submit(OffThreadRequest::Spawn(entity))
    }

    pub fn command(&self, source: CommandSource, mutations: Vec<Mutation>) -> bool {
        self.submit(OffThreadRequest::Command { source, mutations })
    }
}

/// Drained once per tick on the simulation thread.
#[derive(Debug)]
pub struct ResyncQueue {
    sender: Sender<OffThreadRequest>,
    receiver: Receiver<OffThreadRequest>,
}

impl Default for ResyncQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Counts from one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub spawns: usize,
    pub commands: usize,
    pub ignored: usize,
}

impl ResyncQueue {
    pub fn unbounded() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self { sender, receiver }
    }

    pub fn handle(&self) -> ResyncHandle {
        ResyncHandle {
            sender: self.sender.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Replay everything queued so far inside one async-resync phase.
    /// An empty queue enters no phase at all.
    pub fn drain(
        &self,
        tracker: &mut PhaseTracker,
        host: &mut Host<'_>,
    ) -> Result<DrainReport, PhaseError> {
        let requests: Vec<OffThreadRequest> = self.receiver.try_iter().collect();
        let mut report = DrainReport::default();
        if requests.is_empty() {
            return Ok(report);
        }
        let _span = tracing::debug_span!("resync", requests = requests.len()).entered();
        let capture_spawns = tracker.config().capture_async_spawning_entities;
        let resync_commands = tracker.config().resync_commands_from_async;

        let ctx = tracker.create_context(PhaseKind::AsyncResync);
        tracker.scope(host, ctx, |tracker, host| {
            for request in requests {
                match request {
                    OffThreadRequest::Spawn(entity) if capture_spawns => {
                        tracker.spawn_entity(host, entity)?;
                        report.spawns += 1;
                    }
                    OffThreadRequest::Command { source, mutations } if resync_commands => {
                        let ctx = tracker
                            .create_context(PhaseKind::Command)
                            .source(Source::Command(source));
                        tracker.scope(host, ctx, |tracker, host| {
                            mutations
                                .into_iter()
                                .try_for_each(|m| tracker.apply_mutation(host, m))
                        })?;
                        report.commands += 1;
                    }
                    ignored => {
                        tracing::warn!(request = ?ignored, "ignoring off-thread request");
                        report.ignored += 1;
                    }
                }
            }
            Ok(report)
        })
    }
}
