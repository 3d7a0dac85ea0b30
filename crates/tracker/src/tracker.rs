//! The phase stack and the mutation entry points that consult it.

use std::cell::Cell;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use phasetrack_common::{
    BlockEntity, BlockPos, BlockState, ChangeFlag, Entity, EntityId, ItemDrop,
};
use phasetrack_kernel::{Mutation, WorldAccess};

use crate::cause::{CauseStack, CauseValue};
use crate::config::TrackerConfig;
use crate::context::{CaptureKind, PhaseContext};
use crate::diagnostics::{Diagnostics, PhaseDump};
use crate::error::PhaseError;
use crate::event::{DropKind, EventBus};
use crate::state::{DropDecision, PhaseKind, PhaseState, SpawnDecision};
use crate::transaction::BlockLog;
use crate::unwind::Unwinder;

/// The collaborators a tracker works against.
pub struct Host<'w> {
    pub world: &'w mut dyn WorldAccess,
    pub events: &'w mut dyn EventBus,
    pub causes: &'w mut CauseStack,
}

impl<'w> Host<'w> {
    pub fn new(
        world: &'w mut dyn WorldAccess,
        events: &'w mut dyn EventBus,
        causes: &'w mut CauseStack,
    ) -> Self {
        Self {
            world,
            events,
            causes,
        }
    }
}

/// One entry of the phase stack.
#[derive(Debug)]
pub struct PhaseFrame {
    pub(crate) kind: PhaseKind,
    pub(crate) context: PhaseContext,
    serial: u64,
}

impl PhaseFrame {
    pub fn kind(&self) -> PhaseKind {
        self.kind
    }

    pub fn state(&self) -> &'static dyn PhaseState {
        self.kind.state()
    }

    pub fn context(&self) -> &PhaseContext {
        &self.context
    }
}

/// Proof of a push. Consumed by [`PhaseTracker::pop`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pushed phase must be popped"]
pub struct PhaseHandle {
    kind: PhaseKind,
    serial: u64,
}

impl PhaseHandle {
    pub fn kind(&self) -> PhaseKind {
        self.kind
    }
}

/// What happened to a block write routed through the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Buffered in the active phase.
    Captured,
    /// Written straight through with no event.
    Applied,
    /// Written after a single-change event accepted it.
    Tracked,
    /// A single-change event rejected it.
    Rejected,
}

/// Stack of active phases.
///
/// Confined to the thread that owns the simulation; work from other threads
/// goes through [`ResyncQueue`](crate::resync::ResyncQueue).
#[derive(Debug)]
pub struct PhaseTracker {
    pub(crate) frames: Vec<PhaseFrame>,
    config: TrackerConfig,
    pub(crate) diagnostics: Diagnostics,
    next_serial: u64,
    direct: Rc<DirectDepth>,
    _main_thread: PhantomData<*const ()>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl PhaseTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            frames: Vec::new(),
            config: config.sanitized(),
            diagnostics: Diagnostics::default(),
            next_serial: 0,
            direct: Rc::default(),
            _main_thread: PhantomData,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Active frames, outermost first.
    pub fn frames(&self) -> &[PhaseFrame] {
        &self.frames
    }

    /// Top of the stack.
    pub fn current(&self) -> Option<&PhaseFrame> {
        self.frames.last()
    }

    pub fn current_context_mut(&mut self) -> Option<&mut PhaseContext> {
        self.frames.last_mut().map(|f| &mut f.context)
    }

    /// A fresh context for `kind` with its capture buffers declared.
    pub fn create_context(&self, kind: PhaseKind) -> PhaseContext {
        kind.state().create_context()
    }

    /// Snapshot of the stack and counters for logging.
    pub fn dump(&self, title: &str) -> PhaseDump {
        PhaseDump::capture(self, title, None)
    }

    // --- stack ---

    /// Enter a phase. Re-entering a non-reentrant phase is reported, never refused.
    pub fn push(&mut self, host: &mut Host<'_>, mut context: PhaseContext) -> PhaseHandle {
        let kind = context.kind();
        let state = kind.state();
        if state.is_not_reentrant() && self.frames.iter().any(|f| f.kind == kind) {
            self.report_runaway(kind);
        }
        if self.config.generate_stacktrace_per_phase {
            context.capture_backtrace();
        }

        let frame = host.causes.push_frame();
        if let Err(e) = state.frame_modifiers().apply(host.causes, &context) {
            self.report_failure(kind, &e);
        }
        context.set_cause_frame(frame);

        let serial = self.next_serial;
        self.next_serial += 1;
        self.frames.push(PhaseFrame {
            kind,
            context,
            serial,
        });
        self.diagnostics.phases_entered += 1;
        self.diagnostics.peak_depth = self.diagnostics.peak_depth.max(self.frames.len());
        tracing::debug!(phase = kind.name(), depth = self.frames.len(), "entered phase");
        PhaseHandle { kind, serial }
    }

    /// Leave a phase: unwind its captures exactly once, then drop the frame.
    ///
    /// Popping a frame that is not on top unwinds everything above it first.
    pub fn pop(&mut self, host: &mut Host<'_>, handle: PhaseHandle) {
        let Some(index) = self.frames.iter().position(|f| f.serial == handle.serial) else {
            self.diagnostics.mismatched_pops += 1;
            let dump = PhaseDump::capture(self, "Popping a phase that is no longer active", Some(handle.kind));
            tracing::error!(phase = handle.kind.name(), "{dump}");
            return;
        };
        if index + 1 != self.frames.len() {
            self.diagnostics.mismatched_pops += 1;
            let dump = PhaseDump::capture(self, "Completing incorrect phase", Some(handle.kind));
            tracing::warn!(
                expected = handle.kind.name(),
                depth = self.frames.len(),
                "{dump}"
            );
        }
        while self.frames.len() > index {
            self.retire_top(host);
        }
    }

    /// Run `body` inside a phase. The phase is popped even if `body` panics.
    pub fn scope<'w, R>(
        &mut self,
        host: &mut Host<'w>,
        context: PhaseContext,
        body: impl FnOnce(&mut Self, &mut Host<'w>) -> R,
    ) -> R {
        let handle = self.push(host, context);
        let result = panic::catch_unwind(AssertUnwindSafe(|| body(self, host)));
        self.pop(host, handle);
        match result {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    fn retire_top(&mut self, host: &mut Host<'_>) {
        let Some(index) = self.frames.len().checked_sub(1) else {
            return;
        };
        let kind = self.frames[index].kind;
        let state = kind.state();

        if state.requires_post() {
            let _span = tracing::debug_span!("unwind", phase = kind.name(), depth = index).entered();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut unwinder = Unwinder::new(self, host, index);
                state.unwind(&mut unwinder)
            }));
            let result = match outcome {
                Ok(result) => result,
                Err(payload) => Err(PhaseError::Panicked(panic_message(payload.as_ref()))),
            };
            if let Err(e) = result {
                self.report_failure(kind, &e);
            }
        }

        // An unwind that pushed without popping leaves frames above ours.
        while self.frames.len() > index + 1 {
            tracing::warn!(phase = kind.name(), "unwind left a nested phase open");
            self.retire_top(host);
        }

        if let Some(mut frame) = self.frames.pop() {
            frame.context.mark_completed();
            if frame.context.has_pending_captures() {
                tracing::debug!(phase = kind.name(), "discarding unconsumed captures");
            }
            if let Some(cause_frame) = frame.context.take_cause_frame() {
                if let Err(e) = host.causes.pop_frame(cause_frame) {
                    tracing::warn!(phase = kind.name(), error = %e, "cause stack was unbalanced");
                }
            }
            tracing::debug!(phase = kind.name(), depth = index, "exited phase");
        }
    }

    // --- reporting ---

    fn report_runaway(&mut self, kind: PhaseKind) {
        self.diagnostics.runaway_phases += 1;
        if self.config.verbose || self.diagnostics.printed_runaways < self.config.max_runaway_count {
            self.diagnostics.printed_runaways += 1;
            let dump = PhaseDump::capture(self, "Switching phase from itself", Some(kind));
            tracing::warn!(phase = kind.name(), "{dump}");
        }
    }

    pub(crate) fn report_failure(&mut self, kind: PhaseKind, error: &PhaseError) {
        self.diagnostics.unwind_failures += 1;
        if error.is_integration_defect() {
            self.diagnostics.missing_context += 1;
        }
        if self.config.verbose_errors || error.is_integration_defect() {
            let title = format!("Exception while unwinding {kind}");
            let dump = PhaseDump::capture(self, &title, Some(kind)).with_detail(error.to_string());
            tracing::error!(phase = kind.name(), error = %error, "{dump}");
        } else {
            tracing::error!(phase = kind.name(), error = %error, "phase unwind failed");
        }
    }

    pub(crate) fn report_depth_overflow(&mut self, kind: Option<PhaseKind>) {
        self.diagnostics.depth_overflows += 1;
        let title = format!(
            "Exceeded maximum block processing depth ({})",
            self.config.max_block_processing_depth
        );
        let dump = PhaseDump::capture(self, &title, kind);
        tracing::error!(
            max_depth = self.config.max_block_processing_depth,
            "{dump}"
        );
    }

    // --- mutation entry points ---

    /// Value at `pos` as the current phase sees it: a pending captured value
    /// wins over the world.
    pub fn block_state(&self, host: &Host<'_>, pos: BlockPos) -> BlockState {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.context.pending_block(pos))
            .map_or_else(|| host.world.block(pos), |tx| tx.new.state)
    }

    pub fn block_entity(&self, host: &Host<'_>, pos: BlockPos) -> Option<BlockEntity> {
        match self.frames.iter().rev().find_map(|f| f.context.pending_block(pos)) {
            Some(tx) => tx.new.block_entity.clone(),
            None => host.world.block_entity(pos),
        }
    }

    /// Write a block: captured, sent through a single-change event, or
    /// applied directly, depending on the active phase.
    pub fn set_block(
        &mut self,
        host: &mut Host<'_>,
        pos: BlockPos,
        state: BlockState,
        flags: ChangeFlag,
    ) -> Result<BlockOutcome, PhaseError> {
        let Some(top) = self.frames.last() else {
            self.apply_direct(host, pos, state, flags)?;
            return Ok(BlockOutcome::Applied);
        };
        let phase = top.kind.state();
        let capturing =
            phase.does_bulk_block_capture(&top.context) && top.context.declares(CaptureKind::Blocks);
        let tracking = phase.does_block_event_tracking(&top.context);

        if !capturing {
            if tracking {
                return self.apply_tracked(host, pos, state, flags);
            }
            self.apply_direct(host, pos, state, flags)?;
            return Ok(BlockOutcome::Applied);
        }

        let current = self.block_state(host, pos);
        if !phase.should_capture_block_change_or_skip(&top.context, pos, current, state, flags) {
            self.apply_direct(host, pos, state, flags)?;
            return Ok(BlockOutcome::Applied);
        }

        let original = host.world.snapshot(pos);
        if let Some(frame) = self.frames.last_mut() {
            frame.context.block_supplier()?.get().capture(original, state, flags);
        }
        Ok(BlockOutcome::Captured)
    }

    /// Write the secondary object at `pos`. Linked to the pending change at
    /// that position if there is one.
    pub fn set_block_entity(
        &mut self,
        host: &mut Host<'_>,
        pos: BlockPos,
        block_entity: Option<BlockEntity>,
    ) -> Result<(), PhaseError> {
        if let Some(frame) = self.frames.last_mut() {
            if frame.context.pending_block(pos).is_some() {
                frame.context.block_supplier()?.get().link_block_entity(pos, block_entity);
                return Ok(());
            }
        }
        host.world.set_block_entity(pos, block_entity)?;
        Ok(())
    }

    /// Add an entity, as the active phase allows. Returns whether it was
    /// spawned or captured.
    pub fn spawn_entity(&mut self, host: &mut Host<'_>, entity: Entity) -> Result<bool, PhaseError> {
        let Some(frame) = self.frames.last_mut() else {
            host.world.spawn_entity(entity)?;
            return Ok(true);
        };
        match frame.kind.state().spawn_policy(&frame.context, &entity) {
            SpawnDecision::Capture => {
                frame.context.entity_supplier()?.get().push(entity);
                Ok(true)
            }
            SpawnDecision::CaptureAt(pos) => {
                frame.context.per_block_entity_spawn_supplier()?.get().put(pos, entity);
                Ok(true)
            }
            SpawnDecision::Immediate(spawn_type) => {
                let index = self.frames.len() - 1;
                let spawned =
                    Unwinder::new(self, host, index).spawn_entities(spawn_type, vec![entity])?;
                Ok(spawned > 0)
            }
            SpawnDecision::Direct => {
                host.world.spawn_entity(entity)?;
                Ok(true)
            }
            SpawnDecision::Deny => {
                tracing::debug!(phase = frame.kind.name(), entity = %entity.id, "spawn denied");
                Ok(false)
            }
        }
    }

    /// Drop an item, optionally on behalf of an entity.
    pub fn drop_item(
        &mut self,
        host: &mut Host<'_>,
        source: Option<EntityId>,
        drop: ItemDrop,
    ) -> Result<bool, PhaseError> {
        let Some(frame) = self.frames.last_mut() else {
            host.world.spawn_entity(drop.create())?;
            return Ok(true);
        };
        let state = frame.kind.state();
        let pre_merge = !state.ignores_item_pre_merging();
        match (state.drop_policy(&frame.context), source) {
            (DropDecision::PerEntity, Some(id)) => {
                if pre_merge {
                    frame.context.per_entity_item_drop_supplier()?.get().put(id, drop);
                } else {
                    frame.context.per_entity_item_entity_supplier()?.get().put(id, drop.create());
                }
                Ok(true)
            }
            (DropDecision::PerEntity | DropDecision::General, _) => {
                if pre_merge {
                    frame.context.item_drop_supplier()?.get().push(drop);
                } else {
                    frame.context.item_supplier()?.get().push(drop.create());
                }
                Ok(true)
            }
            (DropDecision::Event, _) => {
                let index = self.frames.len() - 1;
                let mut unwinder = Unwinder::new(self, host, index);
                let dropped = unwinder.with_cause_frame(|u| {
                    if let Some(id) = source {
                        u.causes().push_cause(CauseValue::Entity(id));
                    }
                    u.drop_items(DropKind::Custom, vec![drop.create()])
                })?;
                Ok(dropped > 0)
            }
            (DropDecision::Direct, _) => {
                host.world.spawn_entity(drop.create())?;
                Ok(true)
            }
        }
    }

    /// Items released by breaking `pos`. Kept against the position when the
    /// active phase tracks block-specific drops.
    pub fn capture_block_drop(
        &mut self,
        host: &mut Host<'_>,
        pos: BlockPos,
        drop: ItemDrop,
    ) -> Result<bool, PhaseError> {
        if let Some(frame) = self.frames.last_mut() {
            if frame.kind.state().tracks_block_specific_drops(&frame.context)
                && frame.context.declares(CaptureKind::BlockItemDrops)
            {
                frame.context.block_item_drop_supplier()?.get().put(pos, drop.create());
                return Ok(true);
            }
        }
        self.drop_item(host, None, drop)
    }

    /// Route a follow-up mutation requested by the simulation.
    pub fn apply_mutation(&mut self, host: &mut Host<'_>, mutation: Mutation) -> Result<(), PhaseError> {
        match mutation {
            Mutation::SetBlock { pos, state, flags } => self.set_block(host, pos, state, flags).map(|_| ()),
            Mutation::SetBlockEntity { pos, block_entity } => {
                self.set_block_entity(host, pos, block_entity)
            }
            Mutation::SpawnEntity(entity) => self.spawn_entity(host, entity).map(|_| ()),
        }
    }

    fn over_direct_limit(&mut self) -> bool {
        if self.direct.depth.get() < self.config.max_block_processing_depth {
            return false;
        }
        if !self.direct.overflowed.replace(true) {
            let kind = self.frames.last().map(|f| f.kind);
            self.report_depth_overflow(kind);
        }
        true
    }

    fn enter_direct(&self) -> DirectGuard {
        self.direct.depth.set(self.direct.depth.get() + 1);
        DirectGuard(Rc::clone(&self.direct))
    }

    /// Uncaptured write. The world still reacts, bounded by the depth limit.
    fn apply_direct(
        &mut self,
        host: &mut Host<'_>,
        pos: BlockPos,
        state: BlockState,
        flags: ChangeFlag,
    ) -> Result<(), PhaseError> {
        let original = host.world.snapshot(pos);
        host.world.set_block(pos, state, flags)?;
        if self.over_direct_limit() {
            return Ok(());
        }
        let new = host.world.snapshot(pos);
        let follow_ups = host.world.react_to_change(&original, &new, flags)?;
        let _guard = self.enter_direct();
        follow_ups
            .into_iter()
            .try_for_each(|mutation| self.apply_mutation(host, mutation))
    }

    /// Uncaptured write that still goes through a one-change event.
    fn apply_tracked(
        &mut self,
        host: &mut Host<'_>,
        pos: BlockPos,
        state: BlockState,
        flags: ChangeFlag,
    ) -> Result<BlockOutcome, PhaseError> {
        if self.over_direct_limit() {
            host.world.set_block(pos, state, flags)?;
            return Ok(BlockOutcome::Applied);
        }
        let mut log = BlockLog::new();
        log.capture(host.world.snapshot(pos), state, flags);
        let index = self.frames.len() - 1;
        let _guard = self.enter_direct();
        let accepted = Unwinder::immediate(self, host, index).replay(log, 0)?;
        Ok(if accepted {
            BlockOutcome::Tracked
        } else {
            BlockOutcome::Rejected
        })
    }
}

/// Nesting of the uncaptured write path, shared with the guards that unwind it
/// so a panicking world reaction cannot leave it raised.
#[derive(Debug, Default)]
struct DirectDepth {
    depth: Cell<usize>,
    overflowed: Cell<bool>,
}

struct DirectGuard(Rc<DirectDepth>);

impl Drop for DirectGuard {
    fn drop(&mut self) {
        let depth = self.0.depth.get().saturating_sub(1);
        self.0.depth.set(depth);
        if depth == 0 {
            self.0.overflowed.set(false);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
