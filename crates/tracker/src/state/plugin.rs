use phasetrack_common::Entity;

use crate::cause::{CauseStack, CauseValue, SpawnType};
use crate::context::{PhaseContext, Source};
use crate::error::PhaseError;
use crate::event::DropKind;
use crate::state::{ModifierChain, PhaseKind, PhaseState, SpawnDecision};
use crate::unwind::Unwinder;

fn push_plugin(causes: &mut CauseStack, ctx: &PhaseContext) -> Result<(), PhaseError> {
    if let Some(Source::Plugin(name)) = ctx.source_ref() {
        causes.push_cause(CauseValue::Plugin(name.clone()));
    }
    Ok(())
}

fn push_async_marker(causes: &mut CauseStack, _ctx: &PhaseContext) -> Result<(), PhaseError> {
    causes.push_cause(CauseValue::Text("async-resync".to_string()));
    Ok(())
}

/// Blocks, then everything else as plugin spawns.
fn plugin_unwind(u: &mut Unwinder<'_, '_>) -> Result<(), PhaseError> {
    u.process_block_captures()?;
    if let Some(entities) = u.context_mut().take_entities() {
        u.spawn_as(SpawnType::Plugin, entities)?;
    }
    u.drop_captured_items(DropKind::Custom)?;
    u.drop_block_items()?;
    u.spawn_per_block_entities()?;
    Ok(())
}

/// A plugin task run on the simulation thread.
#[derive(Debug)]
pub struct ScheduledTaskState {
    modifiers: ModifierChain,
}

impl ScheduledTaskState {
    pub fn new() -> Self {
        Self {
            modifiers: ModifierChain::root().then("plugin", push_plugin),
        }
    }
}

impl PhaseState for ScheduledTaskState {
    fn kind(&self) -> PhaseKind {
        PhaseKind::ScheduledTask
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(PhaseKind::ScheduledTask)
            .add_captures()
            .add_block_drop_captures()
    }

    fn frame_modifiers(&self) -> &ModifierChain {
        &self.modifiers
    }

    fn does_drop_event_tracking(&self, _ctx: &PhaseContext) -> bool {
        true
    }

    fn does_capture_entity_spawns(&self) -> bool {
        true
    }

    fn does_capture_entity_drops(&self, _ctx: &PhaseContext) -> bool {
        true
    }

    fn tracks_block_specific_drops(&self, _ctx: &PhaseContext) -> bool {
        true
    }

    fn unwind(&self, u: &mut Unwinder<'_, '_>) -> Result<(), PhaseError> {
        plugin_unwind(u)
    }
}

/// Work handed over from other threads, replayed on the simulation thread.
#[derive(Debug)]
pub struct AsyncResyncState {
    modifiers: ModifierChain,
}

impl AsyncResyncState {
    pub fn new() -> Self {
        Self {
            modifiers: ModifierChain::root().then("async-resync", push_async_marker),
        }
    }
}

impl PhaseState for AsyncResyncState {
    fn kind(&self) -> PhaseKind {
        PhaseKind::AsyncResync
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(PhaseKind::AsyncResync).add_captures()
    }

    fn frame_modifiers(&self) -> &ModifierChain {
        &self.modifiers
    }

    fn does_drop_event_tracking(&self, _ctx: &PhaseContext) -> bool {
        true
    }

    fn does_capture_entity_drops(&self, _ctx: &PhaseContext) -> bool {
        true
    }

    fn is_not_reentrant(&self) -> bool {
        false
    }

    fn spawn_policy(&self, _ctx: &PhaseContext, _entity: &Entity) -> SpawnDecision {
        SpawnDecision::Capture
    }

    fn unwind(&self, u: &mut Unwinder<'_, '_>) -> Result<(), PhaseError> {
        plugin_unwind(u)
    }
}
