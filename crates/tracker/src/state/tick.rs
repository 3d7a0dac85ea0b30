use phasetrack_common::Entity;

use crate::cause::{CauseStack, CauseValue};
use crate::context::PhaseContext;
use crate::error::PhaseError;
use crate::event::DropKind;
use crate::state::{ModifierChain, PhaseKind, PhaseState, SpawnDecision};
use crate::unwind::{SpawnCategory, Unwinder};

fn push_ticking_entity(causes: &mut CauseStack, ctx: &PhaseContext) -> Result<(), PhaseError> {
    if let Some(entity) = ctx.source_entity() {
        causes.push_cause(CauseValue::Entity(entity.id));
    }
    Ok(())
}

fn push_ticking_block(causes: &mut CauseStack, ctx: &PhaseContext) -> Result<(), PhaseError> {
    if let Some(block) = ctx.source_block() {
        causes.push_cause(CauseValue::Block(block.clone()));
    }
    Ok(())
}

/// One entity's update.
#[derive(Debug)]
pub struct EntityTickState {
    modifiers: ModifierChain,
}

impl EntityTickState {
    pub fn chain() -> ModifierChain {
        ModifierChain::root().then("ticking-entity", push_ticking_entity)
    }

    pub fn new() -> Self {
        Self {
            modifiers: Self::chain(),
        }
    }
}

impl PhaseState for EntityTickState {
    fn kind(&self) -> PhaseKind {
        PhaseKind::EntityTick
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(PhaseKind::EntityTick)
            .add_captures()
            .add_block_drop_captures()
            .add_entity_drop_captures()
    }

    fn frame_modifiers(&self) -> &ModifierChain {
        &self.modifiers
    }

    fn does_drop_event_tracking(&self, _ctx: &PhaseContext) -> bool {
        true
    }

    fn is_ticking(&self) -> bool {
        true
    }

    fn tracks_entity_deaths(&self) -> bool {
        true
    }

    fn does_capture_entity_drops(&self, ctx: &PhaseContext) -> bool {
        ctx.allows_bulk_entity_captures()
    }

    fn tracks_entity_specific_drops(&self) -> bool {
        true
    }

    fn tracks_block_specific_drops(&self, ctx: &PhaseContext) -> bool {
        ctx.allows_bulk_block_captures()
    }

    fn spawn_policy(&self, ctx: &PhaseContext, entity: &Entity) -> SpawnDecision {
        if !ctx.allows_bulk_entity_captures() {
            let category = SpawnCategory::classify(entity, ctx.source_entity());
            return SpawnDecision::Immediate(category.spawn_type());
        }
        match ctx.breaking_pos() {
            Some(pos) => SpawnDecision::CaptureAt(pos),
            None => SpawnDecision::Capture,
        }
    }

    fn unwind(&self, u: &mut Unwinder<'_, '_>) -> Result<(), PhaseError> {
        let source = u.context().require_entity()?.clone();
        if !u.process_block_captures()? {
            tracing::debug!(entity = %source.id, "block changes rejected during entity tick");
        }
        if let Some(entities) = u.context_mut().take_entities() {
            u.spawn_classified(entities, Some(&source))?;
        }
        u.drop_captured_items(DropKind::Custom)?;
        u.drop_block_items()?;
        u.spawn_per_block_entities()?;
        u.drop_per_entity_items()?;
        Ok(())
    }
}

/// Entity update that must not be captured; everything passes straight through.
#[derive(Debug)]
pub struct NoCaptureEntityTickState {
    modifiers: ModifierChain,
}

impl NoCaptureEntityTickState {
    pub fn new() -> Self {
        Self {
            modifiers: EntityTickState::chain(),
        }
    }
}

impl PhaseState for NoCaptureEntityTickState {
    fn kind(&self) -> PhaseKind {
        PhaseKind::NoCaptureEntityTick
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(PhaseKind::NoCaptureEntityTick)
            .bulk_block_captures(false)
            .bulk_entity_captures(false)
            .block_events(false)
    }

    fn frame_modifiers(&self) -> &ModifierChain {
        &self.modifiers
    }

    fn does_drop_event_tracking(&self, _ctx: &PhaseContext) -> bool {
        false
    }

    fn is_ticking(&self) -> bool {
        true
    }

    fn requires_post(&self) -> bool {
        false
    }

    fn spawn_policy(&self, _ctx: &PhaseContext, _entity: &Entity) -> SpawnDecision {
        SpawnDecision::Direct
    }

    fn unwind(&self, _u: &mut Unwinder<'_, '_>) -> Result<(), PhaseError> {
        Ok(())
    }
}

/// A scheduled or random update of one position.
#[derive(Debug)]
pub struct BlockTickState {
    modifiers: ModifierChain,
}

impl BlockTickState {
    pub fn new() -> Self {
        Self {
            modifiers: ModifierChain::root().then("ticking-block", push_ticking_block),
        }
    }
}

impl PhaseState for BlockTickState {
    fn kind(&self) -> PhaseKind {
        PhaseKind::BlockTick
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(PhaseKind::BlockTick)
            .add_captures()
            .add_block_drop_captures()
    }

    fn frame_modifiers(&self) -> &ModifierChain {
        &self.modifiers
    }

    fn does_drop_event_tracking(&self, _ctx: &PhaseContext) -> bool {
        true
    }

    fn is_ticking(&self) -> bool {
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
        u.context().require_block()?;
        u.standard_unwind()
    }
}
