use crate::cause::{CauseStack, CauseValue, ContextKey, SpawnType};
use crate::context::PhaseContext;
use crate::error::PhaseError;
use crate::event::DropKind;
use crate::state::{ModifierChain, PhaseKind, PhaseState};
use crate::unwind::Unwinder;

fn push_breaking_block(causes: &mut CauseStack, ctx: &PhaseContext) -> Result<(), PhaseError> {
    if let Some(block) = ctx.source_block() {
        causes.push_cause(CauseValue::Block(block.clone()));
    }
    causes.add_context(
        ContextKey::SpawnType,
        CauseValue::SpawnType(SpawnType::DroppedItem),
    );
    Ok(())
}

/// A broken block releasing its drops.
#[derive(Debug)]
pub struct BlockDropItemsState {
    modifiers: ModifierChain,
}

impl BlockDropItemsState {
    pub fn new() -> Self {
        Self {
            modifiers: ModifierChain::root().then("block-drop", push_breaking_block),
        }
    }
}

impl PhaseState for BlockDropItemsState {
    fn kind(&self) -> PhaseKind {
        PhaseKind::BlockDropItems
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(PhaseKind::BlockDropItems)
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
        let block = u.context().require_block()?.clone();
        tracing::trace!(block = %block, "releasing block drops");
        u.drop_captured_items(DropKind::Destruct)?;
        u.drop_block_items()?;
        u.spawn_captured_entities()?;
        u.process_block_captures()?;
        u.spawn_per_block_entities()?;
        Ok(())
    }
}
