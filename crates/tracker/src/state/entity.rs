use phasetrack_common::{Entity, ItemDrop};

use crate::cause::{CauseStack, CauseValue, ContextKey};
use crate::context::PhaseContext;
use crate::error::PhaseError;
use crate::event::DropKind;
use crate::state::{ModifierChain, PhaseKind, PhaseState};
use crate::unwind::Unwinder;

fn push_dying_entity(causes: &mut CauseStack, ctx: &PhaseContext) -> Result<(), PhaseError> {
    if let Some(entity) = ctx.source_entity() {
        causes.push_cause(CauseValue::Entity(entity.id));
    }
    if let Some(damage) = ctx.damage() {
        causes.add_context(
            ContextKey::DamageSource,
            CauseValue::DamageSource(damage.to_string()),
        );
    }
    Ok(())
}

/// An entity dying and releasing its loot.
#[derive(Debug)]
pub struct EntityDeathState {
    modifiers: ModifierChain,
}

impl EntityDeathState {
    pub fn new() -> Self {
        Self {
            modifiers: ModifierChain::root().then("dying-entity", push_dying_entity),
        }
    }
}

impl PhaseState for EntityDeathState {
    fn kind(&self) -> PhaseKind {
        PhaseKind::EntityDeath
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(PhaseKind::EntityDeath)
            .add_captures()
            .add_entity_drop_captures()
    }

    fn frame_modifiers(&self) -> &ModifierChain {
        &self.modifiers
    }

    fn does_drop_event_tracking(&self, _ctx: &PhaseContext) -> bool {
        true
    }

    fn tracks_entity_deaths(&self) -> bool {
        true
    }

    fn does_capture_entity_spawns(&self) -> bool {
        true
    }

    fn does_capture_entity_drops(&self, _ctx: &PhaseContext) -> bool {
        true
    }

    fn tracks_entity_specific_drops(&self) -> bool {
        true
    }

    fn ignores_item_pre_merging(&self) -> bool {
        true
    }

    /// The dying entity's own drops go first, then everything else it caused.
    fn unwind(&self, u: &mut Unwinder<'_, '_>) -> Result<(), PhaseError> {
        let dying = u.context().require_entity()?.id;
        let mut own: Vec<Entity> = u
            .context_mut()
            .per_entity_item_entity_supplier()?
            .remove_key(&dying)
            .unwrap_or_default();
        if let Some(drops) = u.context_mut().per_entity_item_drop_supplier()?.remove_key(&dying) {
            own.extend(drops.iter().map(ItemDrop::create));
        }
        u.drop_for_entity(dying, own)?;

        u.spawn_captured_entities()?;
        u.drop_captured_items(DropKind::Destruct)?;
        u.drop_per_entity_items()?;
        u.process_block_captures()?;
        Ok(())
    }
}
