//! Phases driven by a player's network packets.

use phasetrack_kernel::WorldAccess;

use crate::cause::{CauseStack, CauseValue, ContextKey, SpawnType};
use crate::context::PhaseContext;
use crate::error::PhaseError;
use crate::event::DropKind;
use crate::state::{ModifierChain, PhaseKind, PhaseState, associate_actor};
use crate::transaction::BlockTransaction;
use crate::unwind::Unwinder;

fn push_packet_player(causes: &mut CauseStack, ctx: &PhaseContext) -> Result<(), PhaseError> {
    if let Some(player) = ctx.source_actor() {
        causes.push_cause(CauseValue::Actor(player));
        causes.add_context(ContextKey::Player, CauseValue::Actor(player));
    }
    Ok(())
}

fn interaction_context(causes: &mut CauseStack, ctx: &PhaseContext) -> Result<(), PhaseError> {
    if let Some(item) = ctx.item_used() {
        causes.add_context(ContextKey::UsedItem, CauseValue::Item(item.clone()));
    }
    if let Some(block) = ctx.hit_block() {
        causes.add_context(ContextKey::BlockHit, CauseValue::Block(block.clone()));
    }
    Ok(())
}

/// Chain shared by every packet phase.
pub fn packet_chain() -> ModifierChain {
    ModifierChain::root().then("packet-player", push_packet_player)
}

/// A player using an item or hitting a block.
#[derive(Debug)]
pub struct InteractionState {
    modifiers: ModifierChain,
}

impl InteractionState {
    pub fn new() -> Self {
        Self {
            modifiers: packet_chain().then("interaction", interaction_context),
        }
    }
}

impl PhaseState for InteractionState {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Interaction
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(PhaseKind::Interaction)
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

    fn is_interaction(&self) -> bool {
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

    fn tracks_block_specific_drops(&self, _ctx: &PhaseContext) -> bool {
        true
    }

    fn has_specific_block_process(&self, _ctx: &PhaseContext) -> bool {
        true
    }

    /// The interacting player owns what it places and notifies what it changes.
    fn post_process_specific_change(
        &self,
        ctx: &PhaseContext,
        tx: &BlockTransaction,
        world: &mut dyn WorldAccess,
    ) -> Result<(), PhaseError> {
        let player = ctx.source_actor();
        associate_actor(world, tx, player, player)
    }

    fn unwind(&self, u: &mut Unwinder<'_, '_>) -> Result<(), PhaseError> {
        let player = u.context().require_actor()?;
        if !u.process_block_captures()? {
            // A rejected interaction must not leave its side effects behind.
            tracing::debug!(player = %player, "interaction rejected, discarding captures");
            u.discard_captures();
            return Ok(());
        }
        u.drop_block_items()?;
        u.drop_captured_items(DropKind::Custom)?;
        u.drop_per_entity_items()?;
        if let Some(entities) = u.context_mut().take_entities() {
            u.spawn_as(SpawnType::Placement, entities)?;
        }
        u.spawn_per_block_entities()?;
        Ok(())
    }
}

/// A player interacting with or attacking an entity.
#[derive(Debug)]
pub struct InteractEntityState {
    modifiers: ModifierChain,
}

impl InteractEntityState {
    pub fn new() -> Self {
        Self {
            modifiers: packet_chain().then("interaction", interaction_context),
        }
    }
}

impl PhaseState for InteractEntityState {
    fn kind(&self) -> PhaseKind {
        PhaseKind::InteractEntity
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(PhaseKind::InteractEntity)
            .add_captures()
            .add_entity_drop_captures()
    }

    fn frame_modifiers(&self) -> &ModifierChain {
        &self.modifiers
    }

    fn does_drop_event_tracking(&self, _ctx: &PhaseContext) -> bool {
        true
    }

    fn is_interaction(&self) -> bool {
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

    fn unwind(&self, u: &mut Unwinder<'_, '_>) -> Result<(), PhaseError> {
        u.context().require_actor()?;
        u.process_block_captures()?;
        u.spawn_captured_entities()?;
        u.drop_per_entity_items()?;
        u.drop_captured_items(DropKind::Custom)?;
        Ok(())
    }
}

/// A player closing a container; held items fall out.
#[derive(Debug)]
pub struct CloseWindowState {
    modifiers: ModifierChain,
}

impl CloseWindowState {
    pub fn new() -> Self {
        Self {
            modifiers: packet_chain(),
        }
    }
}

impl PhaseState for CloseWindowState {
    fn kind(&self) -> PhaseKind {
        PhaseKind::CloseWindow
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(PhaseKind::CloseWindow).add_captures()
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

    fn does_capture_entity_spawns(&self) -> bool {
        true
    }

    fn unwind(&self, u: &mut Unwinder<'_, '_>) -> Result<(), PhaseError> {
        u.context().require_actor()?;
        u.drop_captured_items(DropKind::Close)?;
        u.process_block_captures()?;
        if let Some(entities) = u.context_mut().take_entities() {
            u.spawn_as(SpawnType::Placement, entities)?;
        }
        Ok(())
    }
}

/// Any other packet. Only block changes are captured.
#[derive(Debug)]
pub struct GenericPacketState {
    modifiers: ModifierChain,
}

impl GenericPacketState {
    pub fn new() -> Self {
        Self {
            modifiers: packet_chain(),
        }
    }
}

impl PhaseState for GenericPacketState {
    fn kind(&self) -> PhaseKind {
        PhaseKind::GenericPacket
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(PhaseKind::GenericPacket).add_block_captures()
    }

    fn frame_modifiers(&self) -> &ModifierChain {
        &self.modifiers
    }

    fn does_drop_event_tracking(&self, _ctx: &PhaseContext) -> bool {
        true
    }

    fn unwind(&self, u: &mut Unwinder<'_, '_>) -> Result<(), PhaseError> {
        u.process_block_captures()?;
        Ok(())
    }
}
