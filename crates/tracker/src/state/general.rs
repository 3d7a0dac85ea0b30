use phasetrack_common::{BlockPos, BlockState, ChangeFlag};
use phasetrack_kernel::WorldAccess;

use crate::cause::{CauseStack, CauseValue, SpawnType};
use crate::context::PhaseContext;
use crate::error::PhaseError;
use crate::event::DropKind;
use crate::state::{ModifierChain, PhaseKind, PhaseState, associate_actor};
use crate::transaction::BlockTransaction;
use crate::unwind::Unwinder;

fn push_command_source(causes: &mut CauseStack, ctx: &PhaseContext) -> Result<(), PhaseError> {
    if let Some(command) = ctx.command_source() {
        causes.push_cause(CauseValue::Command(command.name.clone()));
        if let Some(actor) = command.actor {
            causes.push_cause(CauseValue::Actor(actor));
        }
    }
    Ok(())
}

/// A command issued by a player, the console or automation.
#[derive(Debug)]
pub struct CommandState {
    modifiers: ModifierChain,
}

impl CommandState {
    pub fn chain() -> ModifierChain {
        ModifierChain::root().then("command-source", push_command_source)
    }

    pub fn new() -> Self {
        Self {
            modifiers: Self::chain(),
        }
    }
}

impl PhaseState for CommandState {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Command
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(PhaseKind::Command)
            .add_captures()
            .add_entity_drop_captures()
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

    fn tracks_entity_specific_drops(&self) -> bool {
        true
    }

    fn ignores_item_pre_merging(&self) -> bool {
        true
    }

    fn does_capture_entity_spawns(&self) -> bool {
        true
    }

    /// The actor behind the command owns what it places.
    fn post_block_transaction_application(
        &self,
        ctx: &PhaseContext,
        tx: &BlockTransaction,
        world: &mut dyn WorldAccess,
        causes: &CauseStack,
    ) -> Result<(), PhaseError> {
        let actor = causes.first_actor().or(ctx.source_actor());
        associate_actor(world, tx, actor, actor)
    }

    fn unwind(&self, u: &mut Unwinder<'_, '_>) -> Result<(), PhaseError> {
        let command = u.context().require_command()?.name.clone();
        tracing::debug!(command = %command, "unwinding command");
        u.process_block_captures()?;
        if let Some(entities) = u.context_mut().take_entities() {
            u.spawn_as(SpawnType::Placement, entities)?;
        }
        u.drop_captured_items(DropKind::Custom)?;
        u.drop_per_entity_items()?;
        Ok(())
    }
}

/// A world being unloaded. Nothing is captured and nothing may spawn.
#[derive(Debug)]
pub struct WorldUnloadState {
    modifiers: ModifierChain,
}

impl WorldUnloadState {
    pub fn new() -> Self {
        Self {
            modifiers: ModifierChain::root(),
        }
    }
}

impl PhaseState for WorldUnloadState {
    fn kind(&self) -> PhaseKind {
        PhaseKind::WorldUnload
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(PhaseKind::WorldUnload)
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

    fn tracks_owners_and_notifiers(&self) -> bool {
        false
    }

    fn does_allow_entity_spawns(&self) -> bool {
        false
    }

    fn requires_post(&self) -> bool {
        false
    }

    fn should_capture_block_change_or_skip(
        &self,
        _ctx: &PhaseContext,
        _pos: BlockPos,
        _current: BlockState,
        _new: BlockState,
        _flags: ChangeFlag,
    ) -> bool {
        false
    }

    fn unwind(&self, _u: &mut Unwinder<'_, '_>) -> Result<(), PhaseError> {
        Ok(())
    }
}

/// Putting positions back to recorded snapshots. Restores are silent.
#[derive(Debug)]
pub struct BlockRestoreState {
    modifiers: ModifierChain,
}

impl BlockRestoreState {
    pub fn new() -> Self {
        Self {
            modifiers: ModifierChain::root(),
        }
    }
}

impl PhaseState for BlockRestoreState {
    fn kind(&self) -> PhaseKind {
        PhaseKind::BlockRestore
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(PhaseKind::BlockRestore)
            .bulk_block_captures(false)
            .block_events(false)
    }

    fn frame_modifiers(&self) -> &ModifierChain {
        &self.modifiers
    }

    fn does_drop_event_tracking(&self, _ctx: &PhaseContext) -> bool {
        false
    }

    fn tracks_owners_and_notifiers(&self) -> bool {
        false
    }

    fn is_not_reentrant(&self) -> bool {
        false
    }

    fn does_allow_entity_spawns(&self) -> bool {
        false
    }

    fn requires_post(&self) -> bool {
        false
    }

    fn unwind(&self, _u: &mut Unwinder<'_, '_>) -> Result<(), PhaseError> {
        Ok(())
    }
}
