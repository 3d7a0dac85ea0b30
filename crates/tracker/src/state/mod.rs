//! Phase states: stateless descriptors that decide how mutations are
//! captured while a phase is active, and how the captures are unwound.
//!
//! Each [`PhaseKind`] maps to exactly one shared state instance. States
//! never hold per-frame data; that lives in [`PhaseContext`].

mod block;
mod entity;
mod general;
mod generation;
mod packet;
mod plugin;
mod tick;

use std::sync::LazyLock;

use phasetrack_common::{ActorId, BlockChange, BlockPos, BlockState, ChangeFlag, Entity};
use phasetrack_kernel::{TrackerType, WorldAccess};

use crate::cause::{CauseStack, CauseValue, ContextKey, SpawnType};
use crate::context::{CaptureKind, PhaseContext};
use crate::error::PhaseError;
use crate::transaction::BlockTransaction;
use crate::unwind::Unwinder;

pub use block::BlockDropItemsState;
pub use entity::EntityDeathState;
pub use general::{BlockRestoreState, CommandState, WorldUnloadState};
pub use generation::{PopulatorState, TerrainGenerationState};
pub use packet::{CloseWindowState, GenericPacketState, InteractEntityState, InteractionState};
pub use plugin::{AsyncResyncState, ScheduledTaskState};
pub use tick::{BlockTickState, EntityTickState, NoCaptureEntityTickState};

/// Closed set of phases the tracker knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhaseKind {
    Command,
    WorldUnload,
    BlockRestore,
    EntityTick,
    NoCaptureEntityTick,
    BlockTick,
    Interaction,
    InteractEntity,
    CloseWindow,
    GenericPacket,
    BlockDropItems,
    EntityDeath,
    Populator,
    TerrainGeneration,
    AsyncResync,
    ScheduledTask,
}

/// Grouping of phases that share capture policy and frame modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseFamily {
    General,
    Tick,
    Packet,
    Block,
    Entity,
    Generation,
    Plugin,
}

static COMMAND: LazyLock<CommandState> = LazyLock::new(CommandState::new);
static WORLD_UNLOAD: LazyLock<WorldUnloadState> = LazyLock::new(WorldUnloadState::new);
static BLOCK_RESTORE: LazyLock<BlockRestoreState> = LazyLock::new(BlockRestoreState::new);
static ENTITY_TICK: LazyLock<EntityTickState> = LazyLock::new(EntityTickState::new);
static NO_CAPTURE_ENTITY_TICK: LazyLock<NoCaptureEntityTickState> =
    LazyLock::new(NoCaptureEntityTickState::new);
static BLOCK_TICK: LazyLock<BlockTickState> = LazyLock::new(BlockTickState::new);
static INTERACTION: LazyLock<InteractionState> = LazyLock::new(InteractionState::new);
static INTERACT_ENTITY: LazyLock<InteractEntityState> = LazyLock::new(InteractEntityState::new);
static CLOSE_WINDOW: LazyLock<CloseWindowState> = LazyLock::new(CloseWindowState::new);
static GENERIC_PACKET: LazyLock<GenericPacketState> = LazyLock::new(GenericPacketState::new);
static BLOCK_DROP_ITEMS: LazyLock<BlockDropItemsState> = LazyLock::new(BlockDropItemsState::new);
static ENTITY_DEATH: LazyLock<EntityDeathState> = LazyLock::new(EntityDeathState::new);
static POPULATOR: LazyLock<PopulatorState> = LazyLock::new(PopulatorState::new);
static TERRAIN_GENERATION: LazyLock<TerrainGenerationState> =
    LazyLock::new(TerrainGenerationState::new);
static ASYNC_RESYNC: LazyLock<AsyncResyncState> = LazyLock::new(AsyncResyncState::new);
static SCHEDULED_TASK: LazyLock<ScheduledTaskState> = LazyLock::new(ScheduledTaskState::new);

impl PhaseKind {
    pub const ALL: [PhaseKind; 16] = [
        Self::Command,
        Self::WorldUnload,
        Self::BlockRestore,
        Self::EntityTick,
        Self::NoCaptureEntityTick,
        Self::BlockTick,
        Self::Interaction,
        Self::InteractEntity,
        Self::CloseWindow,
        Self::GenericPacket,
        Self::BlockDropItems,
        Self::EntityDeath,
        Self::Populator,
        Self::TerrainGeneration,
        Self::AsyncResync,
        Self::ScheduledTask,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::WorldUnload => "world-unload",
            Self::BlockRestore => "block-restore",
            Self::EntityTick => "entity-tick",
            Self::NoCaptureEntityTick => "no-capture-entity-tick",
            Self::BlockTick => "block-tick",
            Self::Interaction => "interaction",
            Self::InteractEntity => "interact-entity",
            Self::CloseWindow => "close-window",
            Self::GenericPacket => "generic-packet",
            Self::BlockDropItems => "block-drop-items",
            Self::EntityDeath => "entity-death",
            Self::Populator => "populator",
            Self::TerrainGeneration => "terrain-generation",
            Self::AsyncResync => "async-resync",
            Self::ScheduledTask => "scheduled-task",
        }
    }

    pub fn family(self) -> PhaseFamily {
        match self {
            Self::Command | Self::WorldUnload | Self::BlockRestore => PhaseFamily::General,
            Self::EntityTick | Self::NoCaptureEntityTick | Self::BlockTick => PhaseFamily::Tick,
            Self::Interaction | Self::InteractEntity | Self::CloseWindow | Self::GenericPacket => {
                PhaseFamily::Packet
            }
            Self::BlockDropItems => PhaseFamily::Block,
            Self::EntityDeath => PhaseFamily::Entity,
            Self::Populator | Self::TerrainGeneration => PhaseFamily::Generation,
            Self::AsyncResync | Self::ScheduledTask => PhaseFamily::Plugin,
        }
    }

    /// The shared state instance for this phase.
    pub fn state(self) -> &'static dyn PhaseState {
        match self {
            Self::Command => &*COMMAND,
            Self::WorldUnload => &*WORLD_UNLOAD,
            Self::BlockRestore => &*BLOCK_RESTORE,
            Self::EntityTick => &*ENTITY_TICK,
            Self::NoCaptureEntityTick => &*NO_CAPTURE_ENTITY_TICK,
            Self::BlockTick => &*BLOCK_TICK,
            Self::Interaction => &*INTERACTION,
            Self::InteractEntity => &*INTERACT_ENTITY,
            Self::CloseWindow => &*CLOSE_WINDOW,
            Self::GenericPacket => &*GENERIC_PACKET,
            Self::BlockDropItems => &*BLOCK_DROP_ITEMS,
            Self::EntityDeath => &*ENTITY_DEATH,
            Self::Populator => &*POPULATOR,
            Self::TerrainGeneration => &*TERRAIN_GENERATION,
            Self::AsyncResync => &*ASYNC_RESYNC,
            Self::ScheduledTask => &*SCHEDULED_TASK,
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What to do with an entity spawned while a phase is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnDecision {
    /// Buffer it in the context's entity capture.
    Capture,
    /// Buffer it against the position being broken.
    CaptureAt(BlockPos),
    /// Fire a spawn event for it right away.
    Immediate(SpawnType),
    /// Spawn it with no event.
    Direct,
    Deny,
}

/// What to do with an item dropped while a phase is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropDecision {
    /// Buffer it against the entity that dropped it.
    PerEntity,
    General,
    /// Fire a drop event for it right away.
    Event,
    Direct,
}

/// A function that pushes causes or context keys when a phase is entered.
pub type FrameModifier = fn(&mut CauseStack, &PhaseContext) -> Result<(), PhaseError>;

/// Ordered frame modifiers. Derived states extend their parent's chain.
#[derive(Clone)]
pub struct ModifierChain {
    modifiers: Vec<(&'static str, FrameModifier)>,
}

impl ModifierChain {
    /// Chain every state starts from: owner and notifier context keys.
    pub fn root() -> Self {
        Self {
            modifiers: vec![("owner-notifier", owner_and_notifier)],
        }
    }

    pub fn then(mut self, name: &'static str, modifier: FrameModifier) -> Self {
        self.modifiers.push((name, modifier));
        self
    }

    pub fn apply(&self, causes: &mut CauseStack, ctx: &PhaseContext) -> Result<(), PhaseError> {
        for (_, modifier) in &self.modifiers {
            modifier(causes, ctx)?;
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.modifiers.iter().map(|(name, _)| *name).collect()
    }
}

impl std::fmt::Debug for ModifierChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

fn owner_and_notifier(causes: &mut CauseStack, ctx: &PhaseContext) -> Result<(), PhaseError> {
    if let Some(owner) = ctx.owner_id() {
        causes.add_context(ContextKey::Owner, CauseValue::Actor(owner));
    }
    if let Some(notifier) = ctx.notifier_id() {
        causes.add_context(ContextKey::Notifier, CauseValue::Actor(notifier));
    }
    Ok(())
}

/// Record who placed or changed a position once the change is applied.
/// Placements set the owner; every change sets the notifier.
pub(crate) fn associate_actor(
    world: &mut dyn WorldAccess,
    tx: &BlockTransaction,
    owner: Option<ActorId>,
    notifier: Option<ActorId>,
) -> Result<(), PhaseError> {
    let pos = tx.pos();
    if tx.change == BlockChange::Place {
        if let Some(owner) = owner.or(notifier) {
            world.track_position(pos, owner, TrackerType::Owner)?;
        }
    }
    if let Some(notifier) = notifier.or(owner) {
        world.track_position(pos, notifier, TrackerType::Notifier)?;
    }
    Ok(())
}

/// Policy and unwind behaviour of one phase.
///
/// Predicates with a context argument may vary per frame; the rest are fixed
/// per state.
pub trait PhaseState: Send + Sync {
    fn kind(&self) -> PhaseKind;

    /// A fresh context with this state's capture buffers declared.
    fn create_context(&self) -> PhaseContext;

    fn frame_modifiers(&self) -> &ModifierChain;

    /// Consume every capture buffer and publish the results.
    fn unwind(&self, unwinder: &mut Unwinder<'_, '_>) -> Result<(), PhaseError>;

    /// Whether items dropped outside a capture still fire a drop event.
    /// Every state answers explicitly.
    fn does_drop_event_tracking(&self, ctx: &PhaseContext) -> bool;

    fn tracks_owners_and_notifiers(&self) -> bool {
        true
    }

    fn is_not_reentrant(&self) -> bool {
        true
    }

    fn is_world_generation(&self) -> bool {
        false
    }

    fn is_ticking(&self) -> bool {
        false
    }

    fn is_interaction(&self) -> bool {
        false
    }

    fn ignores_entity_collisions(&self) -> bool {
        false
    }

    /// Drops become item entities right away instead of pending stacks.
    fn ignores_item_pre_merging(&self) -> bool {
        false
    }

    fn requires_post(&self) -> bool {
        true
    }

    fn does_bulk_block_capture(&self, ctx: &PhaseContext) -> bool {
        ctx.allows_bulk_block_captures()
    }

    /// Whether uncaptured block changes still get a change event.
    fn does_block_event_tracking(&self, ctx: &PhaseContext) -> bool {
        ctx.allows_block_events()
    }

    fn does_capture_entity_drops(&self, _ctx: &PhaseContext) -> bool {
        false
    }

    fn does_capture_entity_spawns(&self) -> bool {
        false
    }

    fn does_allow_entity_spawns(&self) -> bool {
        true
    }

    fn tracks_block_specific_drops(&self, _ctx: &PhaseContext) -> bool {
        false
    }

    fn tracks_entity_specific_drops(&self) -> bool {
        false
    }

    fn tracks_entity_deaths(&self) -> bool {
        false
    }

    /// Whether accepted changes get an extra per-change pass after the batch.
    fn has_specific_block_process(&self, _ctx: &PhaseContext) -> bool {
        false
    }

    /// Return false to let a change through uncaptured.
    fn should_capture_block_change_or_skip(
        &self,
        _ctx: &PhaseContext,
        _pos: BlockPos,
        _current: BlockState,
        _new: BlockState,
        _flags: ChangeFlag,
    ) -> bool {
        true
    }

    fn spawn_policy(&self, ctx: &PhaseContext, _entity: &Entity) -> SpawnDecision {
        if !self.does_allow_entity_spawns() {
            SpawnDecision::Deny
        } else if self.does_capture_entity_spawns() && ctx.declares(CaptureKind::Entities) {
            SpawnDecision::Capture
        } else {
            SpawnDecision::Immediate(SpawnType::Passive)
        }
    }

    fn drop_policy(&self, ctx: &PhaseContext) -> DropDecision {
        if self.does_capture_entity_drops(ctx) {
            if self.tracks_entity_specific_drops() {
                DropDecision::PerEntity
            } else {
                DropDecision::General
            }
        } else if self.does_drop_event_tracking(ctx) {
            DropDecision::Event
        } else {
            DropDecision::Direct
        }
    }

    /// Runs after each accepted change is applied, before the world reacts.
    fn post_block_transaction_application(
        &self,
        ctx: &PhaseContext,
        tx: &BlockTransaction,
        world: &mut dyn WorldAccess,
        _causes: &CauseStack,
    ) -> Result<(), PhaseError> {
        if self.tracks_owners_and_notifiers() {
            associate_actor(world, tx, ctx.owner_id(), ctx.notifier_id())?;
        }
        Ok(())
    }

    /// Per-change pass for states with a specific block process.
    fn post_process_specific_change(
        &self,
        _ctx: &PhaseContext,
        _tx: &BlockTransaction,
        _world: &mut dyn WorldAccess,
    ) -> Result<(), PhaseError> {
        Ok(())
    }

    /// Runs for each change that was rejected and restored.
    fn process_cancelled_transaction(&self, ctx: &PhaseContext, tx: &BlockTransaction) {
        tracing::trace!(phase = ctx.kind().name(), pos = %tx.pos(), "change rejected");
    }
}
