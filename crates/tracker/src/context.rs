//! Per-frame phase context: the data a phase was entered with, and the
//! capture buffers it declared.

use std::backtrace::Backtrace;

use phasetrack_common::{
    ActorId, BlockPos, BlockSnapshot, Entity, EntityId, ItemDrop, ItemStack,
};

use crate::capture::{CaptureSupplier, ListMultimap};
use crate::cause::CauseFrame;
use crate::error::PhaseError;
use crate::state::PhaseKind;
use crate::transaction::{BlockLog, BlockTransaction};

/// Who issued a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSource {
    pub name: String,
    /// Console and automation sources have no actor.
    pub actor: Option<ActorId>,
}

impl CommandSource {
    pub fn new(name: impl Into<String>, actor: Option<ActorId>) -> Self {
        Self {
            name: name.into(),
            actor,
        }
    }
}

/// The object a phase is running on behalf of.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Actor(ActorId),
    /// Snapshot of the entity at phase entry.
    Entity(Entity),
    Block(BlockSnapshot),
    Command(CommandSource),
    Plugin(String),
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Actor(id) => write!(f, "{id}"),
            Self::Entity(e) => write!(f, "{} {}", e.type_name, e.id),
            Self::Block(snapshot) => write!(f, "{snapshot}"),
            Self::Command(c) => write!(f, "command sender '{}'", c.name),
            Self::Plugin(name) => write!(f, "plugin '{name}'"),
        }
    }
}

macro_rules! capture_kinds {
    ($( $kind:ident($buffer:ty, $name:literal) => $supplier:ident, $take:ident; )+) => {
        /// The capture buffers a phase context can declare.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum CaptureKind {
            $( $kind, )+
        }

        impl CaptureKind {
            pub const ALL: &'static [CaptureKind] = &[$( CaptureKind::$kind ),+];

            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$kind => $name, )+
                }
            }
        }

        #[derive(Debug)]
        enum CaptureSlot {
            $( $kind(CaptureSupplier<$buffer>), )+
        }

        impl CaptureSlot {
            fn new(kind: CaptureKind) -> Self {
                match kind {
                    $( CaptureKind::$kind => Self::$kind(CaptureSupplier::new()), )+
                }
            }

            fn kind(&self) -> CaptureKind {
                match self {
                    $( Self::$kind(_) => CaptureKind::$kind, )+
                }
            }

            fn len(&self) -> usize {
                match self {
                    $( Self::$kind(s) => s.len(), )+
                }
            }
        }

        impl PhaseContext {
            $(
                /// Fails if this context never declared the buffer.
                pub fn $supplier(&mut self) -> Result<&mut CaptureSupplier<$buffer>, PhaseError> {
                    let phase = self.kind.name();
                    self.captures
                        .iter_mut()
                        .find_map(|slot| match slot {
                            CaptureSlot::$kind(s) => Some(s),
                            _ => None,
                        })
                        .ok_or(PhaseError::CaptureNotDeclared {
                            phase,
                            kind: CaptureKind::$kind,
                        })
                }

                /// Consume the buffer if declared and non-empty.
                pub fn $take(&mut self) -> Option<$buffer> {
                    self.$supplier().ok().and_then(|s| s.take_if_not_empty())
                }
            )+
        }
    };
}

capture_kinds! {
    Blocks(BlockLog, "blocks") => block_supplier, take_blocks;
    Entities(Vec<Entity>, "entities") => entity_supplier, take_entities;
    Items(Vec<Entity>, "items") => item_supplier, take_items;
    ItemDrops(Vec<ItemDrop>, "item-drops") => item_drop_supplier, take_item_drops;
    PerEntityItemDrops(ListMultimap<EntityId, ItemDrop>, "per-entity-item-drops")
        => per_entity_item_drop_supplier, take_per_entity_item_drops;
    PerEntityItemEntities(ListMultimap<EntityId, Entity>, "per-entity-item-entities")
        => per_entity_item_entity_supplier, take_per_entity_item_entities;
    BlockItemDrops(ListMultimap<BlockPos, Entity>, "block-item-drops")
        => block_item_drop_supplier, take_block_item_drops;
    PerBlockEntitySpawns(ListMultimap<BlockPos, Entity>, "per-block-entity-spawns")
        => per_block_entity_spawn_supplier, take_per_block_entity_spawns;
}

impl std::fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Mutable per-frame state owned by the phase stack.
#[derive(Debug)]
pub struct PhaseContext {
    kind: PhaseKind,
    source: Option<Source>,
    owner: Option<ActorId>,
    notifier: Option<ActorId>,
    used_item: Option<ItemStack>,
    block_hit: Option<BlockSnapshot>,
    damage_source: Option<String>,
    populator: Option<String>,
    breaking_pos: Option<BlockPos>,
    bulk_block_captures: bool,
    bulk_entity_captures: bool,
    block_events: bool,
    captures: Vec<CaptureSlot>,
    cause_frame: Option<CauseFrame>,
    backtrace: Option<Backtrace>,
    completed: bool,
}

impl PhaseContext {
    pub fn new(kind: PhaseKind) -> Self {
        Self {
            kind,
            source: None,
            owner: None,
            notifier: None,
            used_item: None,
            block_hit: None,
            damage_source: None,
            populator: None,
            breaking_pos: None,
            bulk_block_captures: true,
            bulk_entity_captures: true,
            block_events: true,
            captures: Vec::new(),
            cause_frame: None,
            backtrace: None,
            completed: false,
        }
    }

    pub fn kind(&self) -> PhaseKind {
        self.kind
    }

    // --- capture declaration ---

    /// Declare a buffer. Declaring twice is a no-op.
    pub fn declare(mut self, kind: CaptureKind) -> Self {
        if !self.declares(kind) {
            self.captures.push(CaptureSlot::new(kind));
        }
        self
    }

    pub fn add_block_captures(self) -> Self {
        self.declare(CaptureKind::Blocks)
    }

    pub fn add_entity_captures(self) -> Self {
        self.declare(CaptureKind::Entities)
            .declare(CaptureKind::Items)
            .declare(CaptureKind::ItemDrops)
    }

    /// Blocks plus the general entity buffers.
    pub fn add_captures(self) -> Self {
        self.add_block_captures().add_entity_captures()
    }

    pub fn add_entity_drop_captures(self) -> Self {
        self.declare(CaptureKind::PerEntityItemDrops)
            .declare(CaptureKind::PerEntityItemEntities)
    }

    pub fn add_block_drop_captures(self) -> Self {
        self.declare(CaptureKind::BlockItemDrops)
            .declare(CaptureKind::PerBlockEntitySpawns)
    }

    pub fn declares(&self, kind: CaptureKind) -> bool {
        self.captures.iter().any(|slot| slot.kind() == kind)
    }

    /// Declared buffers and how many values each holds, in declaration order.
    pub fn capture_summary(&self) -> Vec<(CaptureKind, usize)> {
        self.captures.iter().map(|s| (s.kind(), s.len())).collect()
    }

    /// The captured change at `pos`, if this context holds one.
    pub fn pending_block(&self, pos: BlockPos) -> Option<&BlockTransaction> {
        self.captures
            .iter()
            .find_map(|slot| match slot {
                CaptureSlot::Blocks(s) => s.peek(),
                _ => None,
            })
            .and_then(|log| log.pending(pos))
    }

    pub fn has_pending_captures(&self) -> bool {
        self.captures.iter().any(|s| s.len() > 0)
    }

    // --- builder ---

    pub fn source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn owner(mut self, owner: ActorId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn notifier(mut self, notifier: ActorId) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn used_item(mut self, item: ItemStack) -> Self {
        self.used_item = Some(item);
        self
    }

    pub fn block_hit(mut self, snapshot: BlockSnapshot) -> Self {
        self.block_hit = Some(snapshot);
        self
    }

    pub fn damage_source(mut self, damage: impl Into<String>) -> Self {
        self.damage_source = Some(damage.into());
        self
    }

    pub fn populator(mut self, name: impl Into<String>) -> Self {
        self.populator = Some(name.into());
        self
    }

    pub fn bulk_block_captures(mut self, enabled: bool) -> Self {
        self.bulk_block_captures = enabled;
        self
    }

    pub fn bulk_entity_captures(mut self, enabled: bool) -> Self {
        self.bulk_entity_captures = enabled;
        self
    }

    pub fn block_events(mut self, enabled: bool) -> Self {
        self.block_events = enabled;
        self
    }

    // --- accessors ---

    pub fn source_ref(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    pub fn source_entity(&self) -> Option<&Entity> {
        match &self.source {
            Some(Source::Entity(e)) => Some(e),
            _ => None,
        }
    }

    pub fn source_block(&self) -> Option<&BlockSnapshot> {
        match &self.source {
            Some(Source::Block(b)) => Some(b),
            _ => None,
        }
    }

    pub fn command_source(&self) -> Option<&CommandSource> {
        match &self.source {
            Some(Source::Command(c)) => Some(c),
            _ => None,
        }
    }

    /// The actor behind the source, whether given directly or via a command.
    pub fn source_actor(&self) -> Option<ActorId> {
        match &self.source {
            Some(Source::Actor(id)) => Some(*id),
            Some(Source::Command(c)) => c.actor,
            _ => None,
        }
    }

    pub fn require_entity(&self) -> Result<&Entity, PhaseError> {
        self.source_entity()
            .ok_or(PhaseError::missing(self.kind.name(), "a source entity"))
    }

    pub fn require_block(&self) -> Result<&BlockSnapshot, PhaseError> {
        self.source_block()
            .ok_or(PhaseError::missing(self.kind.name(), "a source block"))
    }

    pub fn require_command(&self) -> Result<&CommandSource, PhaseError> {
        self.command_source()
            .ok_or(PhaseError::missing(self.kind.name(), "a command sender"))
    }

    pub fn require_actor(&self) -> Result<ActorId, PhaseError> {
        self.source_actor()
            .ok_or(PhaseError::missing(self.kind.name(), "a source actor"))
    }

    pub fn owner_id(&self) -> Option<ActorId> {
        self.owner
    }

    pub fn notifier_id(&self) -> Option<ActorId> {
        self.notifier
    }

    pub fn item_used(&self) -> Option<&ItemStack> {
        self.used_item.as_ref()
    }

    pub fn hit_block(&self) -> Option<&BlockSnapshot> {
        self.block_hit.as_ref()
    }

    pub fn damage(&self) -> Option<&str> {
        self.damage_source.as_deref()
    }

    pub fn populator_name(&self) -> Option<&str> {
        self.populator.as_deref()
    }

    /// Position currently being broken by the source, for per-block spawn capture.
    pub fn breaking_pos(&self) -> Option<BlockPos> {
        self.breaking_pos
    }

    pub fn set_breaking_pos(&mut self, pos: Option<BlockPos>) {
        self.breaking_pos = pos;
    }

    pub fn allows_bulk_block_captures(&self) -> bool {
        self.bulk_block_captures
    }

    pub fn allows_bulk_entity_captures(&self) -> bool {
        self.bulk_entity_captures
    }

    pub fn allows_block_events(&self) -> bool {
        self.block_events
    }

    // --- lifecycle, driven by the tracker ---

    pub(crate) fn set_cause_frame(&mut self, frame: CauseFrame) {
        self.cause_frame = Some(frame);
    }

    pub(crate) fn take_cause_frame(&mut self) -> Option<CauseFrame> {
        self.cause_frame.take()
    }

    pub(crate) fn capture_backtrace(&mut self) {
        self.backtrace = Some(Backtrace::force_capture());
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_ref()
    }

    pub(crate) fn mark_completed(&mut self) {
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use phasetrack_common::{BlockState, ChangeFlag};

    #[test]
    fn undeclared_buffer_is_an_error() {
        let mut ctx = PhaseContext::new(PhaseKind::GenericPacket).add_block_captures();
        assert!(ctx.block_supplier().is_ok());
        let err = ctx.entity_supplier().unwrap_err();
        assert!(matches!(
            err,
            PhaseError::CaptureNotDeclared {
                kind: CaptureKind::Entities,
                ..
            }
        ));
        assert!(err.is_integration_defect());
        assert!(ctx.take_entities().is_none());
    }

    #[test]
    fn declaring_twice_keeps_one_slot() {
        let ctx = PhaseContext::new(PhaseKind::Command)
            .add_captures()
            .add_block_captures();
        let blocks = ctx
            .capture_summary()
            .iter()
            .filter(|(k, _)| *k == CaptureKind::Blocks)
            .count();
        assert_eq!(blocks, 1);
    }

    #[test]
    fn summary_counts_captured_values() {
        let mut ctx = PhaseContext::new(PhaseKind::Command).add_captures();
        let pos = BlockPos::new(0, 0, 0);
        ctx.block_supplier()
            .unwrap()
            .get()
            .capture(BlockSnapshot::new(pos, BlockState::AIR), BlockState(1), ChangeFlag::ALL);
        ctx.item_drop_supplier()
            .unwrap()
            .get()
            .push(ItemDrop::new(ItemStack::new("stick", 1), Vec3::ZERO));
        assert!(ctx.has_pending_captures());
        let summary = ctx.capture_summary();
        assert!(summary.contains(&(CaptureKind::Blocks, 1)));
        assert!(summary.contains(&(CaptureKind::ItemDrops, 1)));
        assert!(summary.contains(&(CaptureKind::Entities, 0)));

        assert!(ctx.take_blocks().is_some());
        assert!(ctx.take_blocks().is_none());
    }

    #[test]
    fn missing_source_is_reported_with_phase_name() {
        let ctx = PhaseContext::new(PhaseKind::Command);
        let err = ctx.require_command().unwrap_err();
        assert_eq!(
            err.to_string(),
            "command: expected a command sender in the phase context, but none was found"
        );
    }

    #[test]
    fn command_actor_counts_as_source_actor() {
        let actor = ActorId::new();
        let ctx = PhaseContext::new(PhaseKind::Command)
            .source(Source::Command(CommandSource::new("op", Some(actor))));
        assert_eq!(ctx.source_actor(), Some(actor));
    }
}
