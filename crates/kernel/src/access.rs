use phasetrack_common::{
    ActorId, BlockEntity, BlockPos, BlockSnapshot, BlockState, ChangeFlag, Entity, EntityId,
};
use serde::{Deserialize, Serialize};

/// Errors raised by a world collaborator.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("position {0} is outside the world bounds")]
    OutOfBounds(BlockPos),
    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),
    #[error("world rejected mutation: {0}")]
    Rejected(String),
}

/// Which kind of causation link an actor has with a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackerType {
    /// The actor that placed or last owned the position.
    Owner,
    /// The actor that last caused the position to change or update.
    Notifier,
}

/// A mutation requested by simulation logic (block physics, neighbour updates).
///
/// Requests are routed back through the phase tracker so they can be captured
/// like any other mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    SetBlock {
        pos: BlockPos,
        state: BlockState,
        flags: ChangeFlag,
    },
    SetBlockEntity {
        pos: BlockPos,
        block_entity: Option<BlockEntity>,
    },
    SpawnEntity(Entity),
}

impl Mutation {
    pub fn set_block(pos: BlockPos, state: BlockState) -> Self {
        Self::SetBlock {
            pos,
            state,
            flags: ChangeFlag::ALL,
        }
    }
}

/// The world-mutation collaborator.
///
/// Everything the tracker needs from the simulation: reading and writing
/// positions, the secondary object at a position, spawning entities and the
/// simulation's reaction to an applied change.
pub trait WorldAccess {
    /// Current value at a position.
    fn block(&self, pos: BlockPos) -> BlockState;

    /// Write a value, returning the previous one.
    fn set_block(
        &mut self,
        pos: BlockPos,
        state: BlockState,
        flags: ChangeFlag,
    ) -> Result<BlockState, WorldError>;

    /// Secondary object at a position, if any.
    fn block_entity(&self, pos: BlockPos) -> Option<BlockEntity>;

    /// Replace the secondary object at a position, returning the previous one.
    fn set_block_entity(
        &mut self,
        pos: BlockPos,
        block_entity: Option<BlockEntity>,
    ) -> Result<Option<BlockEntity>, WorldError>;

    /// Put a position back exactly as the snapshot recorded it. No reactions run.
    fn restore(&mut self, original: &BlockSnapshot) -> Result<(), WorldError>;

    fn entity(&self, id: EntityId) -> Option<&Entity>;

    /// Add an entity to the live simulation.
    fn spawn_entity(&mut self, entity: Entity) -> Result<(), WorldError>;

    /// Full snapshot of a position.
    fn snapshot(&self, pos: BlockPos) -> BlockSnapshot {
        BlockSnapshot::new(pos, self.block(pos)).with_block_entity(self.block_entity(pos))
    }

    /// Let the simulation react to an applied change. Follow-up mutations are
    /// returned, not applied.
    fn react_to_change(
        &mut self,
        _original: &BlockSnapshot,
        _new: &BlockSnapshot,
        _flags: ChangeFlag,
    ) -> Result<Vec<Mutation>, WorldError> {
        Ok(Vec::new())
    }

    /// Record an owner/notifier link for a position.
    fn track_position(
        &mut self,
        _pos: BlockPos,
        _actor: ActorId,
        _kind: TrackerType,
    ) -> Result<(), WorldError> {
        Ok(())
    }

    fn tracked_actor(&self, _pos: BlockPos, _kind: TrackerType) -> Option<ActorId> {
        None
    }
}
