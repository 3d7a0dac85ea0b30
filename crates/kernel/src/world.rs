use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use phasetrack_common::{
    ActorId, BlockEntity, BlockPos, BlockSnapshot, BlockState, ChangeFlag, Entity, EntityId,
};

use crate::access::{Mutation, TrackerType, WorldAccess, WorldError};
use crate::rules::ReactionRule;

/// An event record produced by every mutation applied to the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    /// A value was written at a position.
    BlockChanged {
        pos: BlockPos,
        old: BlockState,
        new: BlockState,
    },
    /// A position was put back to a recorded snapshot.
    BlockRestored { pos: BlockPos, state: BlockState },
    /// The secondary object at a position was replaced or removed.
    BlockEntityChanged { pos: BlockPos, kind: Option<String> },
    /// Entity was added to the live simulation.
    EntitySpawned { id: EntityId, type_name: String },
    /// Entity was removed.
    EntityRemoved { id: EntityId },
    /// An owner/notifier link was recorded for a position.
    PositionTracked {
        pos: BlockPos,
        actor: ActorId,
        kind: TrackerType,
    },
    /// Simulation advanced one tick with the given seed.
    Stepped { tick: u64, seed: u64 },
}

/// Owner/notifier links recorded for one position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionTracking {
    pub owner: Option<ActorId>,
    pub notifier: Option<ActorId>,
}

/// Reference in-memory block world.
///
/// Uses BTreeMap for deterministic iteration order. Every write is recorded
/// in an append-only event log so callers can observe exactly which writes
/// and restores happened, and in which order.
#[derive(Debug, Clone, Default)]
pub struct World {
    blocks: BTreeMap<BlockPos, BlockState>,
    block_entities: BTreeMap<BlockPos, BlockEntity>,
    entities: BTreeMap<EntityId, Entity>,
    tracking: BTreeMap<BlockPos, PositionTracking>,
    /// Inclusive vertical bounds; writes outside fail with `OutOfBounds`.
    height: Option<(i32, i32)>,
    rules: Vec<ReactionRule>,
    tick: u64,
    /// Seed for deterministic RNG. Advanced each step for reproducibility.
    seed: u64,
    event_log: Vec<WorldEvent>,
}

impl World {
    /// Create an empty, unbounded world at tick 0 with seed 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a world with a specific seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }

    /// Restrict writes to `min_y..=max_y`.
    pub fn with_height(mut self, min_y: i32, max_y: i32) -> Self {
        self.height = Some((min_y, max_y));
        self
    }

    /// Register a reaction rule consulted after every reacting change.
    pub fn add_rule(&mut self, rule: ReactionRule) {
        tracing::debug!(rule = rule.name(), "registered reaction rule");
        self.rules.push(rule);
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of non-air positions.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Read-only access to all entities (BTreeMap for deterministic iteration).
    pub fn entities(&self) -> &BTreeMap<EntityId, Entity> {
        &self.entities
    }

    /// Non-air positions in canonical order.
    pub fn blocks(&self) -> &BTreeMap<BlockPos, BlockState> {
        &self.blocks
    }

    pub fn tracking(&self, pos: BlockPos) -> PositionTracking {
        self.tracking.get(&pos).copied().unwrap_or_default()
    }

    pub fn tracked_positions(&self) -> usize {
        self.tracking.len()
    }

    /// Read-only access to the event log.
    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }

    /// Drain and return the event log.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    /// Remove an entity. Returns it if it existed.
    pub fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        let removed = self.entities.remove(&id);
        if removed.is_some() {
            self.event_log.push(WorldEvent::EntityRemoved { id });
        }
        removed
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Advance the simulation by one tick.
    pub fn step(&mut self) {
        self.tick += 1;
        self.seed = splitmix64(self.seed);
        self.event_log.push(WorldEvent::Stepped {
            tick: self.tick,
            seed: self.seed,
        });
    }

    /// Compute a deterministic hash of the world state for comparison.
    /// Uses canonical (BTreeMap) iteration order.
    pub fn state_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
        let mix = |h: &mut u64, bytes: &[u8]| {
            for &b in bytes {
                *h ^= b as u64;
                *h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        mix(&mut h, &self.tick.to_le_bytes());
        for (pos, state) in &self.blocks {
            mix(&mut h, &pos.x.to_le_bytes());
            mix(&mut h, &pos.y.to_le_bytes());
            mix(&mut h, &pos.z.to_le_bytes());
            mix(&mut h, &state.0.to_le_bytes());
        }
        for id in self.entities.keys() {
            mix(&mut h, id.0.as_bytes());
        }
        h
    }

    fn check_bounds(&self, pos: BlockPos) -> Result<(), WorldError> {
        match self.height {
            Some((min, max)) if pos.y < min || pos.y > max => Err(WorldError::OutOfBounds(pos)),
            _ => Ok(()),
        }
    }

    fn write(&mut self, pos: BlockPos, state: BlockState) -> BlockState {
        let old = if state.is_air() {
            self.blocks.remove(&pos)
        } else {
            self.blocks.insert(pos, state)
        };
        old.unwrap_or(BlockState::AIR)
    }
}

impl WorldAccess for World {
    fn block(&self, pos: BlockPos) -> BlockState {
        self.blocks.get(&pos).copied().unwrap_or(BlockState::AIR)
    }

    fn set_block(
        &mut self,
        pos: BlockPos,
        state: BlockState,
        _flags: ChangeFlag,
    ) -> Result<BlockState, WorldError> {
        self.check_bounds(pos)?;
        let old = self.write(pos, state);
        self.event_log.push(WorldEvent::BlockChanged {
            pos,
            old,
            new: state,
        });
        Ok(old)
    }

    fn block_entity(&self, pos: BlockPos) -> Option<BlockEntity> {
        self.block_entities.get(&pos).cloned()
    }

    fn set_block_entity(
        &mut self,
        pos: BlockPos,
        block_entity: Option<BlockEntity>,
    ) -> Result<Option<BlockEntity>, WorldError> {
        self.check_bounds(pos)?;
        let kind = block_entity.as_ref().map(|be| be.kind.clone());
        let old = match block_entity {
            Some(be) => self.block_entities.insert(pos, be),
            None => self.block_entities.remove(&pos),
        };
        self.event_log
            .push(WorldEvent::BlockEntityChanged { pos, kind });
        Ok(old)
    }

    fn restore(&mut self, original: &BlockSnapshot) -> Result<(), WorldError> {
        self.check_bounds(original.pos)?;
        self.write(original.pos, original.state);
        match &original.block_entity {
            Some(be) => {
                self.block_entities.insert(original.pos, be.clone());
            }
            None => {
                self.block_entities.remove(&original.pos);
            }
        }
        self.event_log.push(WorldEvent::BlockRestored {
            pos: original.pos,
            state: original.state,
        });
        Ok(())
    }

    fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    fn spawn_entity(&mut self, entity: Entity) -> Result<(), WorldError> {
        if self.entities.contains_key(&entity.id) {
            return Err(WorldError::DuplicateEntity(entity.id));
        }
        self.event_log.push(WorldEvent::EntitySpawned {
            id: entity.id,
            type_name: entity.type_name.clone(),
        });
        self.entities.insert(entity.id, entity);
        Ok(())
    }

    fn react_to_change(
        &mut self,
        original: &BlockSnapshot,
        new: &BlockSnapshot,
        flags: ChangeFlag,
    ) -> Result<Vec<Mutation>, WorldError> {
        if !flags.triggers_reactions() || self.rules.is_empty() {
            return Ok(Vec::new());
        }
        let rules = self.rules.clone();
        let mut out = Vec::new();
        for rule in &rules {
            out.extend(rule.react(self, original, new));
        }
        Ok(out)
    }

    fn track_position(
        &mut self,
        pos: BlockPos,
        actor: ActorId,
        kind: TrackerType,
    ) -> Result<(), WorldError> {
        let entry = self.tracking.entry(pos).or_default();
        match kind {
            TrackerType::Owner => entry.owner = Some(actor),
            TrackerType::Notifier => entry.notifier = Some(actor),
        }
        self.event_log
            .push(WorldEvent::PositionTracked { pos, actor, kind });
        Ok(())
    }

    fn tracked_actor(&self, pos: BlockPos, kind: TrackerType) -> Option<ActorId> {
        let tracking = self.tracking.get(&pos)?;
        match kind {
            TrackerType::Owner => tracking.owner,
            TrackerType::Notifier => tracking.notifier,
        }
    }
}

/// Splitmix64 ... a fast, high-quality deterministic PRNG step function.
/// Used to advance the world seed each tick in a reproducible way.
pub fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
