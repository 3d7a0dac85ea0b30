//! Unwinding: consuming a frame's capture buffers and publishing them as
//! events.
//!
//! Block captures are replayed first (see `replay`). Entities are then
//! partitioned by why they appeared, and each non-empty partition gets its
//! own spawn or drop event inside its own cause frame.

use phasetrack_common::{BlockSnapshot, Entity, EntityId, ItemDrop};
use phasetrack_kernel::WorldAccess;

use crate::capture::CaptureBuffer;
use crate::cause::{CauseStack, CauseValue, ContextKey, SpawnType};
use crate::context::PhaseContext;
use crate::error::PhaseError;
use crate::event::{DropKind, Event};
use crate::state::{PhaseKind, PhaseState};
use crate::tracker::{Host, PhaseTracker};

/// Why a captured entity appeared. Partitions are processed in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpawnCategory {
    Experience,
    /// Same type as an ageable source entity.
    Breeding,
    Projectile,
    DroppedItem,
    Passive,
}

impl SpawnCategory {
    pub const ORDER: [SpawnCategory; 5] = [
        Self::Experience,
        Self::Breeding,
        Self::Projectile,
        Self::DroppedItem,
        Self::Passive,
    ];

    pub fn classify(entity: &Entity, source: Option<&Entity>) -> Self {
        let bred = source.is_some_and(|s| s.is_ageable() && s.type_name == entity.type_name);
        if entity.is_experience() {
            Self::Experience
        } else if bred {
            Self::Breeding
        } else if entity.is_projectile() {
            Self::Projectile
        } else if entity.is_item() {
            Self::DroppedItem
        } else {
            Self::Passive
        }
    }

    pub fn spawn_type(self) -> SpawnType {
        match self {
            Self::Experience => SpawnType::Experience,
            Self::Breeding => SpawnType::Breeding,
            Self::Projectile => SpawnType::Projectile,
            Self::DroppedItem => SpawnType::DroppedItem,
            Self::Passive => SpawnType::Passive,
        }
    }

    /// Split entities into every category, in `ORDER`. Categories may be empty.
    pub fn partition(entities: Vec<Entity>, source: Option<&Entity>) -> Vec<(Self, Vec<Entity>)> {
        let mut parts: Vec<(Self, Vec<Entity>)> =
            Self::ORDER.iter().map(|c| (*c, Vec::new())).collect();
        for entity in entities {
            let category = Self::classify(&entity, source);
            if let Some((_, bucket)) = parts.iter_mut().find(|(c, _)| *c == category) {
                bucket.push(entity);
            }
        }
        parts
    }
}

/// Access to the frame being unwound and the tracker's collaborators.
pub struct Unwinder<'t, 'w> {
    pub(crate) tracker: &'t mut PhaseTracker,
    pub(crate) host: &'t mut Host<'w>,
    pub(crate) frame: usize,
    /// Replay passes after each change pull fresh captures from the frame.
    pub(crate) nested_passes: bool,
    pub(crate) overflowed: bool,
    pub(crate) processed: Vec<BlockSnapshot>,
}

impl<'t, 'w> Unwinder<'t, 'w> {
    pub(crate) fn new(tracker: &'t mut PhaseTracker, host: &'t mut Host<'w>, frame: usize) -> Self {
        Self {
            tracker,
            host,
            frame,
            nested_passes: true,
            overflowed: false,
            processed: Vec::new(),
        }
    }

    /// For changes processed as they happen rather than at pop time.
    pub(crate) fn immediate(
        tracker: &'t mut PhaseTracker,
        host: &'t mut Host<'w>,
        frame: usize,
    ) -> Self {
        Self {
            nested_passes: false,
            ..Self::new(tracker, host, frame)
        }
    }

    pub fn kind(&self) -> PhaseKind {
        self.tracker.frames[self.frame].kind
    }

    pub fn state(&self) -> &'static dyn PhaseState {
        self.kind().state()
    }

    pub fn context(&self) -> &PhaseContext {
        &self.tracker.frames[self.frame].context
    }

    pub fn context_mut(&mut self) -> &mut PhaseContext {
        &mut self.tracker.frames[self.frame].context
    }

    pub fn world(&mut self) -> &mut dyn WorldAccess {
        &mut *self.host.world
    }

    pub fn causes(&mut self) -> &mut CauseStack {
        &mut *self.host.causes
    }

    /// Originals of every change applied so far in this unwind, in order.
    pub fn processed_originals(&self) -> &[BlockSnapshot] {
        &self.processed
    }

    /// Run `f` inside a fresh cause frame, popped on every exit path.
    pub fn with_cause_frame<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, PhaseError>,
    ) -> Result<R, PhaseError> {
        let frame = self.host.causes.push_frame();
        let result = f(self);
        let popped = self.host.causes.pop_frame(frame);
        let value = result?;
        popped?;
        Ok(value)
    }

    fn post(&mut self, event: &mut Event) -> Result<(), PhaseError> {
        self.host.events.post(event)?;
        Ok(())
    }

    fn spawn_survivors(&mut self, event: Event) -> Result<usize, PhaseError> {
        let Some(survivors) = event.into_survivors() else {
            return Ok(0);
        };
        let count = survivors.len();
        for entity in survivors {
            self.host.world.spawn_entity(entity)?;
        }
        Ok(count)
    }

    /// Post one spawn event and spawn what survives it. Nothing is posted for
    /// an empty batch.
    pub fn spawn_entities(
        &mut self,
        spawn_type: SpawnType,
        entities: Vec<Entity>,
    ) -> Result<usize, PhaseError> {
        if entities.is_empty() {
            return Ok(0);
        }
        self.with_cause_frame(|u| {
            u.host
                .causes
                .add_context(ContextKey::SpawnType, CauseValue::SpawnType(spawn_type));
            let mut event = Event::spawn_entity(u.host.causes.current_cause(), spawn_type, entities);
            u.post(&mut event)?;
            u.spawn_survivors(event)
        })
    }

    /// Post one drop event and spawn the item entities that survive it.
    pub fn drop_items(&mut self, kind: DropKind, items: Vec<Entity>) -> Result<usize, PhaseError> {
        if items.is_empty() {
            return Ok(0);
        }
        self.with_cause_frame(|u| {
            u.host.causes.add_context(
                ContextKey::SpawnType,
                CauseValue::SpawnType(SpawnType::DroppedItem),
            );
            let mut event = Event::drop_item(u.host.causes.current_cause(), kind, items);
            u.post(&mut event)?;
            u.spawn_survivors(event)
        })
    }

    /// Partition entities and fire one event per non-empty category.
    pub fn spawn_classified(
        &mut self,
        entities: Vec<Entity>,
        source: Option<&Entity>,
    ) -> Result<usize, PhaseError> {
        let mut spawned = 0;
        for (category, batch) in SpawnCategory::partition(entities, source) {
            if batch.is_empty() {
                continue;
            }
            spawned += match category {
                SpawnCategory::DroppedItem => self.drop_items(DropKind::Custom, batch)?,
                _ => self.spawn_entities(category.spawn_type(), batch)?,
            };
        }
        Ok(spawned)
    }

    /// Spawn everything under one spawn type. Items among them are dropped instead.
    pub fn spawn_as(&mut self, spawn_type: SpawnType, entities: Vec<Entity>) -> Result<usize, PhaseError> {
        let (items, others): (Vec<_>, Vec<_>) = entities.into_iter().partition(Entity::is_item);
        let dropped = self.drop_items(DropKind::Custom, items)?;
        Ok(dropped + self.spawn_entities(spawn_type, others)?)
    }

    /// Captured entities, classified against the frame's source entity.
    pub fn spawn_captured_entities(&mut self) -> Result<usize, PhaseError> {
        let Some(entities) = self.context_mut().take_entities() else {
            return Ok(0);
        };
        let source = self.context().source_entity().cloned();
        self.spawn_classified(entities, source.as_ref())
    }

    /// General item captures: item entities and pending stacks.
    pub fn drop_captured_items(&mut self, kind: DropKind) -> Result<usize, PhaseError> {
        let mut dropped = 0;
        if let Some(items) = self.context_mut().take_items() {
            dropped += self.drop_items(kind, items)?;
        }
        if let Some(drops) = self.context_mut().take_item_drops() {
            dropped += self.drop_items(kind, drops.iter().map(ItemDrop::create).collect())?;
        }
        Ok(dropped)
    }

    /// Items captured against broken positions, one destruct event per position.
    pub fn drop_block_items(&mut self) -> Result<usize, PhaseError> {
        let Some(per_block) = self.context_mut().take_block_item_drops() else {
            return Ok(0);
        };
        let mut dropped = 0;
        for (pos, items) in per_block {
            let snapshot = self
                .processed
                .iter()
                .find(|s| s.pos == pos)
                .cloned()
                .unwrap_or_else(|| self.host.world.snapshot(pos));
            dropped += self.with_cause_frame(|u| {
                u.host.causes.push_cause(CauseValue::Block(snapshot));
                u.drop_items(DropKind::Destruct, items)
            })?;
        }
        Ok(dropped)
    }

    /// Entities captured against broken positions. Items among them are drops.
    pub fn spawn_per_block_entities(&mut self) -> Result<usize, PhaseError> {
        let Some(per_block) = self.context_mut().take_per_block_entity_spawns() else {
            return Ok(0);
        };
        let mut spawned = 0;
        for (pos, entities) in per_block {
            let snapshot = self.host.world.snapshot(pos);
            spawned += self.with_cause_frame(|u| {
                u.host.causes.push_cause(CauseValue::Block(snapshot));
                u.spawn_as(SpawnType::BlockSpawning, entities)
            })?;
        }
        Ok(spawned)
    }

    /// Drops captured against the entity that released them.
    pub fn drop_per_entity_items(&mut self) -> Result<usize, PhaseError> {
        let mut dropped = 0;
        if let Some(per_entity) = self.context_mut().take_per_entity_item_entities() {
            for (id, items) in per_entity {
                dropped += self.drop_for_entity(id, items)?;
            }
        }
        if let Some(per_entity) = self.context_mut().take_per_entity_item_drops() {
            for (id, drops) in per_entity {
                dropped += self.drop_for_entity(id, drops.iter().map(ItemDrop::create).collect())?;
            }
        }
        Ok(dropped)
    }

    pub fn drop_for_entity(&mut self, id: EntityId, items: Vec<Entity>) -> Result<usize, PhaseError> {
        self.with_cause_frame(|u| {
            u.host.causes.push_cause(CauseValue::Entity(id));
            u.drop_items(DropKind::Destruct, items)
        })
    }

    /// Blocks, then classified entities, then every kind of drop.
    pub fn standard_unwind(&mut self) -> Result<(), PhaseError> {
        self.process_block_captures()?;
        self.spawn_captured_entities()?;
        self.drop_captured_items(DropKind::Custom)?;
        self.drop_block_items()?;
        self.spawn_per_block_entities()?;
        self.drop_per_entity_items()?;
        Ok(())
    }

    /// Throw away everything still captured.
    pub fn discard_captures(&mut self) {
        let ctx = self.context_mut();
        let discarded = [
            ctx.take_blocks().map_or(0, |b| b.len()),
            ctx.take_entities().map_or(0, |v| v.len()),
            ctx.take_items().map_or(0, |v| v.len()),
            ctx.take_item_drops().map_or(0, |v| v.len()),
            ctx.take_per_entity_item_drops().map_or(0, |m| m.len()),
            ctx.take_per_entity_item_entities().map_or(0, |m| m.len()),
            ctx.take_block_item_drops().map_or(0, |m| m.len()),
            ctx.take_per_block_entity_spawns().map_or(0, |m| m.len()),
        ];
        let total: usize = discarded.iter().sum();
        if total > 0 {
            tracing::debug!(phase = self.kind().name(), total, "discarded captures");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use phasetrack_common::{EntityKind, ItemStack};

    fn living(name: &str, ageable: bool) -> Entity {
        Entity::new(name, EntityKind::Living { ageable }, Vec3::ZERO)
    }

    #[test]
    fn classify_by_kind() {
        let orb = Entity::new("xp_orb", EntityKind::ExperienceOrb { value: 1 }, Vec3::ZERO);
        let arrow = Entity::new("arrow", EntityKind::Projectile, Vec3::ZERO);
        let item = Entity::item(ItemStack::new("apple", 1), Vec3::ZERO);
        assert_eq!(SpawnCategory::classify(&orb, None), SpawnCategory::Experience);
        assert_eq!(SpawnCategory::classify(&arrow, None), SpawnCategory::Projectile);
        assert_eq!(SpawnCategory::classify(&item, None), SpawnCategory::DroppedItem);
        assert_eq!(SpawnCategory::classify(&living("zombie", false), None), SpawnCategory::Passive);
    }

    #[test]
    fn breeding_needs_ageable_source_of_same_type() {
        let parent = living("sheep", true);
        let adult_cow = living("cow", true);
        let golem = living("golem", false);
        assert_eq!(
            SpawnCategory::classify(&living("sheep", true), Some(&parent)),
            SpawnCategory::Breeding
        );
        assert_eq!(
            SpawnCategory::classify(&living("sheep", true), Some(&adult_cow)),
            SpawnCategory::Passive
        );
        assert_eq!(
            SpawnCategory::classify(&living("golem", false), Some(&golem)),
            SpawnCategory::Passive
        );
    }

    #[test]
    fn partition_keeps_order_and_empties() {
        let parts = SpawnCategory::partition(vec![living("zombie", false)], None);
        let order: Vec<_> = parts.iter().map(|(c, _)| *c).collect();
        assert_eq!(order, SpawnCategory::ORDER.to_vec());
        assert_eq!(parts[4].1.len(), 1);
        assert!(parts[..4].iter().all(|(_, v)| v.is_empty()));
    }
}
