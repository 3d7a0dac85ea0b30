use phasetrack_common::{ActorId, BlockPos, BlockState, EntityId};
use phasetrack_kernel::{World, WorldAccess};
use phasetrack_tracker::{Diagnostics, Event, PhaseKind, PhaseTracker};

/// Read-only queries against the world for debugging.
pub struct WorldInspector;

impl WorldInspector {
    pub fn summary(world: &World) -> WorldSummary {
        WorldSummary {
            tick: world.tick(),
            seed: world.seed(),
            block_count: world.block_count(),
            entity_count: world.entity_count(),
            tracked_positions: world.tracked_positions(),
            pending_events: world.events().len(),
        }
    }

    /// Everything the world knows about one position.
    pub fn inspect_position(world: &World, pos: BlockPos) -> PositionInfo {
        let tracking = world.tracking(pos);
        PositionInfo {
            pos,
            state: world.block(pos),
            block_entity: world.block_entity(pos).map(|be| be.kind),
            owner: tracking.owner,
            notifier: tracking.notifier,
        }
    }

    pub fn inspect_entity(world: &World, id: EntityId) -> Option<EntityInfo> {
        world.entity(id).map(|e| EntityInfo {
            id,
            type_name: e.type_name.clone(),
            position: e.position.to_array(),
            dead: e.dead,
        })
    }

    pub fn list_entities(world: &World) -> Vec<EntityId> {
        world.entities().keys().copied().collect()
    }
}

#[derive(Debug, Clone)]
pub struct WorldSummary {
    pub tick: u64,
    pub seed: u64,
    pub block_count: usize,
    pub entity_count: usize,
    pub tracked_positions: usize,
    pub pending_events: usize,
}

impl std::fmt::Display for WorldSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "World: tick={} seed={} blocks={} entities={} tracked={} pending_events={}",
            self.tick,
            self.seed,
            self.block_count,
            self.entity_count,
            self.tracked_positions,
            self.pending_events
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionInfo {
    pub pos: BlockPos,
    pub state: BlockState,
    /// Kind of the secondary object, if any.
    pub block_entity: Option<String>,
    pub owner: Option<ActorId>,
    pub notifier: Option<ActorId>,
}

impl std::fmt::Display for PositionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Block {} state={}", self.pos, self.state.0)?;
        if let Some(kind) = &self.block_entity {
            write!(f, " block_entity={kind}")?;
        }
        if let Some(owner) = self.owner {
            write!(f, " owner={owner}")?;
        }
        if let Some(notifier) = self.notifier {
            write!(f, " notifier={notifier}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EntityInfo {
    pub id: EntityId,
    pub type_name: String,
    pub position: [f32; 3],
    pub dead: bool,
}

impl std::fmt::Display for EntityInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Entity [{}] {} pos=({:.2}, {:.2}, {:.2})",
            self.id, self.type_name, self.position[0], self.position[1], self.position[2],
        )?;
        if self.dead {
            write!(f, " (dead)")?;
        }
        Ok(())
    }
}

/// Read-only view of the phase stack and what the bus saw.
pub struct TrackerInspector;

impl TrackerInspector {
    pub fn summary(tracker: &PhaseTracker) -> TrackerSummary {
        TrackerSummary {
            stack: tracker.frames().iter().map(|f| f.kind()).collect(),
            diagnostics: *tracker.diagnostics(),
        }
    }

    /// Count events, changes and entities in an event history.
    pub fn tally(events: &[Event]) -> EventTally {
        let mut tally = EventTally::default();
        for event in events {
            if event.is_cancelled() {
                tally.cancelled += 1;
            }
            match event {
                Event::ChangeBlock(change) => {
                    tally.change_events += 1;
                    tally.changes += change.transactions.len();
                    tally.rejected += change.transactions.iter().filter(|t| !t.valid).count();
                }
                Event::SpawnEntity(spawn) => {
                    tally.spawn_events += 1;
                    tally.spawned += spawn.entities.len();
                }
                Event::DropItem(drop) => {
                    tally.drop_events += 1;
                    tally.dropped += drop.entities.len();
                }
            }
        }
        tally
    }
}

#[derive(Debug, Clone)]
pub struct TrackerSummary {
    /// Active phases, outermost first.
    pub stack: Vec<PhaseKind>,
    pub diagnostics: Diagnostics,
}

impl std::fmt::Display for TrackerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let d = &self.diagnostics;
        write!(
            f,
            "Tracker: depth={} entered={} peak={} runaways={} overflows={} failures={}",
            self.stack.len(),
            d.phases_entered,
            d.peak_depth,
            d.runaway_phases,
            d.depth_overflows,
            d.unwind_failures
        )?;
        if !self.stack.is_empty() {
            let names: Vec<&str> = self.stack.iter().map(|k| k.name()).collect();
            write!(f, " stack=[{}]", names.join(" > "))?;
        }
        Ok(())
    }
}

/// Counts over a run's event history. Cancelled events are still counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventTally {
    pub change_events: usize,
    pub changes: usize,
    pub rejected: usize,
    pub spawn_events: usize,
    pub spawned: usize,
    pub drop_events: usize,
    pub dropped: usize,
    pub cancelled: usize,
}

impl std::fmt::Display for EventTally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Events: change-block={} ({} changes, {} rejected) spawn-entity={} ({}) drop-item={} ({}) cancelled={}",
            self.change_events,
            self.changes,
            self.rejected,
            self.spawn_events,
            self.spawned,
            self.drop_events,
            self.dropped,
            self.cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use phasetrack_common::{ChangeFlag, Entity, EntityKind};
    use phasetrack_kernel::TrackerType;
    use phasetrack_tracker::{CauseStack, Host, ListenerBus};

    const STONE: BlockState = BlockState(1);

    #[test]
    fn summary_empty_world() {
        let world = World::new();
        let summary = WorldInspector::summary(&world);
        assert_eq!(summary.tick, 0);
        assert_eq!(summary.block_count, 0);
        assert_eq!(summary.entity_count, 0);
        assert!(summary.to_string().contains("tick=0"));
    }

    #[test]
    fn summary_counts_blocks_and_events() {
        let mut world = World::new();
        world.set_block(BlockPos::new(0, 0, 0), STONE, ChangeFlag::ALL).unwrap();
        world
            .spawn_entity(Entity::new("cow", EntityKind::Living { ageable: true }, Vec3::ZERO))
            .unwrap();
        world.step();

        let summary = WorldInspector::summary(&world);
        assert_eq!(summary.tick, 1);
        assert_eq!(summary.block_count, 1);
        assert_eq!(summary.entity_count, 1);
        assert_eq!(summary.pending_events, 3);
    }

    #[test]
    fn inspect_position_reports_tracking() {
        let mut world = World::new();
        let pos = BlockPos::new(2, 0, 0);
        let actor = ActorId::new();
        world.set_block(pos, STONE, ChangeFlag::ALL).unwrap();
        world.track_position(pos, actor, TrackerType::Owner).unwrap();

        let info = WorldInspector::inspect_position(&world, pos);
        assert_eq!(info.state, STONE);
        assert_eq!(info.owner, Some(actor));
        assert_eq!(info.notifier, None);
        assert!(info.to_string().contains("owner="));
    }

    #[test]
    fn inspect_entity_found_and_missing() {
        let mut world = World::new();
        let cow = Entity::new("cow", EntityKind::Other, Vec3::new(1.0, 2.0, 3.0));
        let id = cow.id;
        world.spawn_entity(cow).unwrap();

        let info = WorldInspector::inspect_entity(&world, id).unwrap();
        assert_eq!(info.position, [1.0, 2.0, 3.0]);
        assert_eq!(info.type_name, "cow");
        assert!(WorldInspector::inspect_entity(&world, EntityId::new()).is_none());
        assert_eq!(WorldInspector::list_entities(&world), vec![id]);
    }

    #[test]
    fn tracker_summary_and_tally() {
        let mut world = World::new();
        let mut bus = ListenerBus::new();
        bus.listen("reject-first", |event| {
            if let Event::ChangeBlock(change) = event {
                change.invalidate(0);
            }
            Ok(())
        });
        let mut causes = CauseStack::new();
        let mut tracker = PhaseTracker::default();
        {
            let mut host = Host::new(&mut world, &mut bus, &mut causes);
            let ctx = tracker.create_context(PhaseKind::GenericPacket);
            let handle = tracker.push(&mut host, ctx);
            let summary = TrackerInspector::summary(&tracker);
            assert_eq!(summary.stack, vec![PhaseKind::GenericPacket]);
            assert!(summary.to_string().contains("generic-packet"));

            for x in 0..3 {
                tracker
                    .set_block(&mut host, BlockPos::new(x, 0, 0), STONE, ChangeFlag::ALL)
                    .unwrap();
            }
            tracker.pop(&mut host, handle);
        }

        let summary = TrackerInspector::summary(&tracker);
        assert!(summary.stack.is_empty());
        assert_eq!(summary.diagnostics.phases_entered, 1);

        let tally = TrackerInspector::tally(bus.history());
        assert_eq!(tally.change_events, 1);
        assert_eq!(tally.changes, 3);
        assert_eq!(tally.rejected, 1);
        assert_eq!(tally.cancelled, 0);
        assert_eq!(world.block_count(), 2);
    }
}
