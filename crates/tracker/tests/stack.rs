//! Push/pop discipline, runaway detection and failure isolation.

mod common;

use std::panic::{self, AssertUnwindSafe};

use common::{DIRT, Harness, STONE, at};
use glam::Vec3;
use phasetrack_common::{
    ActorId, BlockEntity, BlockPos, BlockSnapshot, BlockState, ChangeFlag, Entity, EntityId,
    ItemStack,
};
use phasetrack_kernel::{ReactionRule, World, WorldAccess, WorldError};
use phasetrack_tracker::{
    BlockOutcome, CauseStack, CauseValue, CommandSource, Event, Host, ListenerBus, PhaseContext,
    PhaseKind, PhaseTracker, Source, TrackerConfig,
};

fn command(tracker: &PhaseTracker, name: &str) -> PhaseContext {
    tracker
        .create_context(PhaseKind::Command)
        .source(Source::Command(CommandSource::new(name, Some(ActorId::new()))))
}

#[test]
fn failing_unwind_still_pops_once() {
    let mut h = Harness::new();
    h.run(|tracker, host| {
        // No command source: the unwind cannot find what it needs.
        let ctx = tracker.create_context(PhaseKind::Command);
        let handle = tracker.push(host, ctx);
        tracker.set_block(host, at(0), STONE, ChangeFlag::ALL).unwrap();
        tracker.pop(host, handle);
    });

    let d = h.tracker.diagnostics();
    assert!(h.tracker.is_empty());
    assert_eq!(d.unwind_failures, 1);
    assert_eq!(d.missing_context, 1);
    assert_eq!(d.mismatched_pops, 0);
    assert_eq!(h.causes.frame_depth(), 0);
    assert_eq!(h.world.block(at(0)), BlockState::AIR);
    assert!(h.bus.history().is_empty());
}

#[test]
fn runaway_reports_are_throttled() {
    let config = TrackerConfig {
        verbose: false,
        max_runaway_count: 2,
        ..TrackerConfig::default()
    };
    let mut h = Harness::with_config(config);
    h.run(|tracker, host| {
        let mut handles = Vec::new();
        for i in 0..4 {
            let ctx = command(tracker, &format!("nested-{i}"));
            handles.push(tracker.push(host, ctx));
            let outcome = tracker.set_block(host, at(i), STONE, ChangeFlag::ALL).unwrap();
            assert_eq!(outcome, BlockOutcome::Captured);
        }
        assert_eq!(tracker.depth(), 4);
        while let Some(handle) = handles.pop() {
            tracker.pop(host, handle);
        }
    });

    let d = h.tracker.diagnostics();
    assert_eq!(d.runaway_phases, 3);
    assert_eq!(d.printed_runaways, 2);
    assert_eq!(d.peak_depth, 4);
    assert_eq!(d.unwind_failures, 0);
    assert!(h.tracker.is_empty());

    // Every frame unwound its own capture, innermost first.
    assert_eq!(h.bus.count("change-block"), 4);
    assert_eq!(h.written(), vec![at(3), at(2), at(1), at(0)]);
    for (event, i) in h.bus.history().iter().zip((0..4).rev()) {
        let Event::ChangeBlock(change) = event else {
            panic!("expected only change events");
        };
        assert_eq!(change.transactions.len(), 1);
        assert_eq!(change.transactions[0].proposed.pos, at(i));
        assert!(change.cause.contains(&CauseValue::Command(format!("nested-{i}"))));
    }
}

#[test]
fn reentrant_phases_are_not_runaways() {
    let mut h = Harness::new();
    h.run(|tracker, host| {
        let outer = tracker.create_context(PhaseKind::BlockRestore);
        let outer = tracker.push(host, outer);
        let inner = tracker.create_context(PhaseKind::BlockRestore);
        let inner = tracker.push(host, inner);
        tracker.pop(host, inner);
        tracker.pop(host, outer);
    });
    assert_eq!(h.tracker.diagnostics().runaway_phases, 0);
}

#[test]
fn popping_below_the_top_retires_everything_above() {
    let mut h = Harness::new();
    h.run(|tracker, host| {
        let outer = tracker.create_context(PhaseKind::GenericPacket);
        let outer = tracker.push(host, outer);
        let inner = command(tracker, "inner");
        let inner = tracker.push(host, inner);
        tracker.set_block(host, at(3), STONE, ChangeFlag::ALL).unwrap();

        tracker.pop(host, outer);
        assert!(tracker.is_empty());
        // The inner handle is stale now.
        tracker.pop(host, inner);
    });

    let d = h.tracker.diagnostics();
    assert_eq!(d.mismatched_pops, 2);
    assert_eq!(h.world.block(at(3)), STONE);
    assert_eq!(h.causes.frame_depth(), 0);
}

#[test]
fn scope_pops_when_the_body_panics() {
    let mut h = Harness::new();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        h.run(|tracker, host| {
            let ctx = tracker.create_context(PhaseKind::GenericPacket);
            tracker.scope(host, ctx, |tracker, host| {
                tracker.set_block(host, at(0), STONE, ChangeFlag::ALL).unwrap();
                if host.world.block(at(0)) == BlockState::AIR {
                    panic!("body failed");
                }
            })
        })
    }));
    assert!(result.is_err());
    assert!(h.tracker.is_empty());
    assert_eq!(h.causes.frame_depth(), 0);
    // Captures are still unwound on the way out.
    assert_eq!(h.world.block(at(0)), STONE);
}

#[test]
fn writes_outside_any_phase_go_straight_through() {
    let mut h = Harness::new();
    let outcome = h.run(|tracker, host| tracker.set_block(host, at(0), STONE, ChangeFlag::ALL));
    assert_eq!(outcome.unwrap(), BlockOutcome::Applied);
    assert_eq!(h.world.block(at(0)), STONE);
    assert!(h.bus.history().is_empty());
}

#[test]
fn reads_see_pending_captures() {
    let mut h = Harness::new();
    h.run(|tracker, host| {
        let ctx = tracker.create_context(PhaseKind::GenericPacket);
        let handle = tracker.push(host, ctx);
        tracker.set_block(host, at(0), STONE, ChangeFlag::ALL).unwrap();
        assert_eq!(tracker.block_state(host, at(0)), STONE);
        assert_eq!(host.world.block(at(0)), BlockState::AIR);
        tracker.pop(host, handle);
        assert_eq!(tracker.block_state(host, at(0)), STONE);
    });
}

#[test]
fn world_unload_never_captures() {
    let mut h = Harness::new();
    h.run(|tracker, host| {
        let ctx = tracker.create_context(PhaseKind::WorldUnload);
        let handle = tracker.push(host, ctx);
        let outcome = tracker.set_block(host, at(0), STONE, ChangeFlag::ALL).unwrap();
        assert_eq!(outcome, BlockOutcome::Applied);
        assert!(!tracker.current().unwrap().context().has_pending_captures());
        let apple = Entity::item(ItemStack::new("apple", 1), Vec3::ZERO);
        let spawned = tracker.spawn_entity(host, apple).unwrap();
        assert!(!spawned);
        tracker.pop(host, handle);
    });
    assert!(h.bus.history().is_empty());
    assert_eq!(h.world.entity_count(), 0);
}

/// World whose writes at one position panic.
struct PoisonedWorld {
    inner: World,
    poison: BlockPos,
}

impl WorldAccess for PoisonedWorld {
    fn block(&self, pos: BlockPos) -> BlockState {
        self.inner.block(pos)
    }

    fn set_block(
        &mut self,
        pos: BlockPos,
        state: BlockState,
        flags: ChangeFlag,
    ) -> Result<BlockState, WorldError> {
        if pos == self.poison {
            panic!("poisoned write at {pos}");
        }
        self.inner.set_block(pos, state, flags)
    }

    fn block_entity(&self, pos: BlockPos) -> Option<BlockEntity> {
        self.inner.block_entity(pos)
    }

    fn set_block_entity(
        &mut self,
        pos: BlockPos,
        block_entity: Option<BlockEntity>,
    ) -> Result<Option<BlockEntity>, WorldError> {
        self.inner.set_block_entity(pos, block_entity)
    }

    fn restore(&mut self, original: &BlockSnapshot) -> Result<(), WorldError> {
        self.inner.restore(original)
    }

    fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.inner.entity(id)
    }

    fn spawn_entity(&mut self, entity: Entity) -> Result<(), WorldError> {
        self.inner.spawn_entity(entity)
    }
}

#[test]
fn panicking_world_is_isolated_to_one_phase() {
    let mut world = PoisonedWorld {
        inner: World::new(),
        poison: at(1),
    };
    let mut bus = ListenerBus::new();
    let mut causes = CauseStack::new();
    let mut tracker = PhaseTracker::default();
    let mut host = Host::new(&mut world, &mut bus, &mut causes);

    let ctx = tracker.create_context(PhaseKind::GenericPacket);
    let handle = tracker.push(&mut host, ctx);
    for x in 0..3 {
        tracker.set_block(&mut host, at(x), STONE, ChangeFlag::ALL).unwrap();
    }
    tracker.pop(&mut host, handle);

    assert!(tracker.is_empty());
    assert_eq!(tracker.diagnostics().unwind_failures, 1);
    assert_eq!(host.causes.frame_depth(), 0);
    assert_eq!(host.world.block(at(0)), STONE);
    assert_eq!(host.world.block(at(2)), BlockState::AIR);

    // The tracker keeps working afterwards.
    let ctx = tracker.create_context(PhaseKind::GenericPacket);
    let handle = tracker.push(&mut host, ctx);
    tracker.set_block(&mut host, at(5), STONE, ChangeFlag::ALL).unwrap();
    tracker.pop(&mut host, handle);
    assert_eq!(host.world.block(at(5)), STONE);
    assert_eq!(tracker.diagnostics().unwind_failures, 1);
}

#[test]
fn backtraces_are_captured_when_configured() {
    let config = TrackerConfig {
        generate_stacktrace_per_phase: true,
        ..TrackerConfig::default()
    };
    let mut h = Harness::with_config(config);
    h.run(|tracker, host| {
        let ctx = tracker.create_context(PhaseKind::GenericPacket);
        let handle = tracker.push(host, ctx);
        assert!(tracker.current().unwrap().context().backtrace().is_some());
        tracker.pop(host, handle);
    });
}

#[test]
fn dump_lists_frames_innermost_first() {
    let mut h = Harness::new();
    h.run(|tracker, host| {
        let outer = tracker.create_context(PhaseKind::GenericPacket);
        let outer = tracker.push(host, outer);
        let inner = command(tracker, "inner");
        let inner = tracker.push(host, inner);

        let dump = tracker.dump("inspect");
        assert_eq!(dump.frames.len(), 2);
        assert_eq!(dump.frames[0].phase, PhaseKind::Command);
        assert_eq!(dump.frames[1].phase, PhaseKind::GenericPacket);
        assert!(dump.to_string().contains("inspect"));

        tracker.pop(host, inner);
        tracker.pop(host, outer);
    });
}

/// Runs one tracked write whose world reaction panics, then two cascades
/// outside any phase.
fn cascades_after_a_panicking_reaction(panic_first: bool) -> (Harness, usize) {
    let config = TrackerConfig {
        max_block_processing_depth: 3,
        ..TrackerConfig::default()
    };
    let mut world = World::new();
    world.add_rule(ReactionRule::grow_up(STONE));
    world.add_rule(ReactionRule::new("unstable", |_, _, new| {
        if new.state == DIRT {
            panic!("unstable block at {}", new.pos);
        }
        Vec::new()
    }));
    let mut h = Harness::with_world(world, config);

    if panic_first {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            h.run(|tracker, host| {
                let ctx = tracker
                    .create_context(PhaseKind::GenericPacket)
                    .bulk_block_captures(false);
                tracker.scope(host, ctx, |tracker, host| {
                    tracker.set_block(host, at(9), DIRT, ChangeFlag::ALL)
                })
            })
        }));
        assert!(result.is_err());
        assert!(h.tracker.is_empty());
    }

    for x in [0, 5] {
        h.run(|tracker, host| tracker.set_block(host, BlockPos::new(x, 0, 0), STONE, ChangeFlag::ALL))
            .unwrap();
    }
    let height = (0..8)
        .take_while(|y| h.world.block(BlockPos::new(0, *y, 0)) == STONE)
        .count();
    (h, height)
}

#[test]
fn panicking_reaction_leaves_direct_depth_balanced() {
    let (baseline, baseline_height) = cascades_after_a_panicking_reaction(false);
    let (h, height) = cascades_after_a_panicking_reaction(true);

    assert_eq!(baseline_height, 4);
    assert_eq!(height, baseline_height);
    assert_eq!(baseline.tracker.diagnostics().depth_overflows, 2);
    assert_eq!(h.tracker.diagnostics().depth_overflows, 2);
    assert_eq!(h.world.block(BlockPos::new(5, 3, 0)), STONE);
    assert_eq!(h.world.block(BlockPos::new(5, 4, 0)), BlockState::AIR);
}
