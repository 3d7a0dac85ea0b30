//! Depth-first replay of captured block changes.

mod common;

use std::collections::HashMap;

use common::{Harness, STONE, at};
use phasetrack_common::{ActorId, BlockPos, BlockState, ChangeFlag};
use phasetrack_kernel::{Mutation, ReactionRule, World, WorldAccess};
use phasetrack_tracker::{
    BlockOutcome, CommandSource, Event, PhaseKind, Source, TrackerConfig,
};
use proptest::prelude::*;

/// Placing at a key position places every child listed for it.
fn cascade(children: HashMap<BlockPos, Vec<BlockPos>>) -> ReactionRule {
    ReactionRule::new("cascade", move |_, _, new| {
        children
            .get(&new.pos)
            .map(|kids| kids.iter().map(|p| Mutation::set_block(*p, STONE)).collect())
            .unwrap_or_default()
    })
}

fn place_all(h: &mut Harness, kind: PhaseKind, positions: &[BlockPos]) {
    h.run(|tracker, host| {
        let ctx = tracker.create_context(kind);
        let handle = tracker.push(host, ctx);
        for pos in positions {
            let outcome = tracker.set_block(host, *pos, STONE, ChangeFlag::ALL).unwrap();
            assert_eq!(outcome, BlockOutcome::Captured);
        }
        tracker.pop(host, handle);
    });
}

#[test]
fn cascades_apply_depth_first() {
    let (a, b, c, b1, b2) = (at(0), at(1), at(2), at(10), at(11));
    let mut world = World::new();
    world.add_rule(cascade(HashMap::from([(b, vec![b1, b2])])));
    let mut h = Harness::with_world(world, TrackerConfig::default());
    let batches = h.record_batches();

    place_all(&mut h, PhaseKind::GenericPacket, &[a, b, c]);

    assert_eq!(h.written(), vec![a, b, b1, b2, c]);
    assert_eq!(*batches.borrow(), vec![vec![a, b, c], vec![b1, b2]]);
    assert!(h.tracker.is_empty());
}

#[test]
fn depth_limit_writes_the_rest_silently() {
    let config = TrackerConfig {
        max_block_processing_depth: 3,
        ..TrackerConfig::default()
    };
    let mut world = World::new();
    world.add_rule(ReactionRule::grow_up(STONE));
    let mut h = Harness::with_world(world, config);

    let base = BlockPos::new(0, 0, 0);
    place_all(&mut h, PhaseKind::GenericPacket, &[base]);

    assert_eq!(h.bus.count("change-block"), 4);
    assert_eq!(h.tracker.diagnostics().depth_overflows, 1);
    for y in 0..=4 {
        assert_eq!(h.world.block(BlockPos::new(0, y, 0)), STONE, "y = {y}");
    }
    assert_eq!(h.world.block(BlockPos::new(0, 5, 0)), BlockState::AIR);
}

#[test]
fn rejected_change_is_restored_and_untracked() {
    let mut h = Harness::new();
    h.bus.listen("reject-second", |event| {
        if let Event::ChangeBlock(change) = event {
            change.invalidate(1);
        }
        Ok(())
    });
    let actor = ActorId::new();
    let positions = [at(0), at(1), at(2)];

    h.run(|tracker, host| {
        let ctx = tracker
            .create_context(PhaseKind::Command)
            .source(Source::Command(CommandSource::new("fill", Some(actor))));
        let handle = tracker.push(host, ctx);
        for pos in positions {
            tracker.set_block(host, pos, STONE, ChangeFlag::ALL).unwrap();
        }
        tracker.pop(host, handle);
    });

    assert_eq!(h.written(), vec![at(0), at(2)]);
    assert_eq!(h.restored(), vec![at(1)]);
    assert_eq!(h.world.block(at(1)), BlockState::AIR);
    assert_eq!(h.world.tracked_positions(), 2);
    assert_eq!(h.world.tracking(at(0)).owner, Some(actor));
    assert_eq!(h.world.tracking(at(1)).owner, None);
}

#[test]
fn verdicts_follow_positions_when_listeners_reshape_the_batch() {
    let mut h = Harness::new();
    h.bus.listen("drop-first-reject-second", |event| {
        if let Event::ChangeBlock(change) = event {
            change.transactions.remove(0);
            change.transactions.reverse();
            change.invalidate_where(|t| t.proposed.pos == at(1));
        }
        Ok(())
    });
    place_all(&mut h, PhaseKind::GenericPacket, &[at(0), at(1), at(2)]);

    // Entries a listener removes count as rejected.
    assert_eq!(h.written(), vec![at(2)]);
    assert_eq!(h.restored(), vec![at(1), at(0)]);
    assert_eq!(h.world.block(at(0)), BlockState::AIR);
    assert_eq!(h.world.block(at(1)), BlockState::AIR);
    assert_eq!(h.world.block(at(2)), STONE);
}

#[test]
fn cancelled_batch_restores_in_reverse() {
    let mut h = Harness::new();
    h.bus.listen("cancel-all", |event| {
        event.cancel();
        Ok(())
    });
    place_all(&mut h, PhaseKind::GenericPacket, &[at(0), at(1), at(2)]);

    assert!(h.written().is_empty());
    assert_eq!(h.restored(), vec![at(2), at(1), at(0)]);
    assert_eq!(h.world.block_count(), 0);
}

#[test]
fn recapturing_a_position_keeps_its_first_original() {
    let mut h = Harness::new();
    let batches = h.record_batches();
    h.run(|tracker, host| {
        let ctx = tracker.create_context(PhaseKind::GenericPacket);
        let handle = tracker.push(host, ctx);
        tracker.set_block(host, at(0), STONE, ChangeFlag::ALL).unwrap();
        tracker.set_block(host, at(1), STONE, ChangeFlag::ALL).unwrap();
        tracker.set_block(host, at(0), BlockState(9), ChangeFlag::ALL).unwrap();
        tracker.pop(host, handle);
    });

    let Some(Event::ChangeBlock(change)) = h.bus.history().first() else {
        panic!("expected a change event");
    };
    assert_eq!(change.transactions.len(), 2);
    assert_eq!(change.transactions[0].original.state, BlockState::AIR);
    assert_eq!(change.transactions[0].proposed.state, BlockState(9));
    assert_eq!(*batches.borrow(), vec![vec![at(0), at(1)]]);
    assert_eq!(h.world.block(at(0)), BlockState(9));
}

#[test]
fn tracked_phase_without_bulk_capture_posts_per_change() {
    let mut h = Harness::new();
    let outcomes = h.run(|tracker, host| {
        let ctx = tracker
            .create_context(PhaseKind::GenericPacket)
            .bulk_block_captures(false);
        let handle = tracker.push(host, ctx);
        let first = tracker.set_block(host, at(0), STONE, ChangeFlag::ALL).unwrap();
        let second = tracker.set_block(host, at(1), STONE, ChangeFlag::ALL).unwrap();
        tracker.pop(host, handle);
        [first, second]
    });
    assert_eq!(outcomes, [BlockOutcome::Tracked, BlockOutcome::Tracked]);
    assert_eq!(h.bus.count("change-block"), 2);
}

/// Node `i` sits at x = i. Parents always precede children, so the capture
/// order of roots and siblings is index order.
fn tree() -> impl Strategy<Value = Vec<Option<usize>>> {
    (1usize..24).prop_flat_map(|n| {
        proptest::collection::vec((any::<bool>(), any::<proptest::sample::Index>()), n).prop_map(
            |picks| {
                picks
                    .into_iter()
                    .enumerate()
                    .map(|(i, (root, parent))| (i > 0 && !root).then(|| parent.index(i)))
                    .collect()
            },
        )
    })
}

fn preorder(node: usize, children: &[Vec<usize>], out: &mut Vec<BlockPos>) {
    out.push(at(node as i32));
    for &child in &children[node] {
        preorder(child, children, out);
    }
}

proptest! {
    #[test]
    fn replay_order_is_preorder(parents in tree()) {
        let mut children = vec![Vec::new(); parents.len()];
        let mut roots = Vec::new();
        for (i, parent) in parents.iter().enumerate() {
            match parent {
                Some(p) => children[*p].push(i),
                None => roots.push(i),
            }
        }
        let edges: HashMap<BlockPos, Vec<BlockPos>> = children
            .iter()
            .enumerate()
            .filter(|(_, kids)| !kids.is_empty())
            .map(|(i, kids)| (at(i as i32), kids.iter().map(|k| at(*k as i32)).collect()))
            .collect();

        let mut world = World::new();
        world.add_rule(cascade(edges));
        let mut h = Harness::with_world(world, TrackerConfig::default());
        let root_positions: Vec<BlockPos> = roots.iter().map(|r| at(*r as i32)).collect();
        place_all(&mut h, PhaseKind::GenericPacket, &root_positions);

        let mut expected = Vec::new();
        for root in roots {
            preorder(root, &children, &mut expected);
        }
        prop_assert_eq!(h.written(), expected);
    }

    #[test]
    fn batch_order_is_first_capture_order(xs in proptest::collection::vec(0i32..8, 1..20)) {
        let mut h = Harness::new();
        let batches = h.record_batches();
        let positions: Vec<BlockPos> = xs.iter().map(|x| at(*x)).collect();
        h.run(|tracker, host| {
            let ctx = tracker.create_context(PhaseKind::GenericPacket);
            let handle = tracker.push(host, ctx);
            for pos in &positions {
                tracker.set_block(host, *pos, STONE, ChangeFlag::ALL).unwrap();
            }
            tracker.pop(host, handle);
        });

        let mut distinct = Vec::new();
        for pos in positions {
            if !distinct.contains(&pos) {
                distinct.push(pos);
            }
        }
        prop_assert_eq!(batches.borrow().clone(), vec![distinct.clone()]);
        prop_assert_eq!(h.written(), distinct);
    }
}
