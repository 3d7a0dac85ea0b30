#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use phasetrack_common::{BlockPos, BlockState};
use phasetrack_kernel::{World, WorldEvent};
use phasetrack_tracker::{CauseStack, Event, Host, ListenerBus, PhaseTracker, TrackerConfig};

pub const STONE: BlockState = BlockState(1);
pub const DIRT: BlockState = BlockState(2);

/// A world, a bus, a cause stack and a tracker wired together.
pub struct Harness {
    pub world: World,
    pub bus: ListenerBus,
    pub causes: CauseStack,
    pub tracker: PhaseTracker,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    pub fn with_config(config: TrackerConfig) -> Self {
        Self::with_world(World::new(), config)
    }

    pub fn with_world(world: World, config: TrackerConfig) -> Self {
        Self {
            world,
            bus: ListenerBus::new(),
            causes: CauseStack::new(),
            tracker: PhaseTracker::new(config),
        }
    }

    pub fn run<R>(&mut self, f: impl FnOnce(&mut PhaseTracker, &mut Host<'_>) -> R) -> R {
        let mut host = Host::new(&mut self.world, &mut self.bus, &mut self.causes);
        f(&mut self.tracker, &mut host)
    }

    /// Positions written, in write order. Restores are not included.
    pub fn written(&self) -> Vec<BlockPos> {
        self.world
            .events()
            .iter()
            .filter_map(|e| match e {
                WorldEvent::BlockChanged { pos, .. } => Some(*pos),
                _ => None,
            })
            .collect()
    }

    pub fn restored(&self) -> Vec<BlockPos> {
        self.world
            .events()
            .iter()
            .filter_map(|e| match e {
                WorldEvent::BlockRestored { pos, .. } => Some(*pos),
                _ => None,
            })
            .collect()
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.bus.history().iter().map(Event::name).collect()
    }

    /// Record the proposed positions of every change event as it is posted.
    pub fn record_batches(&mut self) -> Rc<RefCell<Vec<Vec<BlockPos>>>> {
        let batches = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&batches);
        self.bus.listen("batch-recorder", move |event| {
            if let Event::ChangeBlock(change) = event {
                let positions = change.transactions.iter().map(|t| t.proposed.pos).collect();
                sink.borrow_mut().push(positions);
            }
            Ok(())
        });
        batches
    }
}

pub fn at(x: i32) -> BlockPos {
    BlockPos::new(x, 0, 0)
}
