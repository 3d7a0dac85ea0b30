use std::sync::Arc;

use phasetrack_common::{BlockSnapshot, BlockState, ItemDrop, ItemStack};

use crate::access::{Mutation, WorldAccess};
use crate::world::World;

type ReactFn = dyn Fn(&World, &BlockSnapshot, &BlockSnapshot) -> Vec<Mutation> + Send + Sync;

/// A piece of simulation logic that reacts to an applied block change by
/// requesting further mutations.
#[derive(Clone)]
pub struct ReactionRule {
    name: &'static str,
    react: Arc<ReactFn>,
}

impl ReactionRule {
    pub fn new(
        name: &'static str,
        react: impl Fn(&World, &BlockSnapshot, &BlockSnapshot) -> Vec<Mutation> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            react: Arc::new(react),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn react(&self, world: &World, original: &BlockSnapshot, new: &BlockSnapshot) -> Vec<Mutation> {
        (self.react)(world, original, new)
    }

    /// Blocks of `fragile` break (and drop `item`) when the block under them is removed.
    pub fn fragile(fragile: BlockState, item: &'static str) -> Self {
        Self::new("fragile", move |world, original, new| {
            if original.state.is_air() || !new.state.is_air() {
                return Vec::new();
            }
            let above = new.pos.up();
            if world.block(above) != fragile {
                return Vec::new();
            }
            vec![
                Mutation::set_block(above, BlockState::AIR),
                Mutation::SpawnEntity(ItemDrop::new(ItemStack::new(item, 1), above.center()).create()),
            ]
        })
    }

    /// Every placement of `state` places another one directly above it.
    ///
    /// Never terminates on its own; exists to exercise depth bounds.
    pub fn grow_up(state: BlockState) -> Self {
        Self::new("grow-up", move |_, _, new| {
            if new.state == state {
                vec![Mutation::set_block(new.pos.up(), state)]
            } else {
                Vec::new()
            }
        })
    }
}

impl std::fmt::Debug for ReactionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactionRule").field("name", &self.name).finish()
    }
}
