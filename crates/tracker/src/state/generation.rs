//! World generation. Changes go straight to the world with no events.

use phasetrack_common::Entity;

use crate::cause::{CauseStack, CauseValue, ContextKey, SpawnType};
use crate::context::PhaseContext;
use crate::error::PhaseError;
use crate::state::{ModifierChain, PhaseKind, PhaseState, SpawnDecision};
use crate::unwind::Unwinder;

fn push_world_generation(causes: &mut CauseStack, _ctx: &PhaseContext) -> Result<(), PhaseError> {
    causes.add_context(
        ContextKey::SpawnType,
        CauseValue::SpawnType(SpawnType::WorldGeneration),
    );
    Ok(())
}

fn push_populator(causes: &mut CauseStack, ctx: &PhaseContext) -> Result<(), PhaseError> {
    if let Some(name) = ctx.populator_name() {
        causes.add_context(ContextKey::Populator, CauseValue::Text(name.to_string()));
    }
    Ok(())
}

fn generation_context(kind: PhaseKind) -> PhaseContext {
    PhaseContext::new(kind)
        .bulk_block_captures(false)
        .bulk_entity_captures(false)
        .block_events(false)
}

/// Terrain shaping for a freshly generated area.
#[derive(Debug)]
pub struct TerrainGenerationState {
    modifiers: ModifierChain,
}

impl TerrainGenerationState {
    pub fn chain() -> ModifierChain {
        ModifierChain::root().then("world-generation", push_world_generation)
    }

    pub fn new() -> Self {
        Self {
            modifiers: Self::chain(),
        }
    }
}

/// A populator decorating generated terrain (trees, ores, structures).
#[derive(Debug)]
pub struct PopulatorState {
    modifiers: ModifierChain,
}

impl PopulatorState {
    pub fn new() -> Self {
        Self {
            modifiers: TerrainGenerationState::chain().then("populator", push_populator),
        }
    }
}

macro_rules! generation_state {
    ($state:ty, $kind:expr) => {
        impl PhaseState for $state {
            fn kind(&self) -> PhaseKind {
                $kind
            }

            fn create_context(&self) -> PhaseContext {
                generation_context($kind)
            }

            fn frame_modifiers(&self) -> &ModifierChain {
                &self.modifiers
            }

            fn does_drop_event_tracking(&self, _ctx: &PhaseContext) -> bool {
                false
            }

            fn is_world_generation(&self) -> bool {
                true
            }

            fn is_not_reentrant(&self) -> bool {
                false
            }

            fn tracks_owners_and_notifiers(&self) -> bool {
                false
            }

            fn ignores_entity_collisions(&self) -> bool {
                true
            }

            fn does_bulk_block_capture(&self, _ctx: &PhaseContext) -> bool {
                false
            }

            fn does_block_event_tracking(&self, _ctx: &PhaseContext) -> bool {
                false
            }

            fn requires_post(&self) -> bool {
                false
            }

            fn spawn_policy(&self, _ctx: &PhaseContext, _entity: &Entity) -> SpawnDecision {
                SpawnDecision::Direct
            }

            fn unwind(&self, _u: &mut Unwinder<'_, '_>) -> Result<(), PhaseError> {
                Ok(())
            }
        }
    };
}

generation_state!(TerrainGenerationState, PhaseKind::TerrainGeneration);
generation_state!(PopulatorState, PhaseKind::Populator);
