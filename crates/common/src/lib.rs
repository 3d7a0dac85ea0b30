//! Shared value types for the phase tracker and the world it guards.
//!
//! # Invariants
//! - Every type here is plain data: cloneable, comparable and serializable.
//! - Positions and ids order deterministically so maps keyed by them iterate stably.

pub mod block;
pub mod entity;
pub mod types;

pub use block::{BlockChange, BlockEntity, BlockSnapshot, BlockState};
pub use entity::{Entity, EntityKind, ItemDrop, ItemStack};
pub use types::{ActorId, BlockPos, ChangeFlag, EntityId};
