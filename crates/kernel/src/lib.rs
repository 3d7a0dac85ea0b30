//! World Kernel: authoritative block world and the mutation interface the tracker drives.
//!
//! # Invariants
//! - All state mutations flow through explicit operations on [`WorldAccess`].
//! - Every applied mutation is appended to the world event log, in order.
//! - Reactions to a change are returned as [`Mutation`] requests, never applied
//!   behind the caller's back.

pub mod access;
pub mod rules;
pub mod world;

pub use access::{Mutation, TrackerType, WorldAccess, WorldError};
pub use rules::ReactionRule;
pub use world::{World, WorldEvent, splitmix64};
