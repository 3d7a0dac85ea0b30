//! Developer tooling: read-only inspectors for the world, the phase stack and
//! the events a run produced.
//!
//! # Invariants
//! - Inspectors never mutate what they inspect.
//! - Every summary has a one-line `Display` suitable for logs.

pub mod inspector;

pub use inspector::{
    EntityInfo, EventTally, PositionInfo, TrackerInspector, TrackerSummary, WorldInspector,
    WorldSummary,
};

pub fn crate_info() -> &'static str {
    concat!("phasetrack-tools v", env!("CARGO_PKG_VERSION"))
}
