//! Phase Tracker: reentrant, stack-based interception of world mutations.
//!
//! While a phase is active, block writes, spawns and drops are captured in
//! the phase's context instead of hitting the world. Popping the phase
//! publishes the captures as cancellable batch events and replays whatever
//! survives, depth first.
//!
//! # Invariants
//! - Every pushed phase is unwound exactly once and then removed, even if
//!   its unwind fails or panics.
//! - A position is captured at most once per buffer; the first original wins.
//! - A rejected change restores only its own position.
//! - An empty capture buffer never produces an event.
//! - Replay nesting is bounded by `max-block-processing-depth`.

pub mod capture;
pub mod cause;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod event;
mod replay;
pub mod resync;
pub mod state;
pub mod tracker;
pub mod transaction;
pub mod unwind;

pub use capture::{CaptureBuffer, CaptureSupplier, ListMultimap};
pub use cause::{Cause, CauseStack, CauseValue, ContextKey, SpawnType};
pub use config::TrackerConfig;
pub use context::{CaptureKind, CommandSource, PhaseContext, Source};
pub use diagnostics::{Diagnostics, PhaseDump};
pub use error::{ConfigError, PhaseError};
pub use event::{DropKind, Event, EventBus, EventError, ListenerBus};
pub use resync::{OffThreadRequest, ResyncHandle, ResyncQueue};
pub use state::{PhaseKind, PhaseState};
pub use tracker::{BlockOutcome, Host, PhaseHandle, PhaseTracker};
pub use transaction::{BlockLog, BlockTransaction};
pub use unwind::{SpawnCategory, Unwinder};
