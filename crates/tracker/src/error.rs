use phasetrack_kernel::WorldError;

use crate::cause::CauseError;
use crate::context::CaptureKind;
use crate::event::EventError;

/// Errors raised while capturing into or unwinding a phase.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    /// The phase was entered without data its unwind cannot do without.
    #[error("{phase}: expected {what} in the phase context, but none was found")]
    MissingContext {
        phase: &'static str,
        what: &'static str,
    },
    #[error("{phase} does not declare a {kind} capture buffer")]
    CaptureNotDeclared {
        phase: &'static str,
        kind: CaptureKind,
    },
    #[error("world collaborator failed: {0}")]
    World(#[from] WorldError),
    #[error("event bus failed: {0}")]
    Event(#[from] EventError),
    #[error("cause stack failed: {0}")]
    Cause(#[from] CauseError),
    #[error("unwind panicked: {0}")]
    Panicked(String),
}

impl PhaseError {
    pub fn missing(phase: &'static str, what: &'static str) -> Self {
        Self::MissingContext { phase, what }
    }

    /// Missing context signals an integration defect rather than a runtime failure.
    pub fn is_integration_defect(&self) -> bool {
        matches!(
            self,
            Self::MissingContext { .. } | Self::CaptureNotDeclared { .. }
        )
    }
}

/// Errors loading tracker configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
