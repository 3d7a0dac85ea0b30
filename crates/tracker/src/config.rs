use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Default bound on recursive block replay.
pub const DEFAULT_MAX_DEPTH: usize = 1000;

/// Read-only tracker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TrackerConfig {
    /// Always print runaway phases instead of throttling them.
    pub verbose: bool,
    /// Attach the full phase dump to unwind failure logs.
    pub verbose_errors: bool,
    /// Runaway printouts allowed when `verbose` is off.
    pub max_runaway_count: u32,
    /// Maximum number of nested replay passes within one unwind.
    pub max_block_processing_depth: usize,
    /// Capture a backtrace on every phase entry. Expensive.
    pub generate_stacktrace_per_phase: bool,
    /// Re-queue entities spawned off the main thread instead of ignoring them.
    pub capture_async_spawning_entities: bool,
    /// Re-queue commands submitted off the main thread instead of ignoring them.
    pub resync_commands_from_async: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            verbose: true,
            verbose_errors: false,
            max_runaway_count: 3,
            max_block_processing_depth: DEFAULT_MAX_DEPTH,
            generate_stacktrace_per_phase: false,
            capture_async_spawning_entities: true,
            resync_commands_from_async: true,
        }
    }
}

impl TrackerConfig {
    /// Parse a YAML document. Missing keys keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config.sanitized())
    }

    /// Load a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// A zero depth bound would disable replay entirely; reset it.
    pub fn sanitized(mut self) -> Self {
        if self.max_block_processing_depth == 0 {
            tracing::warn!(
                "max-block-processing-depth of 0 is invalid, resetting to {DEFAULT_MAX_DEPTH}"
            );
            self.max_block_processing_depth = DEFAULT_MAX_DEPTH;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let c = TrackerConfig::default();
        assert!(c.verbose);
        assert!(!c.verbose_errors);
        assert_eq!(c.max_runaway_count, 3);
        assert_eq!(c.max_block_processing_depth, 1000);
        assert!(!c.generate_stacktrace_per_phase);
        assert!(c.capture_async_spawning_entities);
        assert!(c.resync_commands_from_async);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let c = TrackerConfig::from_yaml_str("verbose: false\nmax-runaway-count: 7\n").unwrap();
        assert!(!c.verbose);
        assert_eq!(c.max_runaway_count, 7);
        assert_eq!(c.max_block_processing_depth, 1000);
    }

    #[test]
    fn zero_depth_is_reset() {
        let c = TrackerConfig::from_yaml_str("max-block-processing-depth: 0").unwrap();
        assert_eq!(c.max_block_processing_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn yaml_round_trips_through_file() {
        let config = TrackerConfig {
            verbose: false,
            max_block_processing_depth: 12,
            ..TrackerConfig::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_yaml().unwrap().as_bytes()).unwrap();
        let loaded = TrackerConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(matches!(
            TrackerConfig::from_yaml_str("verbose: [not, a, bool]"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
