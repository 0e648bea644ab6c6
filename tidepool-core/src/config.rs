//! Runtime Configuration
//!
//! Tunables for a [`Runtime`](crate::reactive::Runtime). Configuration can be
//! built in code or loaded from JSON; missing fields fall back to defaults.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default bound on flush rounds before giving up.
pub const DEFAULT_MAX_UPDATE_DEPTH: usize = 100;

/// Settings for a reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of fixpoint rounds a single flush may take.
    ///
    /// Each round runs the computations made dirty by the previous one.
    /// Exceeding the bound aborts the flush with
    /// [`MaxUpdateDepthExceeded`](crate::ReactiveError::MaxUpdateDepthExceeded).
    pub max_update_depth: usize,

    /// Emit a `warn` event when a computation body fails.
    pub log_computation_errors: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_update_depth: DEFAULT_MAX_UPDATE_DEPTH,
            log_computation_errors: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Override the update depth bound.
    pub fn with_max_update_depth(mut self, depth: usize) -> Self {
        self.max_update_depth = depth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_update_depth, 100);
        assert!(config.log_computation_errors);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json(r#"{ "max_update_depth": 8 }"#).unwrap();
        assert_eq!(config.max_update_depth, 8);
        assert!(config.log_computation_errors);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(RuntimeConfig::from_json("{ max_update_depth").is_err());
    }
}
