//! Executor configuration
//!
//! Tracking mode is fixed per executor at construction time and only changes
//! through an explicit [`Graph::restart`](crate::autograd::Graph::restart).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for a [`Graph`](crate::autograd::Graph) executor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Record a backward step for every kernel invocation
    pub track_gradients: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            track_gradients: true,
        }
    }
}

impl GraphConfig {
    /// Create a configuration with gradient tracking enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward-only configuration
    pub fn inference() -> Self {
        Self {
            track_gradients: false,
        }
    }

    /// Set gradient tracking
    pub fn with_tracking(mut self, track_gradients: bool) -> Self {
        self.track_gradients = track_gradients;
        self
    }

    /// Parse a configuration from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::ConfigError(e.to_string()))
    }

    /// Load a configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }
}
