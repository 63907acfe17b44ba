// SPDX-License-Identifier: MIT OR Apache-2.0
//! Engine limits.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default step budget for a run, shared with nested subgraph runs
pub const DEFAULT_MAX_ITERATIONS: usize = 2000;

/// Default limit on nested subgraph runs
pub const DEFAULT_MAX_SUBGRAPH_DEPTH: usize = 16;

/// Limits applied to every run of a graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Execute steps allowed before a run is treated as runaway
    pub max_iterations: usize,
    /// How deep subgraph runs may nest
    pub max_subgraph_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_subgraph_depth: DEFAULT_MAX_SUBGRAPH_DEPTH,
        }
    }
}

impl EngineConfig {
    /// Serialize to RON format
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// Deserialize from RON format. Missing fields keep their defaults.
    pub fn from_ron(s: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(s)
    }

    /// Load from a RON file
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save to a RON file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = self
            .to_ron()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }
}
