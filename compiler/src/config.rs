//! Rolling configuration.
//!
//! Every switch of the transformation lives in one `RollingConfig` that is
//! passed explicitly to the pass, the graph builder and the code generators.
//! Configuration files are TOML with a `[rolling]` section:
//!
//! ```toml
//! [rolling]
//! always-roll = false
//! size-threshold = 2
//! match-alignment = false
//! extensions = true
//! max-mismatches = 4
//! dump-graphs = "target/graphs"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The raw TOML structure
#[derive(Debug, Deserialize)]
struct RawConfig {
    rolling: Option<RollingConfig>,
}

/// Switches consulted by the loop roller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RollingConfig {
    /// Roll whenever the code can be rolled, ignoring the cost model
    pub always_roll: bool,
    /// Required size reduction before a rolled loop is kept
    pub size_threshold: i64,
    /// Loads and stores only align when their alignment attributes agree
    pub match_alignment: bool,
    /// Enable min/max reductions and region rolling
    pub extensions: bool,
    /// Graphs with this many mismatch nodes or more are never profitable
    pub max_mismatches: usize,
    /// Write a dot file per aligned graph into this directory
    pub dump_graphs: Option<PathBuf>,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            always_roll: false,
            size_threshold: 2,
            match_alignment: false,
            extensions: false,
            max_mismatches: 4,
            dump_graphs: None,
        }
    }
}

impl RollingConfig {
    /// Configuration with the experimental extensions switched on
    pub fn with_extensions() -> Self {
        Self {
            extensions: true,
            ..Self::default()
        }
    }

    /// Parse a configuration file's contents. A file without a
    /// `[rolling]` section yields the defaults.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| format!("Failed to parse rolling config: {}", e))?;
        Ok(raw.rolling.unwrap_or_default())
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::from_toml(&content)
    }
}
