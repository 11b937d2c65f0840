//! Engine configuration and JSON parsing helpers.

use serde::{Deserialize, Serialize};

use crate::error::{PexError, Result};

/// Baked results kept per subject unless configured otherwise.
pub const DEFAULT_BAKED_CACHE_CAPACITY: usize = 5;

/// Inheritance levels walked before a bake gives up.
pub const DEFAULT_MAX_INHERITANCE_DEPTH: u32 = 50;

/// Tunables for a `PermissionService`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct PexConfig {
    /// Log every permission, option and parent check at info level.
    pub debug: bool,
    /// Per-subject LRU bound on baked context sets.
    pub baked_cache_capacity: usize,
    /// Longest parent chain a bake will follow.
    pub max_inheritance_depth: u32,
}

impl Default for PexConfig {
    fn default() -> Self {
        PexConfig {
            debug: false,
            baked_cache_capacity: DEFAULT_BAKED_CACHE_CAPACITY,
            max_inheritance_depth: DEFAULT_MAX_INHERITANCE_DEPTH,
        }
    }
}

impl PexConfig {
    pub fn validate(&self) -> Result<()> {
        if self.baked_cache_capacity == 0 {
            return Err(PexError::Config(
                "baked-cache-capacity must be at least 1".to_string(),
            ));
        }
        if self.max_inheritance_depth == 0 {
            return Err(PexError::Config(
                "max-inheritance-depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse and validate a config from a JSON string. Missing keys take defaults.
pub fn parse_config(json: &str) -> Result<PexConfig> {
    let config: PexConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}
