//! Builder configuration
//!
//! Loaded from TOML, optionally overridden from `DFOREST_*` environment
//! variables:
//!
//! ```toml
//! [arena]
//! chunk_size = 65536
//! preallocate = false
//!
//! [limits]
//! max_trees = 100000
//! max_nodes_per_tree = 16777216
//! ```

use crate::arena::DEFAULT_CHUNK_SIZE;
use crate::errors::{DtreeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Builder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BuilderConfig {
    /// Scratch arena configuration
    pub arena: ArenaConfig,
    /// Size limits enforced by the builder
    pub limits: LimitsConfig,
}

/// Scratch arena configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Bytes per chunk, also the largest single scratch allocation
    pub chunk_size: usize,
    /// Allocate the first chunk when the builder is created
    pub preallocate: bool,
}

/// Size limits enforced by the builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Most trees one model may declare
    pub max_trees: usize,
    /// Most nodes one tree table may hold
    pub max_nodes_per_tree: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            preallocate: false,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_trees: 100_000,
            max_nodes_per_tree: 1 << 24,
        }
    }
}

impl BuilderConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| DtreeError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading builder configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DtreeError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `DFOREST_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("DFOREST_ARENA_CHUNK_SIZE") {
            self.arena.chunk_size = parse_var("DFOREST_ARENA_CHUNK_SIZE", &value)?;
        }
        if let Some(value) = lookup("DFOREST_ARENA_PREALLOCATE") {
            self.arena.preallocate = parse_var("DFOREST_ARENA_PREALLOCATE", &value)?;
        }
        if let Some(value) = lookup("DFOREST_MAX_TREES") {
            self.limits.max_trees = parse_var("DFOREST_MAX_TREES", &value)?;
        }
        if let Some(value) = lookup("DFOREST_MAX_NODES_PER_TREE") {
            self.limits.max_nodes_per_tree = parse_var("DFOREST_MAX_NODES_PER_TREE", &value)?;
        }
        Ok(())
    }

    /// Validate configuration.
    ///
    /// Unusable values are errors; questionable ones come back as warnings.
    pub fn validate(&self) -> Result<Vec<String>> {
        if self.arena.chunk_size == 0 {
            return Err(DtreeError::Config("arena chunk size is 0".to_string()));
        }
        if self.limits.max_trees == 0 {
            return Err(DtreeError::Config("max_trees is 0".to_string()));
        }
        if self.limits.max_nodes_per_tree == 0 {
            return Err(DtreeError::Config("max_nodes_per_tree is 0".to_string()));
        }

        let mut warnings = Vec::new();
        if self.arena.chunk_size < 1024 {
            warnings.push(format!(
                "Arena chunk size {} is small, scratch allocations will spill often",
                self.arena.chunk_size
            ));
        }
        if self.limits.max_nodes_per_tree > i32::MAX as usize {
            warnings.push(
                "max_nodes_per_tree exceeds what 32-bit readers can index".to_string(),
            );
        }

        if !warnings.is_empty() {
            warn!("Configuration validation warnings: {:?}", warnings);
        }
        Ok(warnings)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DtreeError::Config(format!("{key} has invalid value {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_validate() {
        let config = BuilderConfig::default();
        assert_eq!(config.arena.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = BuilderConfig::from_toml_str("[arena]\nchunk_size = 4096\n").unwrap();
        assert_eq!(config.arena.chunk_size, 4096);
        assert!(!config.arena.preallocate);
        assert_eq!(config.limits, LimitsConfig::default());
        assert!(BuilderConfig::from_toml_str("[arena]\nchunk_size = \"big\"").is_err());
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("builder.toml");

        let mut config = BuilderConfig::default();
        config.limits.max_trees = 12;
        config.arena.preallocate = true;
        config.save_to_file(&path).unwrap();

        assert_eq!(BuilderConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DFOREST_ARENA_CHUNK_SIZE", "512"),
            ("DFOREST_MAX_TREES", " 7 "),
        ]);
        let mut config = BuilderConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.arena.chunk_size, 512);
        assert_eq!(config.limits.max_trees, 7);
        assert_eq!(config.validate().unwrap().len(), 1);

        let bad: HashMap<&str, &str> = HashMap::from([("DFOREST_ARENA_PREALLOCATE", "maybe")]);
        assert!(config
            .apply_overrides(|key| bad.get(key).map(|v| v.to_string()))
            .is_err());
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = BuilderConfig::default();
        config.arena.chunk_size = 0;
        assert!(matches!(config.validate(), Err(DtreeError::Config(_))));
    }
}
