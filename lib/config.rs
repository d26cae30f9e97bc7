//! Tunables for a [`crate::fs::Vfs`] instance.
//!
//! Configurations may be loaded from a TOML file; every field has a default.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

fn default_symlink_depth() -> usize {
    16
}

fn default_max_fds() -> usize {
    32
}

fn default_name_max() -> usize {
    128
}

fn default_path_max() -> usize {
    4096
}

fn default_page_size() -> usize {
    4096
}

fn default_capacity() -> usize {
    1 << 16
}

/// Sizing of one object cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Maximum number of live objects. Exhausting it triggers an eviction pass.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

/// VFS configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VfsConfig {
    /// Maximum symlink resolution depth.
    #[serde(default = "default_symlink_depth")]
    pub symlink_depth: usize,

    /// Descriptor slots per process.
    #[serde(default = "default_max_fds")]
    pub max_fds: usize,

    /// Path components must be shorter than this many bytes.
    #[serde(default = "default_name_max")]
    pub name_max: usize,

    /// Whole paths may be at most this many bytes.
    #[serde(default = "default_path_max")]
    pub path_max: usize,

    /// Page-cache page size in bytes.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Dentry cache sizing.
    #[serde(default)]
    pub dcache: CacheConfig,

    /// Inode cache sizing.
    #[serde(default)]
    pub icache: CacheConfig,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            symlink_depth: default_symlink_depth(),
            max_fds: default_max_fds(),
            name_max: default_name_max(),
            path_max: default_path_max(),
            page_size: default_page_size(),
            dcache: CacheConfig::default(),
            icache: CacheConfig::default(),
        }
    }
}

/// Failure to load a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document parsed but failed [`VfsConfig::validate`].
    #[error("Configuration validation errors: {0:?}")]
    ValidationErrors(Vec<String>),

    /// The document is not valid TOML for this schema.
    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    /// The file could not be read.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl VfsConfig {
    /// Validate the correctness of the configuration.
    ///
    /// Returns:
    /// - `Ok(())` if the configuration is valid.
    /// - `Err(Vec<String>)` containing every validation error message otherwise.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (name, value) in [
            ("max-fds", self.max_fds),
            ("name-max", self.name_max),
            ("path-max", self.path_max),
            ("page-size", self.page_size),
            ("dcache.capacity", self.dcache.capacity),
            ("icache.capacity", self.icache.capacity),
        ] {
            if value == 0 {
                errors.push(format!("'{name}' must be greater than zero."));
            }
        }

        if !self.page_size.is_power_of_two() {
            errors.push(format!(
                "'page-size' must be a power of two, got {}.",
                self.page_size
            ));
        }

        if self.name_max >= self.path_max {
            errors.push(format!(
                "'name-max' ({}) must be smaller than 'path-max' ({}).",
                self.name_max, self.path_max
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate().map_err(ConfigError::ValidationErrors)?;
        Ok(config)
    }

    /// Loads and validates config from a single TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
