//! Locating the configuration file.
//!
//! The schema itself lives in [`kvfs::config`]; this module only decides which file to read.

use std::path::{Path, PathBuf};

use kvfs::config::{ConfigError, VfsConfig};
use tracing::debug;

/// Returns config file paths in descending priority order.
/// On macOS, skips `dirs::config_dir()` (resolves to ~/Library/Application Support/).
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(not(target_os = "macos"))]
    if let Some(xdg) = dirs::config_dir() {
        paths.push(xdg.join("kvfs").join("config.toml"));
    }

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config").join("kvfs").join("config.toml"));
    }

    paths.push(PathBuf::from("/etc/kvfs/config.toml"));

    paths
}

/// Finds the first existing config file from search paths.
fn find_config_file() -> Option<PathBuf> {
    config_search_paths().into_iter().find(|p| p.exists())
}

/// Loads configuration from the external path if given, otherwise from the first config file
/// found, otherwise the defaults.
pub fn load(external_config_path: Option<&Path>) -> Result<VfsConfig, ConfigError> {
    if let Some(path) = external_config_path {
        return VfsConfig::load_from_file(path);
    }
    match find_config_file() {
        Some(path) => VfsConfig::load_from_file(&path),
        None => {
            debug!("No configuration file found, using defaults.");
            Ok(VfsConfig::default())
        }
    }
}
