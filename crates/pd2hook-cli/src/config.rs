//! Loading `RuntimeConfig` from a TOML file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use pd2hook_core::RuntimeConfig;
use tracing::{info, warn};

/// Load the runtime configuration, falling back to defaults when the file
/// does not exist.
pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Config file {:?} not found, using defaults", path);
            return Ok(RuntimeConfig::default());
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to read config {:?}", path)),
    };

    let config: RuntimeConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse config {:?}", path))?;
    info!("Loaded config from {:?}", path);
    Ok(config)
}
