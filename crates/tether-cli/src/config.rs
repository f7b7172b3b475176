//! Loading `config.toml` from the configuration directory.

use std::path::Path;
use tether_types::config::TetherConfig;
use tracing::{info, warn};

/// Name of the optional settings file inside the configuration directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Load `<conf_dir>/config.toml`, falling back to defaults when the file is
/// missing or invalid.
pub fn load_config(conf_dir: &Path) -> TetherConfig {
    let path = conf_dir.join(CONFIG_FILE);
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return TetherConfig::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(contents) => match TetherConfig::from_toml(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to parse config, using defaults"
                );
                TetherConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %path.display(),
                "Failed to read config file, using defaults"
            );
            TetherConfig::default()
        }
    }
}
