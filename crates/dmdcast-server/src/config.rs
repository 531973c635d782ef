use std::path::Path;

use anyhow::{Context, Result};
use dmdcast_core::DmdConfig;
use serde::Deserialize;

/// Server configuration loaded from a TOML file. CLI flags override
/// individual fields after loading.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name or address to listen on.
    pub addr: String,

    /// TCP port to listen on.
    pub port: u16,

    /// Fixed alt-color path, overriding paths transmitted by producers.
    pub alt_color_path: String,

    /// Fixed PuP videos path, overriding paths transmitted by producers.
    pub pup_videos_path: String,

    /// Keep retrying display discovery instead of exiting when none is
    /// attached.
    pub wait_for_displays: bool,

    /// DMD pipeline settings.
    pub dmd: DmdConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "localhost".to_string(),
            port: 6789,
            alt_color_path: String::new(),
            pup_videos_path: String::new(),
            wait_for_displays: false,
            dmd: DmdConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }
}
