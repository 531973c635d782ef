use serde::Deserialize;

/// Settings for one DMD, passed explicitly to [`Dmd::new`](crate::Dmd::new).
///
/// Loaded from the `[dmd]` table of the server config file; every field
/// has a default so a missing table works.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DmdConfig {
    /// Native frame width the pipeline normalizes to.
    pub width: u16,

    /// Native frame height.
    pub height: u16,

    /// Machine family flag selecting the SAM level ramp for 4-bit frames.
    pub sam: bool,

    /// Serial panel settings.
    pub serial: SerialConfig,
}

/// Settings for the serial LED-matrix backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Attach a serial panel if one is found.
    pub enable: bool,

    /// Device path. Empty means scan all serial ports.
    pub device: String,

    /// RGB order to program into the panel, 0-5. -1 leaves the panel as is.
    pub rgb_order: i8,

    /// Brightness to program into the panel, 0-255. -1 leaves it as is.
    pub brightness: i16,

    /// Ask the panel to persist rgb_order and brightness in its own
    /// flash. Nothing is written to local disk.
    pub save_settings: bool,
}

impl Default for DmdConfig {
    fn default() -> Self {
        Self {
            width: 128,
            height: 32,
            sam: false,
            serial: SerialConfig::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enable: true,
            device: String::new(),
            rgb_order: -1,
            brightness: -1,
            save_settings: false,
        }
    }
}
