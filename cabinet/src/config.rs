use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

/// Tunables for the engine. Every field has a default, so a config file only needs to list what
/// it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the idle sweep runs.
    pub sweep_interval_secs: u64,
    /// How long a session may go untouched before the sweep reclaims it.
    pub instance_timeout_secs: u64,
    /// Core ticks per rendered frame.
    pub ticks_per_frame: u32,
    /// Playback rate of multi-frame animations.
    pub gif_fps: u32,
    /// Root of the border and boot animation assets.
    pub assets_dir: PathBuf,
    /// Length of the handheld boot animation, in frames.
    pub boot_frames: usize,
    /// How many frames each source frame of the boot animation is shown for.
    pub boot_frame_hold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            instance_timeout_secs: 60,
            ticks_per_frame: 2,
            gif_fps: 30,
            assets_dir: PathBuf::from("assets"),
            boot_frames: 127,
            boot_frame_hold: 12,
        }
    }
}

impl EngineConfig {
    /// Reads the config at `path`. A missing or malformed file is not fatal; the defaults are used
    /// instead.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) => {
                warn!("Could not read engine config at {}, using defaults: {err}", path.display());
                return Self::default();
            }
        };
        Self::from_toml(&data).unwrap_or_else(|err| {
            warn!("Malformed engine config at {}, using defaults: {err}", path.display());
            Self::default()
        })
    }

    pub fn from_toml(data: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(data)
    }

    pub fn sweep_interval(&self) -> Duration {
        // A zero period would make the sweep spin
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn instance_timeout(&self) -> Duration {
        Duration::from_secs(self.instance_timeout_secs)
    }
}
