pub mod decode;
pub mod device;
pub mod pipeline;
pub mod playlist;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use decode::session::DecoderSession;
pub use device::DecoderDevice;

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub decoder: DecoderConfig,
    pub playlist: PlaylistConfig,
}

/// Decode pipeline tuning.
///
/// The sleep intervals and timeouts drive the two polling worker loops; they
/// are surfaced here rather than hard-coded so deployments can trade latency
/// against CPU burn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Pending-input entries after which `add_input` starts rejecting.
    pub input_queue_limit: usize,
    /// Device ready-list occupancy above which input submission pauses.
    pub device_ready_watermark: u32,
    /// Backoff for both worker loops when there is nothing to do.
    pub idle_sleep_ms: u64,
    /// Bounded wait for one decoded-output extraction.
    pub output_timeout_ms: u64,
    /// Widened extraction wait right after a format change, while the
    /// device reconfigures.
    pub format_change_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistConfig {
    /// Path prefix rewrites applied to loaded entries, `(from, to)`.
    pub path_substitutions: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig {
                input_queue_limit: 75,
                device_ready_watermark: 8,
                idle_sleep_ms: 10,
                output_timeout_ms: 20,
                format_change_timeout_ms: 2000,
            },
            playlist: PlaylistConfig {
                path_substitutions: Vec::new(),
            },
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file with `HELIOS_`
    /// environment overrides, falling back to the defaults above.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(config::Environment::with_prefix("HELIOS").separator("__"))
            .build()?
            .try_deserialize()
    }
}
