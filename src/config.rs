//! Application configuration loaded from TOML
//!
//! ```toml
//! [audio]
//! buffer_size = 256
//!
//! [network]
//! port = 4001
//! tolerated_loss = 2
//!
//! [synth]
//! max_oscillators = 20000
//! seed = 7
//!
//! [params]
//! master_gain = 0.4
//! cascade_mode = "linear"
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use crate::engine::{EngineConfig, MAX_OSCILLATORS};
use crate::oscillator::DEFAULT_TABLE_LEN;
use crate::params::SynthParams;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable overriding `[audio] buffer_size`
pub const BUFFER_SIZE_ENV: &str = "SPIKEWEB_BUFFER_SIZE";
pub const DEFAULT_BUFFER_SIZE: usize = 256;
pub const MIN_BUFFER_SIZE: usize = 32;
pub const MAX_BUFFER_SIZE: usize = 2048;
pub const DEFAULT_PORT: u16 = 4001;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub network: NetworkConfig,
    pub synth: SynthConfig,
    pub params: SynthParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Frames per audio callback
    pub buffer_size: usize,
    /// Requested device rate; the device default is used when unset
    pub sample_rate: Option<u32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            sample_rate: None,
        }
    }
}

impl AudioConfig {
    /// Buffer size after the environment override, clamped to 32..=2048
    pub fn buffer_size(&self) -> usize {
        buffer_size_with_override(self.buffer_size, std::env::var(BUFFER_SIZE_ENV).ok().as_deref())
    }
}

fn buffer_size_with_override(configured: usize, env: Option<&str>) -> usize {
    env.and_then(|s| s.trim().parse().ok())
        .unwrap_or(configured)
        .clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Trigger queue slots between the UDP thread and the audio thread
    pub channel_capacity: usize,
    pub max_triggers_per_block: usize,
    /// Frequencies a handshake may lose and still complete
    pub tolerated_loss: usize,
    /// Receive timeout; bounds how long shutdown can take
    pub read_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            channel_capacity: crate::channel::DEFAULT_CAPACITY,
            max_triggers_per_block: 512,
            tolerated_loss: crate::handshake::DEFAULT_TOLERATED_LOSS,
            read_timeout_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub max_oscillators: usize,
    pub wavetable_size: usize,
    /// Random trigger draws per block are taken from `0..stochastic_draws`
    pub stochastic_draws: usize,
    pub stochastic_span: usize,
    /// Fixed RNG seed for reproducible renders
    pub seed: Option<u64>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            max_oscillators: MAX_OSCILLATORS,
            wavetable_size: DEFAULT_TABLE_LEN,
            stochastic_draws: 10_000,
            stochastic_span: MAX_OSCILLATORS,
            seed: None,
        }
    }
}

impl Config {
    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<string>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let synth = &self.synth;
        if synth.max_oscillators == 0 || synth.max_oscillators > u16::MAX as usize + 1 {
            return Err(ConfigError::Invalid(format!(
                "synth.max_oscillators must be in 1..=65536, got {}",
                synth.max_oscillators
            )));
        }
        if !(2..=65_536).contains(&synth.wavetable_size) {
            return Err(ConfigError::Invalid(format!(
                "synth.wavetable_size must be in 2..=65536, got {}",
                synth.wavetable_size
            )));
        }
        if synth.stochastic_span == 0 {
            return Err(ConfigError::Invalid(
                "synth.stochastic_span must be positive".to_string(),
            ));
        }
        if self.network.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "network.channel_capacity must be positive".to_string(),
            ));
        }
        if self.audio.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "audio.buffer_size must be positive".to_string(),
            ));
        }
        if let Some(rate) = self.audio.sample_rate {
            if !(8_000..=384_000).contains(&rate) {
                return Err(ConfigError::Invalid(format!(
                    "audio.sample_rate {} is out of range",
                    rate
                )));
            }
        }
        Ok(())
    }

    /// Engine sizing for blocks of up to `max_block` frames
    pub fn engine_config(&self, max_block: usize) -> EngineConfig {
        EngineConfig {
            max_oscillators: self.synth.max_oscillators,
            table_len: self.synth.wavetable_size,
            max_block,
            max_triggers_per_block: self.network.max_triggers_per_block,
            stochastic_draws: self.synth.stochastic_draws,
            stochastic_span: self.synth.stochastic_span,
            seed: self.synth.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::CascadeMode;
    use std::sync::Mutex;

    // Env vars are process-global
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.network.port, 4001);
        assert_eq!(config.synth.max_oscillators, 20_000);
    }

    #[test]
    fn test_sections_parse() {
        let config = Config::from_toml_str(
            r#"
            [audio]
            buffer_size = 128

            [network]
            bind_addr = "127.0.0.1"
            port = 9000
            tolerated_loss = 5

            [synth]
            max_oscillators = 64
            seed = 3

            [params]
            cascade_mode = "linear"
            oscillator_count = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.buffer_size, 128);
        assert_eq!(config.network.bind_addr, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.network.port, 9000);
        assert_eq!(config.network.tolerated_loss, 5);
        assert_eq!(config.network.channel_capacity, 512);
        assert_eq!(config.synth.seed, Some(3));
        assert_eq!(config.params.cascade_mode, CascadeMode::Linear);
        assert_eq!(config.params.oscillator_count, 4);

        let engine = config.engine_config(128);
        assert_eq!(engine.max_oscillators, 64);
        assert_eq!(engine.max_block, 128);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Config::from_toml_str("[synth]\nmax_oscillators = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::from_toml_str("[synth]\nmax_oscillators = 100000").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::from_toml_str("[network]\nport = \"four\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_buffer_size_override() {
        assert_eq!(buffer_size_with_override(256, None), 256);
        assert_eq!(buffer_size_with_override(256, Some("64")), 64);
        assert_eq!(buffer_size_with_override(256, Some("16")), MIN_BUFFER_SIZE);
        assert_eq!(buffer_size_with_override(256, Some("4096")), MAX_BUFFER_SIZE);
        assert_eq!(buffer_size_with_override(256, Some("-100")), 256);
        assert_eq!(buffer_size_with_override(256, Some("not_a_number")), 256);
        assert_eq!(buffer_size_with_override(10_000, None), MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_buffer_size_from_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let audio = AudioConfig::default();

        std::env::set_var(BUFFER_SIZE_ENV, "512");
        assert_eq!(audio.buffer_size(), 512);
        std::env::remove_var(BUFFER_SIZE_ENV);
        assert_eq!(audio.buffer_size(), DEFAULT_BUFFER_SIZE);
    }
}
