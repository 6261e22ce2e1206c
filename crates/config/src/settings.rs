//! Typed runtime settings
//!
//! Every section has working defaults so a bare `Settings::default()` runs
//! a usable session; files and environment only override.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::ConfigError;

/// Top-level settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub session: SessionConfig,
    pub channels: ChannelConfig,
    pub timeouts: TimeoutConfig,
    pub sink: SinkConfig,
}

/// Session-level behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// System prompt seeding the conversation
    pub system_prompt: String,
    /// Whether user speech may interrupt an in-flight assistant turn
    pub allow_interruptions: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful voice assistant. Keep responses short."
                .to_string(),
            allow_interruptions: true,
        }
    }
}

/// Inter-stage channel capacities
///
/// Data channels are bounded to create backpressure; control channels stay
/// small because control frames are sparse.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub data_capacity: usize,
    pub control_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            data_capacity: 64,
            control_capacity: 8,
        }
    }
}

/// Upper bounds on collaborator calls
///
/// An elapsed timeout is treated as a cancellation of the in-flight
/// operation, never as a failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub recognition_ms: u64,
    pub dialogue_ms: u64,
    pub synthesis_ms: u64,
    pub playback_ms: u64,
    /// How long the runner waits for stages to drain on shutdown
    pub drain_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            recognition_ms: 5_000,
            dialogue_ms: 30_000,
            synthesis_ms: 10_000,
            playback_ms: 5_000,
            drain_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub fn recognition(&self) -> Duration {
        Duration::from_millis(self.recognition_ms)
    }

    pub fn dialogue(&self) -> Duration {
        Duration::from_millis(self.dialogue_ms)
    }

    pub fn synthesis(&self) -> Duration {
        Duration::from_millis(self.synthesis_ms)
    }

    pub fn playback(&self) -> Duration {
        Duration::from_millis(self.playback_ms)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }
}

/// Audio persistence sink
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Directory the per-session WAV file is created in
    pub dir: PathBuf,
    /// Buffered chunk count that triggers a flush
    pub flush_threshold: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            flush_threshold: 10,
        }
    }
}

/// Load settings from an optional TOML file plus environment overrides
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        builder = builder.add_source(config::File::from(path));
    }

    let raw = builder
        .add_source(config::Environment::with_prefix("VOICEPIPE").separator("__"))
        .build()?;

    let settings: Settings = raw.try_deserialize()?;
    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.sink.flush_threshold == 0 {
        return Err(ConfigError::InvalidValue {
            field: "sink.flush_threshold".into(),
            message: "must be at least 1".into(),
        });
    }
    if settings.channels.data_capacity == 0 || settings.channels.control_capacity == 0 {
        return Err(ConfigError::InvalidValue {
            field: "channels".into(),
            message: "channel capacities must be at least 1".into(),
        });
    }
    Ok(())
}
