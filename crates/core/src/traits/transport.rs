//! Audio device boundaries

use async_trait::async_trait;

use crate::audio::{Channels, SampleRate};
use crate::error::Result;

/// Capture side of the audio device
///
/// Produces raw samples at a fixed format; must support being told to stop
/// producing when the session ends.
#[async_trait]
pub trait AudioCapture: Send + 'static {
    /// Begin producing samples
    async fn start(&mut self) -> Result<()>;

    /// Read whatever samples are available; empty means none right now
    async fn read(&mut self) -> Result<Vec<i16>>;

    /// Stop producing samples
    async fn stop(&mut self) -> Result<()>;

    /// Finite sources (files, fixtures) signal exhaustion with an empty
    /// read; live sources keep polling through empty reads
    fn is_finite(&self) -> bool {
        false
    }

    fn sample_rate(&self) -> SampleRate {
        SampleRate::Hz16000
    }

    fn channels(&self) -> Channels {
        Channels::Mono
    }
}

/// Playback side of the audio device
///
/// Accepts synthesized chunks in order; `stop` discards anything queued in
/// the device and is used when a turn is interrupted.
#[async_trait]
pub trait AudioPlayback: Send + Sync + 'static {
    /// Play one chunk of samples
    async fn play(&self, samples: &[i16]) -> Result<()>;

    /// Discard queued audio and stop the current sound
    async fn stop(&self) -> Result<()>;
}
