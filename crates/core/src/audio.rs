//! Audio primitives
//!
//! Sample format descriptors shared by the frame model, the capture
//! transport and the persistence sink. The pipeline's native format is
//! mono, 16-bit signed PCM at 16 kHz.

use serde::{Deserialize, Serialize};

/// Supported sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    Hz8000,
    #[default]
    Hz16000,
    Hz22050,
    Hz44100,
    Hz48000,
}

impl SampleRate {
    /// Rate in Hertz
    pub fn as_hz(self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8_000,
            SampleRate::Hz16000 => 16_000,
            SampleRate::Hz22050 => 22_050,
            SampleRate::Hz44100 => 44_100,
            SampleRate::Hz48000 => 48_000,
        }
    }

    /// Parse a rate in Hertz, if it is one we support
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            8_000 => Some(SampleRate::Hz8000),
            16_000 => Some(SampleRate::Hz16000),
            22_050 => Some(SampleRate::Hz22050),
            44_100 => Some(SampleRate::Hz44100),
            48_000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }
}

/// Channel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Channels {
    #[default]
    Mono,
    Stereo,
}

impl Channels {
    /// Number of interleaved channels
    pub fn count(self) -> u16 {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

/// Duration in milliseconds of `sample_count` interleaved samples
pub fn duration_ms(sample_count: usize, rate: SampleRate, channels: Channels) -> u64 {
    let frames = sample_count as u64 / channels.count() as u64;
    frames * 1_000 / rate.as_hz() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_round_trip() {
        for rate in [
            SampleRate::Hz8000,
            SampleRate::Hz16000,
            SampleRate::Hz22050,
            SampleRate::Hz44100,
            SampleRate::Hz48000,
        ] {
            assert_eq!(SampleRate::from_hz(rate.as_hz()), Some(rate));
        }
        assert_eq!(SampleRate::from_hz(11_025), None);
    }

    #[test]
    fn test_duration() {
        // 160 mono samples at 16 kHz = 10ms
        assert_eq!(duration_ms(160, SampleRate::Hz16000, Channels::Mono), 10);
        // Stereo halves the frame count
        assert_eq!(duration_ms(320, SampleRate::Hz16000, Channels::Stereo), 10);
    }

    #[test]
    fn test_defaults_match_pipeline_format() {
        assert_eq!(SampleRate::default(), SampleRate::Hz16000);
        assert_eq!(Channels::default().count(), 1);
    }
}
