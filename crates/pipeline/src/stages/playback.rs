//! Playback stage
//!
//! Hands synthesized audio to the playback device in arrival order. On
//! interruption the device is told to stop, discarding whatever it has
//! queued; the worker's inbound drain takes care of chunks still queued at
//! the stage boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use voicepipe_core::{
    AudioPlayback, Frame, FrameDirection, FramePayload, Result, Stage, StageContext,
};

pub struct PlaybackStage {
    playback: Arc<dyn AudioPlayback>,
    chunk_timeout: Duration,
    cancel: Mutex<CancellationToken>,
}

impl PlaybackStage {
    pub fn new(playback: Arc<dyn AudioPlayback>) -> Self {
        Self {
            playback,
            chunk_timeout: Duration::from_secs(5),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Bound on playing a single chunk
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }

    async fn stop_device(&self) {
        if let Err(e) = self.playback.stop().await {
            tracing::warn!(error = %e, "playback stop failed");
        }
    }

    async fn play_bounded(&self, samples: &[i16]) {
        let token = self.fresh_token();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.stop_device().await;
            }
            played = tokio::time::timeout(self.chunk_timeout, self.playback.play(samples)) => {
                match played {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "playback failed; chunk dropped");
                    }
                    Err(_) => {
                        tracing::warn!(
                            timeout_ms = self.chunk_timeout.as_millis() as u64,
                            "playback timed out; treating as cancelled"
                        );
                        self.stop_device().await;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Stage for PlaybackStage {
    async fn handle(
        &self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<()> {
        match frame.payload() {
            FramePayload::SynthesizedAudioChunk { samples }
                if direction == FrameDirection::Downstream =>
            {
                self.play_bounded(samples).await;
                Ok(())
            }
            FramePayload::StartInterruption => {
                self.stop_device().await;
                Ok(())
            }
            FramePayload::StopInterruption | FramePayload::EndOfStream => Ok(()),
            _ => ctx.forward(frame, direction).await,
        }
    }

    fn name(&self) -> &'static str {
        "playback"
    }

    fn description(&self) -> &str {
        "Plays synthesized audio to the output device"
    }

    fn interrupt(&self) {
        self.cancel.lock().cancel();
    }
}
