//! Capture feeder
//!
//! Pumps an [`AudioCapture`] collaborator into the running pipeline:
//! polls the device, wraps samples into audio frames, and stops cleanly
//! on shutdown, on source exhaustion, or after a run of consecutive read
//! errors. A finite source (file, fixture) ends the session by sending
//! `EndOfStream`; a live source only stops when the shutdown token fires.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use voicepipe_core::{AudioCapture, Frame};
use voicepipe_pipeline::FrameSender;

const MAX_CONSECUTIVE_ERRORS: u32 = 10;

pub struct CaptureFeeder {
    source: Box<dyn AudioCapture>,
    input: FrameSender,
    shutdown: CancellationToken,
    poll_interval: Duration,
}

impl CaptureFeeder {
    pub fn new(
        source: Box<dyn AudioCapture>,
        input: FrameSender,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            input,
            shutdown,
            poll_interval: Duration::from_millis(16),
        }
    }

    /// How often the source is polled when it has nothing to deliver
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run the feeder as its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        if let Err(e) = self.source.start().await {
            tracing::error!(error = %e, "audio capture failed to start");
            let _ = self.input.send(Frame::end_of_stream()).await;
            return;
        }

        let finite = self.source.is_finite();
        let sample_rate = self.source.sample_rate();
        let channels = self.source.channels();
        let mut consecutive_errors: u32 = 0;
        let mut frames_sent: u64 = 0;

        loop {
            let samples = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                read = self.source.read() => match read {
                    Ok(samples) => {
                        consecutive_errors = 0;
                        samples
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                            tracing::error!(
                                error = %e,
                                attempts = consecutive_errors,
                                "audio capture keeps failing; giving up"
                            );
                            let _ = self.input.send(Frame::end_of_stream()).await;
                            break;
                        }
                        tokio::time::sleep(self.poll_interval).await;
                        continue;
                    }
                },
            };

            if samples.is_empty() {
                if finite {
                    // Source exhausted; end the session in-band.
                    tracing::debug!(frames_sent, "capture source exhausted");
                    let _ = self.input.send(Frame::end_of_stream()).await;
                    break;
                }
                // Live source warming up; keep polling.
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            let frame = Frame::audio_chunk(samples, sample_rate, channels);
            if self.input.send(frame).await.is_err() {
                tracing::debug!("pipeline input closed; stopping capture");
                break;
            }
            frames_sent += 1;
        }

        if frames_sent == 0 && !finite {
            tracing::warn!("no audio frames captured from the live source");
        }
        if let Err(e) = self.source.stop().await {
            tracing::warn!(error = %e, "failed to stop audio capture");
        }
    }
}
