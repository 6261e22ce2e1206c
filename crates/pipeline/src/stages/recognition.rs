//! Speech recognition stage
//!
//! The in-pipeline capture boundary: feeds capture audio to the
//! recognizer, turns its events into transcript frames, and raises the
//! barge-in control frames when speech starts or ends. Capture audio is
//! forwarded untouched so the persistence sink can observe it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use voicepipe_core::{
    Frame, FrameDirection, FramePayload, RecognitionEvent, Result, SpeechRecognizer, Stage,
    StageContext,
};

pub struct RecognitionStage {
    recognizer: Arc<dyn SpeechRecognizer>,
    feed_timeout: Duration,
    cancel: Mutex<CancellationToken>,
}

impl RecognitionStage {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self {
            recognizer,
            feed_timeout: Duration::from_secs(5),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Bound on a single `feed` call; elapsing abandons the utterance
    pub fn with_feed_timeout(mut self, timeout: Duration) -> Self {
        self.feed_timeout = timeout;
        self
    }

    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }

    /// Feed one chunk, bounded by timeout and cancellation
    ///
    /// Transient recognizer failures and timeouts both resolve to "no
    /// events": the utterance is skipped and the stage stays ready.
    async fn feed_bounded(&self, samples: &[i16]) -> Vec<RecognitionEvent> {
        let token = self.fresh_token();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                if let Err(e) = self.recognizer.cancel().await {
                    tracing::warn!(error = %e, "recognizer cancel failed");
                }
                Vec::new()
            }
            fed = tokio::time::timeout(self.feed_timeout, self.recognizer.feed(samples)) => {
                match fed {
                    Ok(Ok(events)) => events,
                    Ok(Err(e)) => {
                        tracing::warn!(
                            model = self.recognizer.model_name(),
                            error = %e,
                            "recognition failed; utterance skipped"
                        );
                        Vec::new()
                    }
                    Err(_) => {
                        tracing::warn!(
                            model = self.recognizer.model_name(),
                            timeout_ms = self.feed_timeout.as_millis() as u64,
                            "recognition timed out; treating as cancelled"
                        );
                        if let Err(e) = self.recognizer.cancel().await {
                            tracing::warn!(error = %e, "recognizer cancel failed");
                        }
                        Vec::new()
                    }
                }
            }
        }
    }

    async fn emit_events(
        &self,
        events: Vec<RecognitionEvent>,
        origin: &Frame,
        ctx: &StageContext,
    ) -> Result<()> {
        for event in events {
            match event {
                RecognitionEvent::SpeechStarted => {
                    if ctx.interruptions_allowed() {
                        tracing::debug!("speech started; raising interruption");
                        ctx.send_downstream(Frame::start_interruption()).await?;
                        ctx.send_upstream(Frame::start_interruption()).await?;
                    }
                }
                RecognitionEvent::SpeechEnded => {
                    if ctx.interruptions_allowed() {
                        ctx.send_downstream(Frame::stop_interruption()).await?;
                        ctx.send_upstream(Frame::stop_interruption()).await?;
                    }
                }
                RecognitionEvent::Partial(text) => {
                    ctx.send_downstream(Frame::derived(
                        FramePayload::TranscriptPartial { text },
                        origin,
                    ))
                    .await?;
                }
                RecognitionEvent::Final(text) => {
                    tracing::debug!(text = %text, "utterance finalized");
                    ctx.send_downstream(Frame::derived(
                        FramePayload::TranscriptFinal { text },
                        origin,
                    ))
                    .await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for RecognitionStage {
    async fn handle(
        &self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<()> {
        match frame.payload() {
            FramePayload::AudioChunk { samples, .. }
                if direction == FrameDirection::Downstream =>
            {
                let events = self.feed_bounded(samples).await;
                self.emit_events(events, &frame, ctx).await?;
            }
            FramePayload::StartInterruption => {
                // An interruption raised elsewhere also abandons whatever
                // utterance the recognizer holds.
                if let Err(e) = self.recognizer.cancel().await {
                    tracing::warn!(error = %e, "recognizer cancel failed");
                }
                return Ok(());
            }
            FramePayload::StopInterruption | FramePayload::EndOfStream => return Ok(()),
            _ => {}
        }
        ctx.forward(frame, direction).await
    }

    fn name(&self) -> &'static str {
        "recognition"
    }

    fn description(&self) -> &str {
        "Feeds capture audio to the recognizer and emits transcript and barge-in frames"
    }

    fn interrupt(&self) {
        self.cancel.lock().cancel();
    }
}
