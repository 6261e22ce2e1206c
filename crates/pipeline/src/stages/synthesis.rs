//! Synthesis stage
//!
//! Renders a completed assistant response into synthesized audio chunks.
//! The completion frame itself is forwarded only after synthesis finishes,
//! so the assistant aggregator downstream finalizes spoken turns only; an
//! interrupted or timed-out synthesis abandons the turn and forwards
//! nothing. Token deltas pass through untouched for the aggregator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use voicepipe_core::{
    Frame, FrameDirection, FramePayload, Result, SpeechSynthesizer, Stage, StageContext,
};

pub struct SynthesisStage {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    stream_timeout: Duration,
    cancel: Mutex<CancellationToken>,
}

impl SynthesisStage {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            synthesizer,
            stream_timeout: Duration::from_secs(10),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Bound on rendering one whole turn
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }

    /// Stream synthesized audio for one turn; true if it ran to completion
    async fn stream_audio(&self, text: &str, request: &Frame, ctx: &StageContext) -> Result<bool> {
        let token = self.fresh_token();
        let deadline = tokio::time::Instant::now() + self.stream_timeout;
        let mut stream = self.synthesizer.synthesize(text);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!("synthesis interrupted; abandoning turn");
                    return Ok(false);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(
                        voice = self.synthesizer.voice_name(),
                        timeout_ms = self.stream_timeout.as_millis() as u64,
                        "synthesis timed out; treating as cancelled"
                    );
                    return Ok(false);
                }
                chunk = stream.next() => match chunk {
                    None => return Ok(true),
                    Some(Ok(samples)) => {
                        ctx.send_downstream(Frame::derived(
                            FramePayload::SynthesizedAudioChunk { samples },
                            request,
                        ))
                        .await?;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(
                            voice = self.synthesizer.voice_name(),
                            error = %e,
                            "synthesis failed; turn skipped"
                        );
                        return Ok(false);
                    }
                },
            }
        }
    }
}

#[async_trait]
impl Stage for SynthesisStage {
    async fn handle(
        &self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<()> {
        match frame.payload() {
            FramePayload::DialogueTurnComplete { text }
                if direction == FrameDirection::Downstream =>
            {
                let text = text.clone();
                let completed = self.stream_audio(&text, &frame, ctx).await?;
                if completed {
                    return ctx.forward(frame, direction).await;
                }
                return Ok(());
            }
            FramePayload::StartInterruption
            | FramePayload::StopInterruption
            | FramePayload::EndOfStream => return Ok(()),
            _ => {}
        }
        ctx.forward(frame, direction).await
    }

    fn name(&self) -> &'static str {
        "synthesis"
    }

    fn description(&self) -> &str {
        "Renders completed assistant turns into synthesized audio"
    }

    fn interrupt(&self) {
        self.cancel.lock().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_ctx;
    use voicepipe_core::{FrameKind, SampleStream};

    /// Synthesizer yielding one chunk of silence per word.
    struct WordSynth;

    impl SpeechSynthesizer for WordSynth {
        fn synthesize<'a>(&'a self, text: &'a str) -> SampleStream<'a> {
            Box::pin(async_stream::stream! {
                for _word in text.split_whitespace() {
                    yield Ok(vec![0i16; 160]);
                }
            })
        }

        fn voice_name(&self) -> &str {
            "word-synth"
        }
    }

    /// Synthesizer that stalls after the first chunk.
    struct StallingSynth;

    impl SpeechSynthesizer for StallingSynth {
        fn synthesize<'a>(&'a self, _text: &'a str) -> SampleStream<'a> {
            Box::pin(async_stream::stream! {
                yield Ok(vec![1i16; 160]);
                std::future::pending::<()>().await;
            })
        }

        fn voice_name(&self) -> &str {
            "stalling-synth"
        }
    }

    fn completion() -> Frame {
        Frame::new(FramePayload::DialogueTurnComplete {
            text: "hello there friend".into(),
        })
    }

    #[tokio::test]
    async fn test_audio_chunks_then_forwarded_completion() {
        let stage = SynthesisStage::new(Arc::new(WordSynth));
        let (ctx, emitter) = test_ctx(true);

        let frame = completion();
        let seq = frame.seq();
        stage
            .handle(frame, FrameDirection::Downstream, &ctx)
            .await
            .unwrap();

        let down = emitter.downstream();
        let kinds: Vec<FrameKind> = down.iter().map(|f| f.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                FrameKind::SynthesizedAudioChunk,
                FrameKind::SynthesizedAudioChunk,
                FrameKind::SynthesizedAudioChunk,
                FrameKind::DialogueTurnComplete,
            ]
        );
        // The forwarded completion is the original frame, not a copy.
        assert_eq!(down.last().unwrap().seq(), seq);
        // Synthesized chunks trace back to the completion that caused them.
        assert_eq!(down[0].origin(), Some(seq));
    }

    #[tokio::test]
    async fn test_timeout_abandons_turn_and_completion() {
        let stage = SynthesisStage::new(Arc::new(StallingSynth))
            .with_stream_timeout(Duration::from_millis(30));
        let (ctx, emitter) = test_ctx(true);

        stage
            .handle(completion(), FrameDirection::Downstream, &ctx)
            .await
            .unwrap();

        let kinds: Vec<FrameKind> = emitter.downstream().iter().map(|f| f.kind()).collect();
        // One chunk escaped; the completion must not follow it.
        assert_eq!(kinds, vec![FrameKind::SynthesizedAudioChunk]);
    }

    #[tokio::test]
    async fn test_interrupt_stops_synthesis() {
        let stage = Arc::new(SynthesisStage::new(Arc::new(StallingSynth)));
        let (ctx, emitter) = test_ctx(true);

        let in_flight = {
            let stage = stage.clone();
            tokio::spawn(async move {
                stage
                    .handle(completion(), FrameDirection::Downstream, &ctx)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        stage.interrupt();

        in_flight.await.unwrap().unwrap();
        let kinds: Vec<FrameKind> = emitter.downstream().iter().map(|f| f.kind()).collect();
        assert_eq!(kinds, vec![FrameKind::SynthesizedAudioChunk]);
    }

    #[tokio::test]
    async fn test_token_deltas_pass_through() {
        let stage = SynthesisStage::new(Arc::new(WordSynth));
        let (ctx, emitter) = test_ctx(true);

        stage
            .handle(
                Frame::new(FramePayload::DialogueTokenDelta { text: "Hi".into() }),
                FrameDirection::Downstream,
                &ctx,
            )
            .await
            .unwrap();
        let kinds: Vec<FrameKind> = emitter.downstream().iter().map(|f| f.kind()).collect();
        assert_eq!(kinds, vec![FrameKind::DialogueTokenDelta]);
    }
}
