//! Dialogue stage
//!
//! Turns a `DialogueTurnRequest` into a streamed assistant response:
//! token deltas flow downstream as the model produces them, followed by a
//! completion frame carrying the full text. Interruption or timeout
//! abandons the turn mid-stream; no completion frame is emitted for an
//! abandoned turn, so it can never be finalized into the history.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use voicepipe_core::{
    DialogueModel, Frame, FrameDirection, FramePayload, Result, Stage, StageContext,
};

pub struct DialogueStage {
    model: Arc<dyn DialogueModel>,
    turn_timeout: Duration,
    cancel: Mutex<CancellationToken>,
}

impl DialogueStage {
    pub fn new(model: Arc<dyn DialogueModel>) -> Self {
        Self {
            model,
            turn_timeout: Duration::from_secs(30),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Bound on one whole turn, first token to last
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }

    /// Stream one response; returns the full text only if the turn ran to
    /// completion
    async fn stream_turn(
        &self,
        request: &Frame,
        messages: &[voicepipe_core::Turn],
        ctx: &StageContext,
    ) -> Result<Option<String>> {
        let token = self.fresh_token();
        let deadline = tokio::time::Instant::now() + self.turn_timeout;
        let mut stream = self.model.respond(messages);
        let mut full = String::new();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!("dialogue turn interrupted; abandoning");
                    return Ok(None);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(
                        model = self.model.model_name(),
                        timeout_ms = self.turn_timeout.as_millis() as u64,
                        "dialogue turn timed out; treating as cancelled"
                    );
                    return Ok(None);
                }
                delta = stream.next() => match delta {
                    None => break,
                    Some(Ok(delta)) => {
                        full.push_str(&delta);
                        ctx.send_downstream(Frame::derived(
                            FramePayload::DialogueTokenDelta { text: delta },
                            request,
                        ))
                        .await?;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(
                            model = self.model.model_name(),
                            error = %e,
                            "dialogue request failed; turn skipped"
                        );
                        return Ok(None);
                    }
                },
            }
        }
        Ok(Some(full))
    }
}

#[async_trait]
impl Stage for DialogueStage {
    async fn handle(
        &self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<()> {
        match frame.payload() {
            FramePayload::DialogueTurnRequest { messages }
                if direction == FrameDirection::Downstream =>
            {
                let messages = messages.clone();
                if let Some(full) = self.stream_turn(&frame, &messages, ctx).await? {
                    if !full.is_empty() {
                        ctx.send_downstream(Frame::derived(
                            FramePayload::DialogueTurnComplete { text: full },
                            &frame,
                        ))
                        .await?;
                    }
                }
                Ok(())
            }
            FramePayload::StartInterruption
            | FramePayload::StopInterruption
            | FramePayload::EndOfStream => Ok(()),
            _ => ctx.forward(frame, direction).await,
        }
    }

    fn name(&self) -> &'static str {
        "dialogue"
    }

    fn description(&self) -> &str {
        "Streams assistant responses from the dialogue model"
    }

    fn interrupt(&self) {
        self.cancel.lock().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_ctx;
    use voicepipe_core::{FrameKind, TokenStream, Turn};

    /// Model that yields a fixed set of deltas.
    struct ScriptedModel {
        deltas: Vec<&'static str>,
    }

    impl DialogueModel for ScriptedModel {
        fn respond<'a>(&'a self, _turns: &'a [Turn]) -> TokenStream<'a> {
            Box::pin(async_stream::stream! {
                for delta in &self.deltas {
                    yield Ok(delta.to_string());
                }
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    /// Model that yields one delta, then stalls forever.
    struct StallingModel;

    impl DialogueModel for StallingModel {
        fn respond<'a>(&'a self, _turns: &'a [Turn]) -> TokenStream<'a> {
            Box::pin(async_stream::stream! {
                yield Ok("Hi".to_string());
                std::future::pending::<()>().await;
            })
        }

        fn model_name(&self) -> &str {
            "stalling"
        }
    }

    fn request() -> Frame {
        Frame::new(FramePayload::DialogueTurnRequest {
            messages: vec![Turn::system("be brief"), Turn::user("hello there")],
        })
    }

    #[tokio::test]
    async fn test_deltas_then_completion() {
        let stage = DialogueStage::new(Arc::new(ScriptedModel {
            deltas: vec!["Hi", " there", "!"],
        }));
        let (ctx, emitter) = test_ctx(true);

        stage
            .handle(request(), FrameDirection::Downstream, &ctx)
            .await
            .unwrap();

        let down = emitter.downstream();
        let kinds: Vec<FrameKind> = down.iter().map(|f| f.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                FrameKind::DialogueTokenDelta,
                FrameKind::DialogueTokenDelta,
                FrameKind::DialogueTokenDelta,
                FrameKind::DialogueTurnComplete,
            ]
        );
        match down.last().unwrap().payload() {
            FramePayload::DialogueTurnComplete { text } => assert_eq!(text, "Hi there!"),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_abandons_turn_without_completion() {
        let stage = DialogueStage::new(Arc::new(StallingModel))
            .with_turn_timeout(Duration::from_millis(30));
        let (ctx, emitter) = test_ctx(true);

        stage
            .handle(request(), FrameDirection::Downstream, &ctx)
            .await
            .unwrap();

        let kinds: Vec<FrameKind> = emitter.downstream().iter().map(|f| f.kind()).collect();
        // The first delta got out, but no completion followed.
        assert_eq!(kinds, vec![FrameKind::DialogueTokenDelta]);
    }

    #[tokio::test]
    async fn test_interrupt_abandons_turn_mid_stream() {
        let stage = Arc::new(DialogueStage::new(Arc::new(StallingModel)));
        let (ctx, emitter) = test_ctx(true);

        let in_flight = {
            let stage = stage.clone();
            tokio::spawn(
                async move { stage.handle(request(), FrameDirection::Downstream, &ctx).await },
            )
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        stage.interrupt();

        in_flight.await.unwrap().unwrap();
        let kinds: Vec<FrameKind> = emitter.downstream().iter().map(|f| f.kind()).collect();
        assert_eq!(kinds, vec![FrameKind::DialogueTokenDelta]);
    }

    #[tokio::test]
    async fn test_model_error_skips_turn() {
        struct FailingModel;

        impl DialogueModel for FailingModel {
            fn respond<'a>(&'a self, _turns: &'a [Turn]) -> TokenStream<'a> {
                Box::pin(async_stream::stream! {
                    yield Err(voicepipe_core::Error::Dialogue("backend offline".into()));
                })
            }

            fn model_name(&self) -> &str {
                "failing"
            }
        }

        let stage = DialogueStage::new(Arc::new(FailingModel));
        let (ctx, emitter) = test_ctx(true);
        stage
            .handle(request(), FrameDirection::Downstream, &ctx)
            .await
            .unwrap();
        assert!(emitter.downstream().is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_frames_pass_through() {
        let stage = DialogueStage::new(Arc::new(ScriptedModel { deltas: vec![] }));
        let (ctx, emitter) = test_ctx(true);

        let audio = Frame::audio_chunk(
            vec![1; 16],
            voicepipe_core::SampleRate::Hz16000,
            voicepipe_core::Channels::Mono,
        );
        let seq = audio.seq();
        stage
            .handle(audio, FrameDirection::Downstream, &ctx)
            .await
            .unwrap();
        let down = emitter.downstream();
        assert_eq!(down.len(), 1);
        assert_eq!(down[0].seq(), seq);
    }
}
