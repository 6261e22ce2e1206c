//! User turn aggregator
//!
//! Folds a run of partial transcripts into one finalized user turn. The
//! final transcript is authoritative; partials only track the utterance in
//! progress and never reach the finalized history. Finalizing a turn emits
//! a dialogue request carrying the full updated history.

use async_trait::async_trait;
use voicepipe_core::{
    Frame, FrameDirection, FramePayload, Result, SharedHistory, Stage, StageContext,
};

pub struct UserTurnAggregator {
    history: SharedHistory,
}

impl UserTurnAggregator {
    pub fn new(history: SharedHistory) -> Self {
        Self { history }
    }
}

#[async_trait]
impl Stage for UserTurnAggregator {
    async fn handle(
        &self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<()> {
        match frame.payload() {
            FramePayload::TranscriptPartial { text }
                if direction == FrameDirection::Downstream =>
            {
                self.history.lock().set_pending_user(text.clone());
                Ok(())
            }
            FramePayload::TranscriptFinal { text }
                if direction == FrameDirection::Downstream =>
            {
                let messages = {
                    let mut history = self.history.lock();
                    history.finalize_user(text.clone());
                    history.snapshot()
                };
                tracing::debug!(turns = messages.len(), "user turn finalized");
                ctx.send_downstream(Frame::derived(
                    FramePayload::DialogueTurnRequest { messages },
                    &frame,
                ))
                .await
            }
            FramePayload::StartInterruption
            | FramePayload::StopInterruption
            | FramePayload::EndOfStream => Ok(()),
            _ => ctx.forward(frame, direction).await,
        }
    }

    fn name(&self) -> &'static str {
        "user_turn_aggregator"
    }

    fn description(&self) -> &str {
        "Folds partial transcripts into finalized user turns"
    }
}
