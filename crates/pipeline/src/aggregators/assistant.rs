//! Assistant turn aggregator
//!
//! Terminal observer of the stream: buffers token deltas and finalizes the
//! assistant turn on completion. When a barge-in interruption arrives
//! while a turn is pending, the buffer is discarded without touching the
//! history; the turn was abandoned, not completed.

use async_trait::async_trait;
use voicepipe_core::{
    Frame, FrameDirection, FramePayload, Result, SharedHistory, Stage, StageContext,
};

pub struct AssistantTurnAggregator {
    history: SharedHistory,
}

impl AssistantTurnAggregator {
    pub fn new(history: SharedHistory) -> Self {
        Self { history }
    }
}

#[async_trait]
impl Stage for AssistantTurnAggregator {
    async fn handle(
        &self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<()> {
        match frame.payload() {
            FramePayload::DialogueTokenDelta { text }
                if direction == FrameDirection::Downstream =>
            {
                self.history.lock().push_assistant_delta(text);
                Ok(())
            }
            FramePayload::DialogueTurnComplete { text }
                if direction == FrameDirection::Downstream =>
            {
                if self.history.lock().finalize_assistant(text.clone()).is_some() {
                    tracing::debug!("assistant turn finalized");
                }
                Ok(())
            }
            FramePayload::StartInterruption => {
                if self.history.lock().abandon_assistant() {
                    tracing::debug!("pending assistant turn abandoned");
                }
                Ok(())
            }
            FramePayload::StopInterruption | FramePayload::EndOfStream => Ok(()),
            _ => ctx.forward(frame, direction).await,
        }
    }

    fn name(&self) -> &'static str {
        "assistant_turn_aggregator"
    }

    fn description(&self) -> &str {
        "Folds streamed token deltas into finalized assistant turns"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_ctx;
    use voicepipe_core::{ConversationHistory, TurnRole};

    fn delta(text: &str) -> Frame {
        Frame::new(FramePayload::DialogueTokenDelta { text: text.into() })
    }

    fn complete(text: &str) -> Frame {
        Frame::new(FramePayload::DialogueTurnComplete { text: text.into() })
    }

    #[tokio::test]
    async fn test_deltas_fold_into_one_assistant_turn() {
        let history = ConversationHistory::new().into_shared();
        let stage = AssistantTurnAggregator::new(history.clone());
        let (ctx, _emitter) = test_ctx(true);

        for frame in [delta("Hi"), delta(" there"), delta("!"), complete("Hi there!")] {
            stage
                .handle(frame, FrameDirection::Downstream, &ctx)
                .await
                .unwrap();
        }

        let history = history.lock();
        assert_eq!(history.len(), 1);
        assert_eq!(history.turns()[0].role, TurnRole::Assistant);
        assert_eq!(history.turns()[0].content, "Hi there!");
        assert!(history.pending_assistant().is_none());
    }

    #[tokio::test]
    async fn test_interruption_discards_pending_turn() {
        let history = ConversationHistory::new().into_shared();
        let stage = AssistantTurnAggregator::new(history.clone());
        let (ctx, _emitter) = test_ctx(true);

        for frame in [delta("Hi"), delta(" there"), delta("!")] {
            stage
                .handle(frame, FrameDirection::Downstream, &ctx)
                .await
                .unwrap();
        }
        stage
            .handle(
                Frame::start_interruption(),
                FrameDirection::Downstream,
                &ctx,
            )
            .await
            .unwrap();

        // No assistant message was ever appended.
        assert!(history.lock().is_empty());

        // A stale completion that slipped past the boundary drain changes
        // nothing either.
        stage
            .handle(complete("Hi there!"), FrameDirection::Downstream, &ctx)
            .await
            .unwrap();
        assert!(history.lock().is_empty());

        // A fresh turn afterwards behaves normally.
        for frame in [delta("All"), delta(" good"), complete("All good")] {
            stage
                .handle(frame, FrameDirection::Downstream, &ctx)
                .await
                .unwrap();
        }
        let history = history.lock();
        assert_eq!(history.len(), 1);
        assert_eq!(history.turns()[0].content, "All good");
    }

    #[tokio::test]
    async fn test_interruption_with_nothing_pending_is_harmless() {
        let history = ConversationHistory::new().into_shared();
        let stage = AssistantTurnAggregator::new(history.clone());
        let (ctx, _emitter) = test_ctx(true);

        stage
            .handle(
                Frame::start_interruption(),
                FrameDirection::Downstream,
                &ctx,
            )
            .await
            .unwrap();
        assert!(history.lock().is_empty());
    }
}
