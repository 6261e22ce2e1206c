//! Pipeline assembly and execution for voicepipe
//!
//! This crate provides the orchestration layer of the conversation runtime:
//! - Bounded, direction-aware frame links between neighboring stages
//! - The pipeline: assembly of an ordered stage chain and the per-stage
//!   workers that move frames, enforce ordering, and honor the
//!   interruption protocol
//! - The collaborator-wrapping stages (recognition, dialogue, synthesis,
//!   playback)
//! - The user/assistant turn aggregators
//! - The WAV audio persistence sink

pub mod aggregators;
pub mod link;
pub mod pipeline;
pub mod sink;
pub mod stages;

pub use aggregators::{AssistantTurnAggregator, UserTurnAggregator};
pub use link::{link, FrameReceiver, FrameSender};
pub use pipeline::{Pipeline, PipelineConfig, PipelineHandle, StageFault};
pub use sink::{AudioSaver, SaverConfig, WavSinkBuffer};
pub use stages::{DialogueStage, PlaybackStage, RecognitionStage, SynthesisStage};

#[cfg(test)]
pub(crate) mod test_util {
    //! Shared helpers for stage unit tests.

    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use voicepipe_core::{Frame, FrameDirection, FrameEmitter, Result, StageContext};

    /// Emitter that records every emission instead of sending it anywhere.
    #[derive(Default)]
    pub(crate) struct CollectEmitter {
        frames: Mutex<Vec<(Frame, FrameDirection)>>,
    }

    #[async_trait]
    impl FrameEmitter for CollectEmitter {
        async fn emit(&self, frame: Frame, direction: FrameDirection) -> Result<()> {
            self.frames.lock().push((frame, direction));
            Ok(())
        }
    }

    impl CollectEmitter {
        pub(crate) fn take(&self) -> Vec<(Frame, FrameDirection)> {
            std::mem::take(&mut *self.frames.lock())
        }

        pub(crate) fn downstream(&self) -> Vec<Frame> {
            self.frames
                .lock()
                .iter()
                .filter(|(_, d)| *d == FrameDirection::Downstream)
                .map(|(f, _)| f.clone())
                .collect()
        }

        pub(crate) fn upstream(&self) -> Vec<Frame> {
            self.frames
                .lock()
                .iter()
                .filter(|(_, d)| *d == FrameDirection::Upstream)
                .map(|(f, _)| f.clone())
                .collect()
        }
    }

    /// A context wired to a collecting emitter.
    pub(crate) fn test_ctx(allow_interruptions: bool) -> (StageContext, Arc<CollectEmitter>) {
        let emitter = Arc::new(CollectEmitter::default());
        let ctx = StageContext::new("test-session", allow_interruptions, emitter.clone());
        (ctx, emitter)
    }
}
