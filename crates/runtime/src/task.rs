//! Pipeline task: one conversational session

use uuid::Uuid;
use voicepipe_core::Frame;
use voicepipe_pipeline::{Pipeline, PipelineConfig, PipelineHandle};

/// Session policy and channel sizing
#[derive(Debug, Clone)]
pub struct TaskParams {
    /// Whether user speech may interrupt an in-flight assistant turn
    pub allow_interruptions: bool,
    /// Channel capacities for the spawned pipeline
    pub channels: PipelineConfig,
}

impl Default for TaskParams {
    fn default() -> Self {
        Self {
            allow_interruptions: true,
            channels: PipelineConfig::default(),
        }
    }
}

/// One conversational session
///
/// Wraps the assembled pipeline together with the frames to inject before
/// driving begins (the conversation seed) and the interruption policy.
/// Created once per session and consumed by the runner.
pub struct PipelineTask {
    pipeline: Pipeline,
    params: TaskParams,
    seeds: Vec<Frame>,
    session_id: String,
}

impl PipelineTask {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            params: TaskParams::default(),
            seeds: Vec::new(),
            session_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_params(mut self, params: TaskParams) -> Self {
        self.params = params;
        self
    }

    /// Queue a frame to inject before the runner starts driving
    pub fn queue_frame(&mut self, frame: Frame) {
        self.seeds.push(frame);
    }

    pub fn queue_frames(&mut self, frames: impl IntoIterator<Item = Frame>) {
        self.seeds.extend(frames);
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn allow_interruptions(&self) -> bool {
        self.params.allow_interruptions
    }

    /// Spawn the pipeline and hand back the seeds for injection
    pub(crate) fn start(self) -> (PipelineHandle, Vec<Frame>) {
        let handle = self.pipeline.spawn(
            &self.session_id,
            self.params.allow_interruptions,
            &self.params.channels,
        );
        (handle, self.seeds)
    }
}
