//! Session lifecycle for voicepipe
//!
//! A [`PipelineTask`] is one conversational session: the assembled
//! pipeline, the frames that seed it, and the session policy. A
//! [`PipelineRunner`] drives a task to completion and owns the top-level
//! cancellation lifecycle: external shutdown becomes an in-band
//! `EndOfStream` plus a bounded drain, never an abrupt teardown that
//! skips the sink's final flush. The [`CaptureFeeder`] pumps an audio
//! capture device into the running pipeline.

pub mod capture;
pub mod runner;
pub mod task;

pub use capture::CaptureFeeder;
pub use runner::{PipelineRunner, RunOutcome, RunnerState};
pub use task::{PipelineTask, TaskParams};
