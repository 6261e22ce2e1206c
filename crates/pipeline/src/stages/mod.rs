//! Collaborator-wrapping stages
//!
//! Each stage here adapts one external collaborator (recognition,
//! dialogue, synthesis, playback) to the frame protocol. Every blocking
//! collaborator call is cancellable: it is raced against the stage's
//! cancellation token (fired by [`Stage::interrupt`]) and bounded by a
//! configured timeout. An elapsed timeout is treated exactly like a
//! received interruption for that call, never as an error.
//!
//! [`Stage::interrupt`]: voicepipe_core::Stage::interrupt

mod dialogue;
mod playback;
mod recognition;
mod synthesis;

pub use dialogue::DialogueStage;
pub use playback::PlaybackStage;
pub use recognition::RecognitionStage;
pub use synthesis::SynthesisStage;
