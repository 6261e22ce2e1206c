//! Trait seams for the voicepipe runtime
//!
//! All external collaborators and the pipeline stage contract are defined
//! here so implementations can be swapped (and mocked in tests) without
//! touching the orchestration layer:
//!
//! ```text
//! Pipeline:
//!   - Stage: one processing unit in the chain
//!   - FrameEmitter: how a stage pushes frames to its neighbors
//!
//! Collaborators:
//!   - SpeechRecognizer: audio -> transcript events
//!   - SpeechSynthesizer: text -> audio stream
//!   - DialogueModel: conversation -> streamed tokens
//!   - AudioCapture / AudioPlayback: device boundaries
//! ```

mod dialogue;
mod speech;
mod stage;
mod transport;

pub use dialogue::{DialogueModel, TokenStream};
pub use speech::{RecognitionEvent, SampleStream, SpeechRecognizer, SpeechSynthesizer};
pub use stage::{FrameEmitter, Stage, StageContext};
pub use transport::{AudioCapture, AudioPlayback};
