//! Core types and trait seams for the voicepipe runtime
//!
//! This crate provides the foundational pieces used across the workspace:
//! - The frame model (typed data/control units flowing between stages)
//! - Conversation history (append-only, shared by the turn aggregators)
//! - Audio primitives (sample rates, channel layouts)
//! - Error types
//! - Trait seams for pluggable collaborators (recognition, dialogue,
//!   synthesis, capture, playback) and for pipeline stages

pub mod audio;
pub mod conversation;
pub mod error;
pub mod frame;
pub mod traits;

pub use audio::{Channels, SampleRate};
pub use conversation::{ConversationHistory, SharedHistory, Turn, TurnRole};
pub use error::{Error, Result};
pub use frame::{Frame, FrameDirection, FrameKind, FramePayload};

pub use traits::{
    // Pipeline
    FrameEmitter, Stage, StageContext,
    // Speech
    RecognitionEvent, SampleStream, SpeechRecognizer, SpeechSynthesizer,
    // Dialogue
    DialogueModel, TokenStream,
    // Transport
    AudioCapture, AudioPlayback,
};
