//! Frame model
//!
//! A [`Frame`] is the immutable unit of data or control exchanged between
//! pipeline stages. Every frame carries a process-wide strictly increasing
//! sequence id and a creation timestamp; a frame produced in response to
//! another references the originating id for traceability.
//!
//! Note: frames are process-internal and carry bulky sample buffers, so the
//! payload is deliberately not serializable.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::audio::{Channels, SampleRate};
use crate::conversation::Turn;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

fn next_seq() -> u64 {
    NEXT_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Direction a frame travels through the pipeline
///
/// Data flows downstream (capture toward playback); control signals may be
/// injected in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDirection {
    Downstream,
    Upstream,
}

/// Payload variants that flow through the pipeline
#[derive(Debug, Clone)]
pub enum FramePayload {
    /// Raw audio from the capture transport
    AudioChunk {
        samples: Vec<i16>,
        sample_rate: SampleRate,
        channels: Channels,
    },

    /// Partial transcript (utterance still in progress)
    TranscriptPartial { text: String },

    /// Final transcript for one utterance
    TranscriptFinal { text: String },

    /// Request for a dialogue turn, carrying the full conversation so far
    DialogueTurnRequest { messages: Vec<Turn> },

    /// One streamed token of the assistant response
    DialogueTokenDelta { text: String },

    /// Completed assistant response (full text)
    DialogueTurnComplete { text: String },

    /// Synthesized speech audio for playback
    SynthesizedAudioChunk { samples: Vec<i16> },

    /// User barge-in detected; in-flight work for the current assistant
    /// turn must be cancelled
    StartInterruption,

    /// The interruption window has ended; normal emission resumes
    StopInterruption,

    /// End of stream marker
    EndOfStream,
}

impl FramePayload {
    /// Fieldless discriminant, used for per-kind ordering accounting
    pub fn kind(&self) -> FrameKind {
        match self {
            FramePayload::AudioChunk { .. } => FrameKind::AudioChunk,
            FramePayload::TranscriptPartial { .. } => FrameKind::TranscriptPartial,
            FramePayload::TranscriptFinal { .. } => FrameKind::TranscriptFinal,
            FramePayload::DialogueTurnRequest { .. } => FrameKind::DialogueTurnRequest,
            FramePayload::DialogueTokenDelta { .. } => FrameKind::DialogueTokenDelta,
            FramePayload::DialogueTurnComplete { .. } => FrameKind::DialogueTurnComplete,
            FramePayload::SynthesizedAudioChunk { .. } => FrameKind::SynthesizedAudioChunk,
            FramePayload::StartInterruption => FrameKind::StartInterruption,
            FramePayload::StopInterruption => FrameKind::StopInterruption,
            FramePayload::EndOfStream => FrameKind::EndOfStream,
        }
    }

    /// Control frames are delivered ahead of queued data frames
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            FramePayload::StartInterruption
                | FramePayload::StopInterruption
                | FramePayload::EndOfStream
        )
    }

    /// Out-of-band frames, delivered ahead of queued data
    ///
    /// Interruptions preempt anything not yet dequeued. `EndOfStream` is
    /// control but deliberately in-band: it marks the end of the stream,
    /// so it must not overtake data queued ahead of it (the sink's
    /// final-flush guarantee depends on that).
    pub fn is_priority(&self) -> bool {
        matches!(
            self,
            FramePayload::StartInterruption | FramePayload::StopInterruption
        )
    }

    /// Frames produced in response to an assistant turn; discarded at the
    /// inbound boundary when that turn is interrupted
    pub fn is_turn_output(&self) -> bool {
        matches!(
            self,
            FramePayload::DialogueTokenDelta { .. }
                | FramePayload::DialogueTurnComplete { .. }
                | FramePayload::SynthesizedAudioChunk { .. }
        )
    }
}

/// Frame kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    AudioChunk,
    TranscriptPartial,
    TranscriptFinal,
    DialogueTurnRequest,
    DialogueTokenDelta,
    DialogueTurnComplete,
    SynthesizedAudioChunk,
    StartInterruption,
    StopInterruption,
    EndOfStream,
}

impl FrameKind {
    /// Name for tracing
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::AudioChunk => "audio_chunk",
            FrameKind::TranscriptPartial => "transcript_partial",
            FrameKind::TranscriptFinal => "transcript_final",
            FrameKind::DialogueTurnRequest => "dialogue_turn_request",
            FrameKind::DialogueTokenDelta => "dialogue_token_delta",
            FrameKind::DialogueTurnComplete => "dialogue_turn_complete",
            FrameKind::SynthesizedAudioChunk => "synthesized_audio_chunk",
            FrameKind::StartInterruption => "start_interruption",
            FrameKind::StopInterruption => "stop_interruption",
            FrameKind::EndOfStream => "end_of_stream",
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, sequence-numbered unit of data or control
#[derive(Debug, Clone)]
pub struct Frame {
    seq: u64,
    created_at: DateTime<Utc>,
    origin: Option<u64>,
    payload: FramePayload,
}

impl Frame {
    /// Create a source frame with a fresh sequence id
    pub fn new(payload: FramePayload) -> Self {
        Self {
            seq: next_seq(),
            created_at: Utc::now(),
            origin: None,
            payload,
        }
    }

    /// Create a frame derived from another, recording the originating id
    pub fn derived(payload: FramePayload, origin: &Frame) -> Self {
        Self {
            seq: next_seq(),
            created_at: Utc::now(),
            origin: Some(origin.seq),
            payload,
        }
    }

    /// Convenience constructor for a capture audio frame
    pub fn audio_chunk(samples: Vec<i16>, sample_rate: SampleRate, channels: Channels) -> Self {
        Self::new(FramePayload::AudioChunk {
            samples,
            sample_rate,
            channels,
        })
    }

    pub fn start_interruption() -> Self {
        Self::new(FramePayload::StartInterruption)
    }

    pub fn stop_interruption() -> Self {
        Self::new(FramePayload::StopInterruption)
    }

    pub fn end_of_stream() -> Self {
        Self::new(FramePayload::EndOfStream)
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn origin(&self) -> Option<u64> {
        self.origin
    }

    pub fn payload(&self) -> &FramePayload {
        &self.payload
    }

    pub fn into_payload(self) -> FramePayload {
        self.payload
    }

    pub fn kind(&self) -> FrameKind {
        self.payload.kind()
    }

    pub fn is_control(&self) -> bool {
        self.payload.is_control()
    }

    pub fn is_priority(&self) -> bool {
        self.payload.is_priority()
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self.payload, FramePayload::EndOfStream)
    }
}
