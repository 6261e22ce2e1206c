//! Speech processing collaborator seams

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;

/// Events produced by a recognizer as audio is fed to it
///
/// Per utterance the recognizer emits `SpeechStarted`, zero or more
/// `Partial`s, exactly one `Final`, then `SpeechEnded`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Voice activity began; the capture boundary uses this to raise a
    /// barge-in interruption
    SpeechStarted,
    /// Partial transcript, superseded by later events
    Partial(String),
    /// Final transcript for the utterance
    Final(String),
    /// Voice activity ended (silence detected)
    SpeechEnded,
}

/// Speech-to-text interface
///
/// Push contract: the recognition stage feeds capture audio chunk by chunk
/// and receives whatever events became available. Must support abandoning
/// the in-flight utterance mid-way.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Feed one chunk of capture audio; returns events ready so far
    async fn feed(&self, samples: &[i16]) -> Result<Vec<RecognitionEvent>>;

    /// Abandon the in-flight utterance and return to a ready state
    async fn cancel(&self) -> Result<()>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}

/// Stream of synthesized sample buffers
pub type SampleStream<'a> = Pin<Box<dyn Stream<Item = Result<Vec<i16>>> + Send + 'a>>;

/// Text-to-speech interface
///
/// Synthesis is streamed so playback can begin before the full response is
/// rendered; dropping the stream cancels the in-flight request.
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Synthesize completed assistant text into a stream of audio chunks
    fn synthesize<'a>(&'a self, text: &'a str) -> SampleStream<'a>;

    /// Voice name for logging
    fn voice_name(&self) -> &str;
}
