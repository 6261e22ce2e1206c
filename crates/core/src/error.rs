//! Error types shared across the workspace
//!
//! Cancellation is deliberately not represented here: an interrupted or
//! timed-out collaborator call is a normal control-flow outcome, handled by
//! the interruption protocol, never surfaced as an `Error`.

use thiserror::Error;

/// Workspace-wide error type
#[derive(Error, Debug)]
pub enum Error {
    /// The pipeline could not be assembled (raised before any frame flows)
    #[error("pipeline assembly error: {0}")]
    Assembly(String),

    #[error("recognition error: {0}")]
    Recognition(String),

    #[error("dialogue error: {0}")]
    Dialogue(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("playback error: {0}")]
    Playback(String),

    #[error("audio capture error: {0}")]
    Capture(String),

    /// Sink write failure; non-fatal at the stage level, retried on the
    /// next flush boundary
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("{stage} call timed out after {timeout_ms}ms")]
    Timeout {
        stage: &'static str,
        timeout_ms: u64,
    },

    /// A frame that violates an inter-stage invariant; the frame is dropped
    /// by the receiving boundary rather than propagated
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
