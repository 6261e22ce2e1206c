//! Dialogue model collaborator seam

use std::pin::Pin;

use futures::Stream;

use crate::conversation::Turn;
use crate::error::Result;

/// Stream of response token deltas
pub type TokenStream<'a> = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>>;

/// Language model interface
///
/// Given the conversation so far, yields the assistant response as a stream
/// of token deltas. Dropping the stream cancels the in-flight request.
pub trait DialogueModel: Send + Sync + 'static {
    /// Generate a response to the given conversation
    fn respond<'a>(&'a self, turns: &'a [Turn]) -> TokenStream<'a>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}
