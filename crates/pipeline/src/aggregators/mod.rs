//! Turn aggregators
//!
//! Fold fragmented frames into whole conversation turns. Both aggregators
//! hold clones of the same [`SharedHistory`] handle, so there is exactly
//! one history per session and mutation is append-only.
//!
//! [`SharedHistory`]: voicepipe_core::SharedHistory

mod assistant;
mod user;

pub use assistant::AssistantTurnAggregator;
pub use user::UserTurnAggregator;
