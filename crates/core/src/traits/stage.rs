//! Pipeline stage contract

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::frame::{Frame, FrameDirection};

/// Outbound side of a stage, as seen from inside the stage
///
/// The channel-backed implementation lives in the pipeline crate; tests
/// substitute a collecting emitter. Emission respects backpressure: a full
/// downstream queue suspends the caller.
#[async_trait]
pub trait FrameEmitter: Send + Sync + 'static {
    async fn emit(&self, frame: Frame, direction: FrameDirection) -> Result<()>;
}

/// Context handed to a stage for the lifetime of a session
#[derive(Clone)]
pub struct StageContext {
    session_id: String,
    interruptions_allowed: bool,
    emitter: Arc<dyn FrameEmitter>,
}

impl StageContext {
    pub fn new(
        session_id: impl Into<String>,
        interruptions_allowed: bool,
        emitter: Arc<dyn FrameEmitter>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            interruptions_allowed,
            emitter,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether barge-in interruption frames may be emitted in this session
    pub fn interruptions_allowed(&self) -> bool {
        self.interruptions_allowed
    }

    /// Emit a frame toward the playback end of the pipeline
    pub async fn send_downstream(&self, frame: Frame) -> Result<()> {
        self.emitter.emit(frame, FrameDirection::Downstream).await
    }

    /// Emit a frame toward the capture end of the pipeline
    pub async fn send_upstream(&self, frame: Frame) -> Result<()> {
        self.emitter.emit(frame, FrameDirection::Upstream).await
    }

    /// Pass a frame onward in its direction of travel
    pub async fn forward(&self, frame: Frame, direction: FrameDirection) -> Result<()> {
        self.emitter.emit(frame, direction).await
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("session_id", &self.session_id)
            .field("interruptions_allowed", &self.interruptions_allowed)
            .finish_non_exhaustive()
    }
}

/// One processing unit in the pipeline
///
/// A stage consumes frames from an inbound direction, optionally produces
/// new frames through the context, and forwards data frames it does not
/// consume. Frames of the same kind must retain their inbound order.
///
/// Contract notes:
/// - Control frames (`StartInterruption`, `StopInterruption`,
///   `EndOfStream`) are delivered to `handle` so the stage can update its
///   state (cancel work, flush buffers), but the pipeline propagates them
///   itself; a stage must not re-forward them.
/// - A stage must not block its worker for unbounded time: collaborator
///   calls are issued as cancellable operations, cut short when
///   [`Stage::interrupt`] fires or a configured timeout elapses. Both are
///   normal outcomes, not errors.
/// - An error escaping `handle` is unrecoverable by definition (transient
///   collaborator failures are recovered inside the stage) and takes the
///   whole pipeline down.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// Process one inbound frame
    async fn handle(
        &self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<()>;

    /// Stage name for tracing
    fn name(&self) -> &'static str;

    /// Stage description
    fn description(&self) -> &str {
        ""
    }

    /// Signal the stage to cancel any outstanding collaborator call
    ///
    /// Called by the worker the moment a `StartInterruption` or
    /// `EndOfStream` arrives, possibly while `handle` is still in flight.
    /// Must be cheap and non-blocking.
    fn interrupt(&self) {}

    /// Called once before the first frame
    async fn on_start(&self, _ctx: &StageContext) -> Result<()> {
        Ok(())
    }

    /// Called once after the stage has observed `EndOfStream`
    async fn on_stop(&self, _ctx: &StageContext) -> Result<()> {
        Ok(())
    }
}
