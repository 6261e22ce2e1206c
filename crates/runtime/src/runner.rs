//! Pipeline runner
//!
//! Drives a task to completion: `idle -> running -> (completed | cancelled
//! | failed)`. Running ends normally when the `EndOfStream` injected at
//! the source reaches the terminal stage. An external shutdown cancels the
//! runner's token, which is translated into an in-band `EndOfStream` plus
//! a bounded drain, so the sink's final flush always happens. A stage
//! fault ends the run as failed, after the same best-effort drain.

use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use voicepipe_core::{AudioCapture, Error, Frame, Result};

use crate::capture::CaptureFeeder;
use crate::task::PipelineTask;

/// Observable runner state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// How a run ended, when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// `EndOfStream` reached the terminal stage
    Completed,
    /// Shutdown was requested and the pipeline drained
    Cancelled,
}

pub struct PipelineRunner {
    shutdown: CancellationToken,
    drain_timeout: Duration,
    state: Mutex<RunnerState>,
}

impl Default for PipelineRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRunner {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            drain_timeout: Duration::from_secs(5),
            state: Mutex::new(RunnerState::Idle),
        }
    }

    /// Bound on waiting for stages to drain at shutdown
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Token cancelled to request shutdown; honored cooperatively at every
    /// suspension point instead of killing anything
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn state(&self) -> RunnerState {
        *self.state.lock()
    }

    fn set_state(&self, state: RunnerState) {
        *self.state.lock() = state;
    }

    /// Drive the task until it completes, is cancelled, or fails
    pub async fn run(&self, task: PipelineTask) -> Result<RunOutcome> {
        self.run_inner(task, None).await
    }

    /// Drive the task while feeding it from an audio capture source
    ///
    /// The feeder shares the runner's shutdown token: one cancellation
    /// stops capture and drains the pipeline. A finite source ends the
    /// session on its own by sending `EndOfStream` when it runs dry.
    pub async fn run_with_capture(
        &self,
        task: PipelineTask,
        source: Box<dyn AudioCapture>,
    ) -> Result<RunOutcome> {
        self.run_inner(task, Some(source)).await
    }

    async fn run_inner(
        &self,
        task: PipelineTask,
        source: Option<Box<dyn AudioCapture>>,
    ) -> Result<RunOutcome> {
        let session_id = task.session_id().to_string();
        self.set_state(RunnerState::Running);
        tracing::info!(session_id = %session_id, "pipeline run starting");

        let (mut handle, seeds) = task.start();
        for seed in seeds {
            if let Err(e) = handle.input.send(seed).await {
                self.set_state(RunnerState::Failed);
                return Err(e);
            }
        }

        let mut feeder = source.map(|source| {
            CaptureFeeder::new(source, handle.input.clone(), self.shutdown.clone()).spawn()
        });

        let mut eos_injected = false;
        let mut faults_open = true;
        let mut upstream_open = true;
        let outcome = loop {
            tokio::select! {
                biased;
                fault = handle.faults.recv(), if faults_open => match fault {
                    Some(fault) => {
                        tracing::error!(
                            session_id = %session_id,
                            stage = fault.stage,
                            error = %fault.error,
                            "pipeline failed"
                        );
                        // Best-effort drain so the sink still gets its
                        // final flush.
                        if let Some(feeder) = feeder.take() {
                            feeder.abort();
                        }
                        let _ = handle.input.send(Frame::end_of_stream()).await;
                        handle.drain(self.drain_timeout).await;
                        self.set_state(RunnerState::Failed);
                        return Err(fault.error);
                    }
                    None => faults_open = false,
                },
                _ = self.shutdown.cancelled(), if !eos_injected => {
                    tracing::info!(session_id = %session_id, "shutdown requested; draining");
                    eos_injected = true;
                    if handle.input.send(Frame::end_of_stream()).await.is_err() {
                        break RunOutcome::Cancelled;
                    }
                }
                frame = handle.output.recv() => match frame {
                    Some(frame) if frame.is_end_of_stream() => {
                        break if eos_injected {
                            RunOutcome::Cancelled
                        } else {
                            RunOutcome::Completed
                        };
                    }
                    Some(frame) => {
                        tracing::trace!(kind = %frame.kind(), "frame left the pipeline");
                    }
                    None => {
                        self.set_state(RunnerState::Failed);
                        return Err(Error::ChannelClosed("pipeline output"));
                    }
                },
                frame = handle.upstream_output.recv(), if upstream_open => match frame {
                    // Control surfacing at the capture end has nowhere
                    // further to go.
                    Some(frame) => {
                        tracing::trace!(kind = %frame.kind(), "frame left the capture end");
                    }
                    None => upstream_open = false,
                },
            }
        };

        if let Some(mut feeder) = feeder.take() {
            if tokio::time::timeout(self.drain_timeout, &mut feeder)
                .await
                .is_err()
            {
                feeder.abort();
            }
        }
        if !handle.drain(self.drain_timeout).await {
            tracing::warn!(session_id = %session_id, "stages did not drain cleanly");
        }
        match outcome {
            RunOutcome::Completed => self.set_state(RunnerState::Completed),
            RunOutcome::Cancelled => self.set_state(RunnerState::Cancelled),
        }
        tracing::info!(session_id = %session_id, outcome = ?outcome, "pipeline run finished");
        Ok(outcome)
    }
}
