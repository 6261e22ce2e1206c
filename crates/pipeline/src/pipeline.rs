//! Pipeline assembly and execution
//!
//! A pipeline is a fixed, ordered chain of stages. Assembly wires each
//! adjacent pair with one downstream and one upstream link, so control
//! frames injected at any point propagate toward both ends. Execution
//! spawns one worker task per stage; workers read interruption frames with
//! priority, enforce per-kind frame ordering, and drive the cooperative
//! interruption protocol:
//!
//! 1. discard queued data frames that answer the interrupted turn
//! 2. signal the stage to cancel its outstanding collaborator call
//! 3. let the stage observe the interruption, then forward it
//! 4. resume with the retained data frames
//!
//! No stage is ever force-terminated; a worker that is mid-`handle` when an
//! interruption arrives signals [`Stage::interrupt`] immediately and
//! processes the control frame as soon as the call returns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voicepipe_core::{
    Error, Frame, FrameDirection, FrameEmitter, FrameKind, FramePayload, Result, Stage,
    StageContext,
};

use crate::link::{link, FrameReceiver, FrameSender};

/// Channel capacities used when spawning a pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bounded data channel capacity (backpressure)
    pub data_capacity: usize,
    /// Control channel capacity (control frames are sparse)
    pub control_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_capacity: 64,
            control_capacity: 8,
        }
    }
}

/// An unrecoverable error that escaped a stage
#[derive(Debug)]
pub struct StageFault {
    pub stage: &'static str,
    pub error: Error,
}

/// An ordered chain of stages, fixed after assembly
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    /// Assemble a pipeline from an ordered stage list
    ///
    /// Fails before any frame flows if the chain is malformed.
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::Assembly(
                "a pipeline needs at least one stage".into(),
            ));
        }
        Ok(Self { stages })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in chain order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Spawn one worker per stage and return the handle that owns the
    /// pipeline's edges
    pub fn spawn(
        self,
        session_id: &str,
        allow_interruptions: bool,
        config: &PipelineConfig,
    ) -> PipelineHandle {
        let n = self.stages.len();
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();

        // n stages need n+1 links per direction; link j of the downstream
        // row feeds stage j (link n is the pipeline output), link j of the
        // upstream row is written by stage j (link 0 is the upstream
        // output).
        let mut down_txs = Vec::with_capacity(n + 1);
        let mut down_rxs = std::collections::VecDeque::with_capacity(n + 1);
        let mut up_txs = Vec::with_capacity(n + 1);
        let mut up_rxs = std::collections::VecDeque::with_capacity(n + 1);
        for _ in 0..=n {
            let (tx, rx) = link(config.data_capacity, config.control_capacity);
            down_txs.push(tx);
            down_rxs.push_back(rx);
            let (tx, rx) = link(config.data_capacity, config.control_capacity);
            up_txs.push(tx);
            up_rxs.push_back(rx);
        }

        let input = down_txs[0].clone();
        let tail = up_txs[n].clone();
        let upstream_output = up_rxs.pop_front().expect("link count");

        let mut workers = Vec::with_capacity(n);
        for (i, stage) in self.stages.into_iter().enumerate() {
            let down_rx = down_rxs.pop_front().expect("link count");
            let up_rx = up_rxs.pop_front().expect("link count");
            let emitter = Arc::new(LinkEmitter {
                downstream: down_txs[i + 1].clone(),
                upstream: up_txs[i].clone(),
            });
            let ctx = StageContext::new(session_id, allow_interruptions, emitter);
            let worker = StageWorker {
                stage,
                ctx,
                down: down_rx,
                up: up_rx,
                seen: HashMap::new(),
                faults: fault_tx.clone(),
                finished: false,
            };
            workers.push(tokio::spawn(worker.run()));
        }
        let output = down_rxs.pop_front().expect("link count");

        PipelineHandle {
            input,
            output,
            upstream_output,
            faults: fault_rx,
            _tail: tail,
            workers,
        }
    }
}

/// Handle to a running pipeline
pub struct PipelineHandle {
    /// Injection point: frames enter the first stage travelling downstream
    pub input: FrameSender,
    /// Frames the terminal stage emits downstream (`EndOfStream` surfaces
    /// here when the pipeline has drained)
    pub output: FrameReceiver,
    /// Frames the first stage emits upstream
    pub upstream_output: FrameReceiver,
    /// Unrecoverable stage failures
    pub faults: mpsc::UnboundedReceiver<StageFault>,
    // Keeping the tail sender alive stops the last stage's upstream inbox
    // from reading as closed.
    _tail: FrameSender,
    workers: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every stage worker to exit, bounded by `timeout`
    ///
    /// Workers still running at the deadline are aborted. Returns `true`
    /// when all workers exited on their own.
    pub async fn drain(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut clean = true;
        for worker in &mut self.workers {
            match tokio::time::timeout_at(deadline, &mut *worker).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    tracing::error!(error = %join_err, "stage worker panicked");
                    clean = false;
                }
                Err(_) => {
                    worker.abort();
                    clean = false;
                }
            }
        }
        self.workers.clear();
        if !clean {
            tracing::warn!("pipeline drain was not clean");
        }
        clean
    }
}

/// Channel-backed emitter handed to each stage
struct LinkEmitter {
    downstream: FrameSender,
    upstream: FrameSender,
}

#[async_trait]
impl FrameEmitter for LinkEmitter {
    async fn emit(&self, frame: Frame, direction: FrameDirection) -> Result<()> {
        match direction {
            FrameDirection::Downstream => self.downstream.send(frame).await,
            FrameDirection::Upstream => self.upstream.send(frame).await,
        }
    }
}

/// Per-stage worker: owns the stage's inboxes and drives `handle`
struct StageWorker {
    stage: Arc<dyn Stage>,
    ctx: StageContext,
    down: FrameReceiver,
    up: FrameReceiver,
    seen: HashMap<(FrameKind, FrameDirection), u64>,
    faults: mpsc::UnboundedSender<StageFault>,
    finished: bool,
}

impl StageWorker {
    async fn run(mut self) {
        let name = self.stage.name();
        tracing::debug!(stage = name, "stage worker started");
        if let Err(error) = self.drive().await {
            tracing::error!(stage = name, error = %error, "unrecoverable stage error");
            let _ = self.faults.send(StageFault { stage: name, error });
        }
        tracing::debug!(stage = name, "stage worker exiting");
    }

    async fn drive(&mut self) -> Result<()> {
        self.stage.on_start(&self.ctx).await?;
        while !self.finished {
            let Some((frame, direction)) = self.next_frame().await else {
                break;
            };
            if frame.is_control() {
                self.handle_control(frame, direction).await?;
            } else if self.check_order(&frame, direction) {
                self.handle_data(frame, direction).await?;
            }
        }
        self.stage.on_stop(&self.ctx).await
    }

    /// Next inbound frame, control before data, either direction
    async fn next_frame(&mut self) -> Option<(Frame, FrameDirection)> {
        let Self { down, up, .. } = self;
        loop {
            tokio::select! {
                biased;
                frame = down.control.recv(), if !down.control_closed => match frame {
                    Some(frame) => return Some((frame, FrameDirection::Downstream)),
                    None => down.control_closed = true,
                },
                frame = up.control.recv(), if !up.control_closed => match frame {
                    Some(frame) => return Some((frame, FrameDirection::Upstream)),
                    None => up.control_closed = true,
                },
                frame = down.data.recv(), if !down.data_closed => match frame {
                    Some(frame) => return Some((frame, FrameDirection::Downstream)),
                    None => down.data_closed = true,
                },
                frame = up.data.recv(), if !up.data_closed => match frame {
                    Some(frame) => return Some((frame, FrameDirection::Upstream)),
                    None => up.data_closed = true,
                },
                else => return None,
            }
        }
    }

    /// Drive `handle` for a data frame while still watching the control
    /// channels, so an interruption can cancel the in-flight call
    async fn handle_data(&mut self, frame: Frame, direction: FrameDirection) -> Result<()> {
        let mut stashed: Vec<(Frame, FrameDirection)> = Vec::new();
        {
            let Self {
                stage, ctx, down, up, ..
            } = self;
            let fut = stage.handle(frame, direction, ctx);
            tokio::pin!(fut);
            loop {
                tokio::select! {
                    biased;
                    ctl = down.control.recv(), if !down.control_closed => match ctl {
                        Some(ctl) => {
                            if cancels_in_flight(&ctl) {
                                stage.interrupt();
                            }
                            stashed.push((ctl, FrameDirection::Downstream));
                        }
                        None => down.control_closed = true,
                    },
                    ctl = up.control.recv(), if !up.control_closed => match ctl {
                        Some(ctl) => {
                            if cancels_in_flight(&ctl) {
                                stage.interrupt();
                            }
                            stashed.push((ctl, FrameDirection::Upstream));
                        }
                        None => up.control_closed = true,
                    },
                    res = &mut fut => {
                        res?;
                        break;
                    }
                }
            }
        }
        for (ctl, dir) in stashed {
            self.handle_control(ctl, dir).await?;
        }
        Ok(())
    }

    async fn handle_control(&mut self, frame: Frame, direction: FrameDirection) -> Result<()> {
        match frame.payload() {
            FramePayload::StartInterruption => {
                // Discard queued frames that answer the interrupted turn;
                // everything else is replayed after the interruption.
                let inbound = match direction {
                    FrameDirection::Downstream => &mut self.down,
                    FrameDirection::Upstream => &mut self.up,
                };
                let mut retained = Vec::new();
                let mut discarded = 0usize;
                for queued in inbound.drain_data() {
                    if queued.payload().is_turn_output() {
                        discarded += 1;
                    } else {
                        retained.push(queued);
                    }
                }
                if discarded > 0 {
                    tracing::debug!(
                        stage = self.stage.name(),
                        discarded,
                        "dropped queued frames of interrupted turn"
                    );
                }
                self.stage.interrupt();
                self.stage.handle(frame.clone(), direction, &self.ctx).await?;
                self.forward_control(frame, direction).await;
                for queued in retained {
                    // An end-of-stream drained out of the data queue keeps
                    // its shutdown semantics.
                    if queued.is_end_of_stream() {
                        self.stage.handle(queued.clone(), direction, &self.ctx).await?;
                        self.forward_control(queued, direction).await;
                        if direction == FrameDirection::Downstream {
                            self.finished = true;
                        }
                    } else if self.check_order(&queued, direction) {
                        self.stage.handle(queued, direction, &self.ctx).await?;
                    }
                }
            }
            FramePayload::StopInterruption => {
                self.stage.handle(frame.clone(), direction, &self.ctx).await?;
                self.forward_control(frame, direction).await;
            }
            FramePayload::EndOfStream => {
                // The stage observes the end of stream first (final flush),
                // then it is passed on; the worker shuts down once the
                // downstream copy has been forwarded.
                self.stage.handle(frame.clone(), direction, &self.ctx).await?;
                self.forward_control(frame, direction).await;
                if direction == FrameDirection::Downstream {
                    self.finished = true;
                }
            }
            _ => {
                tracing::warn!(
                    stage = self.stage.name(),
                    kind = %frame.kind(),
                    "data frame on control path; dropping"
                );
            }
        }
        Ok(())
    }

    /// Control propagation is the worker's job; a closed link during
    /// shutdown is expected and not an error
    async fn forward_control(&self, frame: Frame, direction: FrameDirection) {
        if let Err(e) = self.ctx.forward(frame, direction).await {
            tracing::debug!(stage = self.stage.name(), error = %e, "control forward skipped");
        }
    }

    /// Per-(kind, direction) sequence ids must strictly increase; a
    /// violating frame is dropped with a diagnostic rather than propagated
    fn check_order(&mut self, frame: &Frame, direction: FrameDirection) -> bool {
        let key = (frame.kind(), direction);
        if let Some(&last) = self.seen.get(&key) {
            if frame.seq() <= last {
                tracing::warn!(
                    stage = self.stage.name(),
                    kind = %frame.kind(),
                    seq = frame.seq(),
                    last_seq = last,
                    "dropping frame with non-increasing sequence id"
                );
                return false;
            }
        }
        self.seen.insert(key, frame.seq());
        true
    }
}

/// Control frames that must cancel an in-flight collaborator call
fn cancels_in_flight(frame: &Frame) -> bool {
    matches!(frame.payload(), FramePayload::StartInterruption)
}
