//! Bounded frame links between neighboring stages
//!
//! Each link carries one direction of traffic between two neighbors and is
//! really a pair of channels: a bounded data channel whose capacity creates
//! backpressure, and a small priority channel read first, so interruption
//! frames preempt any data not yet dequeued. `EndOfStream` travels on the
//! data channel: it marks the end of the stream and must not overtake data
//! queued ahead of it.

use tokio::sync::mpsc;
use voicepipe_core::{Error, Frame, Result};

/// Create a link with the given capacities.
pub fn link(data_capacity: usize, control_capacity: usize) -> (FrameSender, FrameReceiver) {
    let (data_tx, data_rx) = mpsc::channel(data_capacity);
    let (control_tx, control_rx) = mpsc::channel(control_capacity);
    (
        FrameSender {
            data: data_tx,
            control: control_tx,
        },
        FrameReceiver {
            data: data_rx,
            control: control_rx,
            data_closed: false,
            control_closed: false,
        },
    )
}

/// Sending half of a link; routes frames by class
#[derive(Clone)]
pub struct FrameSender {
    data: mpsc::Sender<Frame>,
    control: mpsc::Sender<Frame>,
}

impl FrameSender {
    /// Send a frame, suspending while the target queue is full
    pub async fn send(&self, frame: Frame) -> Result<()> {
        let channel = if frame.is_priority() {
            &self.control
        } else {
            &self.data
        };
        channel
            .send(frame)
            .await
            .map_err(|_| Error::ChannelClosed("stage link"))
    }
}

/// Receiving half of a link
pub struct FrameReceiver {
    pub(crate) data: mpsc::Receiver<Frame>,
    pub(crate) control: mpsc::Receiver<Frame>,
    pub(crate) data_closed: bool,
    pub(crate) control_closed: bool,
}

impl FrameReceiver {
    /// Receive the next frame, control first
    ///
    /// Returns `None` once both halves are closed and drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            tokio::select! {
                biased;
                frame = self.control.recv(), if !self.control_closed => match frame {
                    Some(frame) => return Some(frame),
                    None => self.control_closed = true,
                },
                frame = self.data.recv(), if !self.data_closed => match frame {
                    Some(frame) => return Some(frame),
                    None => self.data_closed = true,
                },
                else => return None,
            }
        }
    }

    /// Drain whatever data frames are queued right now
    pub(crate) fn drain_data(&mut self) -> Vec<Frame> {
        let mut drained = Vec::new();
        while let Ok(frame) = self.data.try_recv() {
            drained.push(frame);
        }
        drained
    }
}
