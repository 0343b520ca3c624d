//! Zero-copy transport layer
//!
//! A transport hands out pre-allocated frames for receiving and sending. The
//! caller reads or writes the frame memory in place and releases it when done;
//! nothing is staged through intermediate copies.
//!
//! - [`BoundedQueue`]: blocking FIFO used for free lists and handoff
//! - [`BufferPool`]: fixed set of frames allocated once per transport
//! - [`ManagedRecvBuffer`] / [`ManagedSendBuffer`]: exclusive frame handles
//! - [`LoopbackTransport`]: in-memory link between two transport ends

mod bounded;
mod buffer;
mod loopback;

pub use bounded::BoundedQueue;
pub use buffer::{BufferPool, Frame, FrameSink, ManagedRecvBuffer, ManagedSendBuffer};
pub use loopback::LoopbackTransport;

use crate::core::types::DeviceAddr;
use crate::error::Result;
use std::time::Duration;

/// Transport trait for streaming links.
///
/// An empty result from either acquisition means "nothing available within the
/// timeout", not an error. Pool geometry is fixed when the transport is built.
pub trait ZeroCopyTransport: Send + Sync {
    /// Wait up to `timeout` for a received frame
    fn get_recv_buffer(&self, timeout: Duration) -> Option<ManagedRecvBuffer>;

    /// Wait up to `timeout` for an idle send frame
    fn get_send_buffer(&self, timeout: Duration) -> Option<ManagedSendBuffer>;

    /// Number of receive frames
    fn num_recv_frames(&self) -> usize;

    /// Receive frame size in bytes
    fn recv_frame_size(&self) -> usize;

    /// Number of send frames
    fn num_send_frames(&self) -> usize;

    /// Send frame size in bytes
    fn send_frame_size(&self) -> usize;
}

/// Frame geometry of one transport end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    /// Receive frame size in bytes
    pub recv_frame_size: usize,
    /// Send frame size in bytes
    pub send_frame_size: usize,
    /// Number of receive frames
    pub num_recv_frames: usize,
    /// Number of send frames
    pub num_send_frames: usize,
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            recv_frame_size: 8000,
            send_frame_size: 8000,
            num_recv_frames: 32,
            num_send_frames: 32,
        }
    }
}

impl TransportParams {
    /// Apply same-named keys from a device address (e.g. `num_recv_frames=64`)
    pub fn with_overrides(mut self, args: &DeviceAddr) -> Result<Self> {
        if let Some(v) = args.get_parsed("recv_frame_size")? {
            self.recv_frame_size = v;
        }
        if let Some(v) = args.get_parsed("send_frame_size")? {
            self.send_frame_size = v;
        }
        if let Some(v) = args.get_parsed("num_recv_frames")? {
            self.num_recv_frames = v;
        }
        if let Some(v) = args.get_parsed("num_send_frames")? {
            self.num_send_frames = v;
        }
        Ok(self)
    }

    /// Geometry seen from the other end of a link
    pub fn mirrored(&self) -> Self {
        Self {
            recv_frame_size: self.send_frame_size,
            send_frame_size: self.recv_frame_size,
            num_recv_frames: self.num_send_frames,
            num_send_frames: self.num_recv_frames,
        }
    }
}
