//! In-memory zero-copy link
//!
//! Two connected [`LoopbackTransport`] ends. A send frame released on one end
//! is queued, without copying, for the other end's `get_recv_buffer`; releasing
//! it there returns it to the sender's pool. Stands in for a physical link
//! beneath the transport interface.

use super::bounded::BoundedQueue;
use super::buffer::{BufferPool, Frame, FrameSink, ManagedRecvBuffer, ManagedSendBuffer};
use super::{TransportParams, ZeroCopyTransport};
use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Frames in flight in one direction
struct Wire {
    queue: BoundedQueue<Frame>,
    /// Pool the frames belong to (the sending end's)
    home: Arc<BufferPool>,
}

impl FrameSink for Wire {
    fn submit(&self, frame: Frame) {
        if frame.is_empty() {
            log::trace!("Zero-length send on slot {}, not delivered", frame.slot());
            self.home.release(frame);
            return;
        }
        if let Err(frame) = self.queue.push_try(frame) {
            self.home.release(frame);
        }
    }
}

/// One end of an in-memory link
pub struct LoopbackTransport {
    send_pool: Arc<BufferPool>,
    outbound: Arc<Wire>,
    inbound: Arc<Wire>,
    closed: Arc<AtomicBool>,
}

impl LoopbackTransport {
    /// Build a connected pair.
    ///
    /// `params` describes the first end; the second end sees the mirrored
    /// geometry (its send frames are the first end's receive frames).
    pub fn pair(params: &TransportParams) -> Result<(Self, Self)> {
        let a_pool = BufferPool::new(params.send_frame_size, params.num_send_frames)?;
        let b_pool = BufferPool::new(params.recv_frame_size, params.num_recv_frames)?;

        let a_to_b = Arc::new(Wire {
            queue: BoundedQueue::new(params.num_send_frames),
            home: Arc::clone(&a_pool),
        });
        let b_to_a = Arc::new(Wire {
            queue: BoundedQueue::new(params.num_recv_frames),
            home: Arc::clone(&b_pool),
        });
        let closed = Arc::new(AtomicBool::new(false));

        let a = Self {
            send_pool: a_pool,
            outbound: Arc::clone(&a_to_b),
            inbound: Arc::clone(&b_to_a),
            closed: Arc::clone(&closed),
        };
        let b = Self {
            send_pool: b_pool,
            outbound: b_to_a,
            inbound: a_to_b,
            closed,
        };
        Ok((a, b))
    }

    /// True once either end has been dropped
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Frames delivered to this end and not yet taken
    pub fn pending_recv(&self) -> usize {
        self.inbound.queue.len()
    }
}

impl ZeroCopyTransport for LoopbackTransport {
    fn get_recv_buffer(&self, timeout: Duration) -> Option<ManagedRecvBuffer> {
        let frame = if timeout.is_zero() || self.is_closed() {
            self.inbound.queue.pop_try()
        } else {
            self.inbound.queue.pop_wait_timeout(timeout)
        }?;
        let home: Arc<dyn FrameSink> = self.inbound.home.clone();
        Some(ManagedRecvBuffer::new(frame, home))
    }

    fn get_send_buffer(&self, timeout: Duration) -> Option<ManagedSendBuffer> {
        let frame = self.send_pool.acquire(timeout)?;
        let sink: Arc<dyn FrameSink> = self.outbound.clone();
        Some(ManagedSendBuffer::new(frame, sink))
    }

    fn num_recv_frames(&self) -> usize {
        self.inbound.home.num_frames()
    }

    fn recv_frame_size(&self) -> usize {
        self.inbound.home.frame_size()
    }

    fn num_send_frames(&self) -> usize {
        self.send_pool.num_frames()
    }

    fn send_frame_size(&self) -> usize {
        self.send_pool.frame_size()
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}
