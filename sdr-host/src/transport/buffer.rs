//! Frame pools and managed buffers
//!
//! A [`BufferPool`] allocates all of its frames once, at construction, and
//! keeps the idle ones on a [`BoundedQueue`] free list. Acquiring a frame moves
//! it out of the free list; the managed buffer wrapping it hands it to a
//! [`FrameSink`] exactly once, when released or dropped. Frames are never freed
//! while their pool is alive.

use super::bounded::BoundedQueue;
use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One fixed-size memory window owned by a pool
pub struct Frame {
    slot: usize,
    data: Box<[u8]>,
    len: usize,
}

impl Frame {
    fn new(slot: usize, frame_size: usize) -> Self {
        Self {
            slot,
            data: vec![0u8; frame_size].into_boxed_slice(),
            len: 0,
        }
    }

    /// Index of this frame inside its pool
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Valid payload length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no payload is recorded
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the payload length (clamped to the frame size)
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    /// Frame size in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Payload bytes (`..len`)
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Whole memory window, for writers
    pub fn window_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("slot", &self.slot)
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}

/// Destination of a released frame
pub trait FrameSink: Send + Sync {
    /// Take ownership of a released frame
    fn submit(&self, frame: Frame);
}

/// Fixed-capacity pool of equally sized frames
pub struct BufferPool {
    frame_size: usize,
    num_frames: usize,
    free: BoundedQueue<Frame>,
}

impl BufferPool {
    /// Allocate `num_frames` frames of `frame_size` bytes
    pub fn new(frame_size: usize, num_frames: usize) -> Result<Arc<Self>> {
        if frame_size == 0 || num_frames == 0 {
            return Err(Error::InvalidArgument(format!(
                "buffer pool needs non-zero frames (frame_size={}, num_frames={})",
                frame_size, num_frames
            )));
        }

        let free = BoundedQueue::new(num_frames);
        for slot in 0..num_frames {
            // Capacity equals num_frames, so this cannot fail
            let _ = free.push_try(Frame::new(slot, frame_size));
        }

        Ok(Arc::new(Self {
            frame_size,
            num_frames,
            free,
        }))
    }

    /// Take an idle frame, waiting at most `timeout`
    pub fn acquire(&self, timeout: Duration) -> Option<Frame> {
        if timeout.is_zero() {
            self.free.pop_try()
        } else {
            self.free.pop_wait_timeout(timeout)
        }
    }

    /// Return a frame to the free list; its size is reset to zero
    pub fn release(&self, mut frame: Frame) {
        debug_assert_eq!(frame.capacity(), self.frame_size);
        frame.len = 0;
        if let Err(frame) = self.free.push_try(frame) {
            log::warn!("Buffer pool overfilled, discarding frame slot {}", frame.slot);
        }
    }

    /// Frame size in bytes
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Total number of frames
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Number of idle frames
    pub fn available(&self) -> usize {
        self.free.len()
    }
}

impl FrameSink for BufferPool {
    fn submit(&self, frame: Frame) {
        self.release(frame);
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("frame_size", &self.frame_size)
            .field("num_frames", &self.num_frames)
            .field("available", &self.available())
            .finish()
    }
}

/// A received frame, exclusively held until released.
///
/// Dropping the buffer releases it.
pub struct ManagedRecvBuffer {
    frame: Option<Frame>,
    home: Arc<dyn FrameSink>,
}

impl ManagedRecvBuffer {
    /// Wrap a filled frame; `home` receives it on release
    pub fn new(frame: Frame, home: Arc<dyn FrameSink>) -> Self {
        Self {
            frame: Some(frame),
            home,
        }
    }

    /// Received length in bytes
    pub fn size(&self) -> usize {
        self.frame.as_ref().map_or(0, Frame::len)
    }

    /// Received bytes, read in place
    pub fn as_slice(&self) -> &[u8] {
        self.frame.as_ref().map_or(&[][..], Frame::payload)
    }

    /// Release the frame back to its owner
    pub fn release(self) {}
}

impl Drop for ManagedRecvBuffer {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.home.submit(frame);
        }
    }
}

/// A frame to fill for sending, exclusively held until released.
///
/// `commit(n)` declares the payload length; releasing without a commit sends
/// zero bytes. Dropping the buffer releases it.
pub struct ManagedSendBuffer {
    frame: Option<Frame>,
    sink: Arc<dyn FrameSink>,
    committed: bool,
}

impl ManagedSendBuffer {
    /// Wrap an idle frame; `sink` receives it on release
    pub fn new(frame: Frame, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            frame: Some(frame),
            sink,
            committed: false,
        }
    }

    /// Writable window size in bytes
    pub fn capacity(&self) -> usize {
        self.frame.as_ref().map_or(0, Frame::capacity)
    }

    /// The whole writable window
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.frame.as_mut() {
            Some(frame) => frame.window_mut(),
            None => &mut [],
        }
    }

    /// Committed bytes
    pub fn as_slice(&self) -> &[u8] {
        self.frame.as_ref().map_or(&[][..], Frame::payload)
    }

    /// Declare the payload length (clamped to the capacity)
    pub fn commit(&mut self, num_bytes: usize) {
        if let Some(frame) = self.frame.as_mut() {
            frame.set_len(num_bytes);
            self.committed = true;
        }
    }

    /// Committed length; zero before `commit`
    pub fn size(&self) -> usize {
        self.frame.as_ref().map_or(0, Frame::len)
    }

    /// Release the frame to its sink
    pub fn release(self) {}
}

impl Drop for ManagedSendBuffer {
    fn drop(&mut self) {
        if let Some(mut frame) = self.frame.take() {
            if !self.committed {
                frame.set_len(0);
            }
            self.sink.submit(frame);
        }
    }
}
