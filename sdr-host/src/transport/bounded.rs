//! Bounded blocking FIFO for producer/consumer handoff
//!
//! Used as the free list of every [`BufferPool`](super::BufferPool), as the
//! wire between the two ends of a loopback link, and as the async event queue
//! of a transmit streamer.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Fixed-capacity thread-safe FIFO.
///
/// FIFO order holds for one producer and one consumer. Interleaving across
/// several producers is unspecified. Waiters are woken through condition
/// variables with no fairness guarantee beyond `parking_lot`'s.
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` elements (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Push without blocking; the element is handed back when full
    pub fn push_try(&self, elem: T) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(elem);
        }
        items.push_back(elem);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Push, evicting the oldest element when full.
    ///
    /// Returns the evicted element, if any.
    pub fn push_force(&self, elem: T) -> Option<T> {
        let mut items = self.items.lock();
        let evicted = if items.len() >= self.capacity {
            items.pop_front()
        } else {
            None
        };
        items.push_back(elem);
        drop(items);
        self.not_empty.notify_one();
        evicted
    }

    /// Push, blocking until space is available
    pub fn push_wait(&self, elem: T) {
        let mut items = self.items.lock();
        while items.len() >= self.capacity {
            self.not_full.wait(&mut items);
        }
        items.push_back(elem);
        drop(items);
        self.not_empty.notify_one();
    }

    /// Push, blocking at most `timeout`; the element is handed back on timeout
    pub fn push_wait_timeout(&self, elem: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.len() >= self.capacity {
            if self.not_full.wait_until(&mut items, deadline).timed_out()
                && items.len() >= self.capacity
            {
                return Err(elem);
            }
        }
        items.push_back(elem);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop without blocking
    pub fn pop_try(&self) -> Option<T> {
        let mut items = self.items.lock();
        let elem = items.pop_front();
        drop(items);
        if elem.is_some() {
            self.not_full.notify_one();
        }
        elem
    }

    /// Pop, blocking until an element is available
    pub fn pop_wait(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(elem) = items.pop_front() {
                drop(items);
                self.not_full.notify_one();
                return elem;
            }
            self.not_empty.wait(&mut items);
        }
    }

    /// Pop, blocking at most `timeout`
    pub fn pop_wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if let Some(elem) = items.pop_front() {
                drop(items);
                self.not_full.notify_one();
                return Some(elem);
            }
            if self.not_empty.wait_until(&mut items, deadline).timed_out() {
                let elem = items.pop_front();
                drop(items);
                if elem.is_some() {
                    self.not_full.notify_one();
                }
                return elem;
            }
        }
    }

    /// Number of queued elements
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// True when at capacity
    pub fn is_full(&self) -> bool {
        self.items.lock().len() >= self.capacity
    }

    /// Maximum number of elements
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every queued element
    pub fn clear(&self) {
        self.items.lock().clear();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_try_fails_when_full_until_pop() {
        let queue = BoundedQueue::new(3);
        for i in 0..3 {
            queue.push_wait(i);
        }
        assert!(queue.is_full());
        assert_eq!(queue.push_try(99), Err(99));
        assert_eq!(queue.push_try(100), Err(100));

        assert_eq!(queue.pop_try(), Some(0));
        assert_eq!(queue.push_try(3), Ok(()));
        assert_eq!(queue.pop_try(), Some(1));
        assert_eq!(queue.pop_try(), Some(2));
        assert_eq!(queue.pop_try(), Some(3));
        assert_eq!(queue.pop_try(), None);
    }

    #[test]
    fn test_push_force_evicts_oldest() {
        let queue = BoundedQueue::new(2);
        assert_eq!(queue.push_force(1), None);
        assert_eq!(queue.push_force(2), None);
        assert_eq!(queue.push_force(3), Some(1));
        assert_eq!(queue.pop_try(), Some(2));
        assert_eq!(queue.pop_try(), Some(3));
    }

    #[test]
    fn test_timeouts_return_failure() {
        let queue = BoundedQueue::new(1);
        assert_eq!(queue.pop_wait_timeout(Duration::from_millis(10)), None);

        queue.push_wait(7u32);
        let start = Instant::now();
        assert_eq!(queue.push_wait_timeout(8, Duration::from_millis(20)), Err(8));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(queue.pop_wait_timeout(Duration::from_millis(10)), Some(7));
    }

    #[test]
    fn test_blocked_producer_resumes_after_pop() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push_wait(0u32);

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push_wait_timeout(1, Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.pop_wait(), 0);
        assert_eq!(producer.join().unwrap(), Ok(()));
        assert_eq!(queue.pop_wait_timeout(Duration::from_secs(1)), Some(1));
    }

    #[test]
    fn test_spsc_preserves_order() {
        let queue = Arc::new(BoundedQueue::new(8));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..1000u32 {
                    queue.push_wait(i);
                }
            })
        };

        for expected in 0..1000u32 {
            assert_eq!(queue.pop_wait(), expected);
        }
        producer.join().unwrap();
        assert!(queue.is_empty());
    }
}
