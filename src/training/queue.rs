//! Bounded blocking queue between actors and the learner.
//!
//! Producers block while the queue is full, consumers while it is empty.
//! `close()` wakes everyone: pending and future pushes fail, pops drain what
//! is left and then return `None`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Fixed-capacity multi-producer, multi-consumer FIFO.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be positive");
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Push, waiting at most `timeout` for space.
    ///
    /// Returns false on timeout or if the queue is closed; `item` is dropped.
    pub fn push(&self, item: T, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while !inner.closed && inner.items.len() >= self.capacity {
            if self.not_full.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        self.push_locked(&mut inner, item)
    }

    /// Push, waiting as long as it takes. Returns false only when closed.
    pub fn push_blocking(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        while !inner.closed && inner.items.len() >= self.capacity {
            self.not_full.wait(&mut inner);
        }
        self.push_locked(&mut inner, item)
    }

    fn push_locked(&self, inner: &mut Inner<T>, item: T) -> bool {
        if inner.closed || inner.items.len() >= self.capacity {
            return false;
        }
        inner.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Pop, waiting until an item arrives. `None` once closed and empty.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        while inner.items.is_empty() && !inner.closed {
            self.not_empty.wait(&mut inner);
        }
        self.pop_locked(&mut inner)
    }

    /// Pop, waiting at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.items.is_empty() && !inner.closed {
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        self.pop_locked(&mut inner)
    }

    fn pop_locked(&self, inner: &mut Inner<T>) -> Option<T> {
        let item = inner.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Refuse further pushes and wake every waiter.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Discard everything queued.
    pub fn clear(&self) {
        self.inner.lock().items.clear();
        self.not_full.notify_all();
    }

    /// Items queued right now. Racy; for telemetry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
