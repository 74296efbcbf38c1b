//! Concurrent FIFO queue (C1).
//!
//! A plain `VecDeque` behind one `parking_lot::Mutex` plus one
//! `parking_lot::Condvar`, generic over the payload. Callers parameterize
//! `Queue<T>` with an explicit tagged enum (see [`crate::board::QueueEntry`])
//! so queue destructors stay type-safe rather than discriminating payloads
//! by size or an opaque pointer.
//!
//! Multiple producers, a single consumer per queue: `pop_blocking` assumes
//! it is the only waiter on the condvar: the board does not support
//! multi-consumer pops on the same queue, since condvar wakeup assumes
//! one waiter.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

pub struct Queue<T> {
    inner: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// O(1) enqueue; wakes the single consumer waiting in `pop_blocking`.
    pub fn enqueue(&self, entry: T) {
        let mut guard = self.inner.lock();
        guard.push_back(entry);
        self.not_empty.notify_one();
    }

    pub fn peek_front(&self) -> bool {
        !self.inner.lock().is_empty()
    }

    /// Non-blocking pop; returns `None` if empty.
    pub fn pop_head(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Blocks on the queue's own condvar while empty and `should_wake`
    /// returns `false`. Returns `None` exactly when woken with
    /// `should_wake() == true` and the queue is still empty (the shutdown
    /// path, C8 step 2-3): the worker must check its own shutdown flag on
    /// `None`, not assume a spurious wake.
    pub fn pop_blocking(&self, should_wake: impl Fn() -> bool) -> Option<T> {
        let mut guard = self.inner.lock();
        while guard.is_empty() && !should_wake() {
            self.not_empty.wait(&mut guard);
        }
        guard.pop_front()
    }

    /// Like `pop_blocking`, but never waits longer than `timeout` even if
    /// nothing arrives and `should_wake` stays false. The primary worker
    /// uses this instead of an unbounded wait so that an idle primary
    /// queue still periodically drains the timer wheel (sleeping tasks and
    /// remote-call deadlines would otherwise never fire while no new task
    /// enqueues anything).
    pub fn pop_blocking_timeout(
        &self,
        timeout: Duration,
        should_wake: impl Fn() -> bool,
    ) -> Option<T> {
        let mut guard = self.inner.lock();
        if guard.is_empty() && !should_wake() {
            self.not_empty.wait_for(&mut guard, timeout);
        }
        guard.pop_front()
    }

    /// Used only by `kill` to unblock a worker parked in `pop_blocking`.
    pub fn signal(&self) {
        // Acquire-then-drop ensures the notify is not lost to a waiter that
        // has not yet entered `Condvar::wait`.
        let _guard = self.inner.lock();
        self.not_empty.notify_one();
    }

    /// Drains every entry, invoking `disposer` on each -- the board's
    /// teardown destructor pass (`destroy`).
    pub fn drain_with(&self, mut disposer: impl FnMut(T)) {
        let mut guard = self.inner.lock();
        while let Some(entry) = guard.pop_front() {
            disposer(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order() {
        let q: Queue<i32> = Queue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        assert_eq!(q.pop_head(), Some(1));
        assert_eq!(q.pop_head(), Some(2));
        assert_eq!(q.pop_head(), Some(3));
        assert_eq!(q.pop_head(), None);
    }

    #[test]
    fn blocking_pop_wakes_on_enqueue() {
        let q = Arc::new(Queue::<i32>::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop_blocking(|| false));
        thread::sleep(Duration::from_millis(20));
        q.enqueue(42);
        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn blocking_pop_wakes_on_shutdown_signal() {
        let q = Arc::new(Queue::<i32>::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let q2 = q.clone();
        let sd2 = shutdown.clone();
        let handle = thread::spawn(move || q2.pop_blocking(|| sd2.load(Ordering::Acquire)));
        thread::sleep(Duration::from_millis(20));
        shutdown.store(true, Ordering::Release);
        q.signal();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn blocking_pop_timeout_returns_none_when_idle() {
        let q: Queue<i32> = Queue::new();
        let start = std::time::Instant::now();
        assert_eq!(q.pop_blocking_timeout(Duration::from_millis(20), || false), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn drain_disposes_every_entry() {
        let q: Queue<i32> = Queue::new();
        for i in 0..5 {
            q.enqueue(i);
        }
        let mut seen = vec![];
        q.drain_with(|e| seen.push(e));
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(q.is_empty());
    }
}
