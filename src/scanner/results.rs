//! Bounded hand-off of positive results between the worker pool and the
//! sink, with an explicit overflow policy.
use crate::input::OverflowPolicy;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// A bounded queue of result lines.
///
/// With [`OverflowPolicy::Block`] a push against a full queue waits for
/// the sink, which is how a slow consumer throttles the workers and,
/// through the job queue, the dispatch loop. With
/// [`OverflowPolicy::DropOldest`] the oldest queued line is discarded
/// instead and the push always completes immediately.
///
/// The inner mutex is a plain `std::sync::Mutex`: it is only ever held
/// for the queue operation itself, never across an await point.
#[derive(Debug)]
pub struct ResultQueue {
    inner: Mutex<Shared>,
    capacity: usize,
    policy: OverflowPolicy,
    readable: Notify,
    writable: Notify,
}

#[derive(Debug)]
struct Shared {
    queue: VecDeque<String>,
    closed: bool,
    dropped: u64,
}

impl ResultQueue {
    /// # Panics
    ///
    /// Panics when `capacity` is zero; a zero-capacity channel could
    /// never hand anything over.
    #[must_use]
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        assert!(capacity > 0, "results channel capacity must be non-zero");
        Self {
            inner: Mutex::new(Shared {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            capacity,
            policy,
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    /// Queues one result line.
    ///
    /// Returns immediately once the line is queued, dropped into a full
    /// `DropOldest` queue, or discarded because the queue is closed.
    /// Under `Block` this waits until the consumer frees capacity.
    pub async fn push(&self, line: String) {
        loop {
            // Register interest before checking so a close or pop that
            // lands between the check and the await is not lost.
            let wait = self.writable.notified();
            tokio::pin!(wait);
            wait.as_mut().enable();
            {
                let mut shared = self.inner.lock().unwrap();
                if shared.closed {
                    return;
                }
                if shared.queue.len() < self.capacity {
                    shared.queue.push_back(line);
                    self.readable.notify_one();
                    return;
                }
                if self.policy == OverflowPolicy::DropOldest {
                    shared.queue.pop_front();
                    shared.dropped += 1;
                    shared.queue.push_back(line);
                    self.readable.notify_one();
                    return;
                }
            }
            wait.await;
        }
    }

    /// Removes the oldest queued line.
    ///
    /// Waits while the queue is empty and open; returns `None` only once
    /// the queue is closed and fully drained.
    pub async fn pop(&self) -> Option<String> {
        loop {
            let wait = self.readable.notified();
            tokio::pin!(wait);
            wait.as_mut().enable();
            {
                let mut shared = self.inner.lock().unwrap();
                if let Some(line) = shared.queue.pop_front() {
                    self.writable.notify_one();
                    return Some(line);
                }
                if shared.closed {
                    return None;
                }
            }
            wait.await;
        }
    }

    /// Closes the queue. Blocked producers wake up and give up their
    /// lines; the consumer still drains whatever is already queued.
    pub fn close(&self) {
        {
            let mut shared = self.inner.lock().unwrap();
            shared.closed = true;
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Lines currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lines discarded so far under `DropOldest`.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }
}
