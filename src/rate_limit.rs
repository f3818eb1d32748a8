//! FIFO request throttle for the inventory API.
//!
//! One limiter instance is created per client and passed into its
//! constructor. Callers queue on a fair tokio mutex, so requests leave in the
//! order they arrived, spaced `1 / requests_per_second` apart. The queue is
//! bounded: once `queue_depth` callers are waiting, further callers fail fast
//! instead of piling up behind a slow API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::error::RateLimitError;

pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 1;
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

pub struct RateLimiter {
    interval: Duration,
    queue_depth: usize,
    waiting: AtomicUsize,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    /// A zero rate is treated as one request per second.
    pub fn new(requests_per_second: u32, queue_depth: usize) -> Self {
        let per_second = requests_per_second.max(1);
        Self::with_interval(Duration::from_secs(1) / per_second, queue_depth)
    }

    pub fn with_interval(interval: Duration, queue_depth: usize) -> Self {
        Self {
            interval,
            queue_depth: queue_depth.max(1),
            waiting: AtomicUsize::new(0),
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Callers currently queued or sleeping for their slot.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Wait for the next request slot.
    ///
    /// Returns immediately when the limiter is idle. Fails with
    /// [`RateLimitError::QueueFull`] when `queue_depth` callers are already
    /// waiting.
    pub async fn acquire(&self) -> Result<(), RateLimitError> {
        let ahead = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _slot = WaitingSlot(&self.waiting);

        if ahead >= self.queue_depth {
            debug!(ahead, depth = self.queue_depth, "rate limiter queue full");
            return Err(RateLimitError::QueueFull {
                depth: self.queue_depth,
            });
        }

        // The lock is held across the sleep so the next caller measures its
        // slot from ours.
        let mut next_slot = self.next_slot.lock().await;
        let now = Instant::now();
        if *next_slot > now {
            sleep_until(*next_slot).await;
        }
        *next_slot = (*next_slot).max(now) + self.interval;
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_SECOND, DEFAULT_QUEUE_DEPTH)
    }
}

/// Decrements the waiting count when a caller leaves the queue, including
/// when its future is dropped mid-wait.
struct WaitingSlot<'a>(&'a AtomicUsize);

impl Drop for WaitingSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
