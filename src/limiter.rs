// src/limiter.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 200;

/// The global concurrency ceiling shared by all fetch tasks of one run.
///
/// Cloning is cheap; all clones draw from the same permit pool. Besides the
/// permits it keeps an in-flight gauge and its high-water mark so a run can
/// prove the ceiling held.
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    gauge: Arc<Gauge>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// A held slot. Dropping it frees the slot for the next queued task.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
    gauge: Arc<Gauge>,
}

impl ConcurrencyLimiter {
    /// Creates a limiter; `capacity` is clamped to `[1, 200]`.
    pub fn new(capacity: usize) -> Self {
        let capacity = clamp_concurrency(capacity);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            gauge: Arc::new(Gauge::default()),
            capacity,
        }
    }

    /// Waits for a free slot. Waiters are served in arrival order.
    pub async fn acquire(&self) -> Result<Slot, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        let now = self.gauge.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        Ok(Slot {
            _permit: permit,
            gauge: self.gauge.clone(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.gauge.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of slots held at the same time so far.
    pub fn peak(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}
