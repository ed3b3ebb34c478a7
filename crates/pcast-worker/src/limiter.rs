//! Bounded fan-out of independent async units.
//!
//! At most `capacity` units run at once. Every unit settles: a failing or
//! panicking unit becomes an `Err` in its own slot and never cancels its
//! siblings. Permits are released on drop, so a unit that errors still frees
//! its slot.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Requests-per-second throttle shared by all units.
pub type DispatchRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Settled result of one unit.
pub type UnitOutcome<T> = WorkerResult<T>;

struct Inner {
    capacity: usize,
    permits: Semaphore,
    rate: Option<DispatchRateLimiter>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Marks a unit as running for as long as it is alive.
struct ActiveGuard<'a>(&'a Inner);

impl<'a> ActiveGuard<'a> {
    fn enter(inner: &'a Inner) -> Self {
        let now = inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak.fetch_max(now, Ordering::SeqCst);
        metrics::set_limiter_active(now);
        Self(inner)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let now = self.0.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_limiter_active(now);
    }
}

/// Concurrency limiter for generation requests.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<Inner>,
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting `capacity` concurrent units.
    pub fn new(capacity: usize) -> WorkerResult<Self> {
        Self::build(capacity, None)
    }

    /// Create a limiter that also spaces unit starts to `per_second`.
    pub fn with_rate_limit(capacity: usize, per_second: u32) -> WorkerResult<Self> {
        let per_second = NonZeroU32::new(per_second)
            .ok_or_else(|| WorkerError::config_error("rate limit must be at least 1 per second"))?;
        Self::build(capacity, Some(RateLimiter::direct(Quota::per_second(per_second))))
    }

    fn build(capacity: usize, rate: Option<DispatchRateLimiter>) -> WorkerResult<Self> {
        if capacity == 0 {
            return Err(WorkerError::config_error("limiter capacity must be at least 1"));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                capacity,
                permits: Semaphore::new(capacity),
                rate,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Units currently running.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Highest number of units ever observed running at once.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Run every unit and wait for all of them to settle.
    ///
    /// Outcomes are returned in the order the units were given.
    pub async fn run_all<T, Fut, I>(&self, units: I) -> Vec<UnitOutcome<T>>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = WorkerResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = units
            .into_iter()
            .map(|unit| {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    let _permit = inner
                        .permits
                        .acquire()
                        .await
                        .map_err(|_| WorkerError::processing_failed("limiter closed"))?;
                    if let Some(rate) = &inner.rate {
                        rate.until_ready().await;
                    }
                    let _active = ActiveGuard::enter(&inner);
                    unit.await
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Limited unit did not finish: {}", e);
                    Err(WorkerError::processing_failed(format!("unit aborted: {}", e)))
                }
            })
            .collect()
    }
}
