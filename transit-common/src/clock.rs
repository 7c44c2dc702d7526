//! Wall-clock abstraction.
//!
//! Latency math runs on epoch seconds, never on monotonic instants, because
//! the timestamps it is compared against are assigned by remote providers.
//! Components take an `Arc<dyn Clock>` so tests can drive time by hand.

use std::{
    fmt::Debug,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;

/// Source of wall-clock time and of sleeps.
#[async_trait]
pub trait Clock: Send + Sync + Debug {
    /// Current time as fractional seconds since the Unix epoch (UTC).
    fn now(&self) -> f64;

    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// The real clock: `SystemTime` for reading, tokio timers for sleeping.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |elapsed| elapsed.as_secs_f64())
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock that only moves when told to.
///
/// `sleep` advances the clock by the requested duration and returns
/// immediately, so a poll loop with a five minute deadline finishes in
/// microseconds under test.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `epoch` seconds.
    #[must_use]
    pub fn new(epoch: f64) -> Self {
        Self {
            bits: AtomicU64::new(epoch.to_bits()),
        }
    }

    /// Set the clock to an absolute epoch.
    pub fn set(&self, epoch: f64) {
        self.bits.store(epoch.to_bits(), Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let _ = self
            .bits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + duration.as_secs_f64()).to_bits())
            });
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
