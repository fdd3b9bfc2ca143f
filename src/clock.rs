//! Monotonic time source for the main loop
//!
//! The scheduler only sees this trait, so tests can drive it with a
//! simulated clock instead of real timers.

use core::future::Future;

/// Monotonic clock with a cooperative sleep
pub trait Clock {
    /// Microseconds since an arbitrary fixed origin
    fn now_us(&self) -> u64;

    fn now_ms(&self) -> u64 {
        self.now_us() / 1000
    }

    /// Yield to other tasks for `ms` milliseconds
    fn sleep_ms(&mut self, ms: u32) -> impl Future<Output = ()>;

    /// Short waits used while polling hardware lines
    fn sleep_us(&mut self, us: u32) -> impl Future<Output = ()>;
}

/// Clock backed by the embassy time driver
#[cfg(feature = "embedded")]
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbassyClock;

#[cfg(feature = "embedded")]
impl Clock for EmbassyClock {
    fn now_us(&self) -> u64 {
        embassy_time::Instant::now().as_micros()
    }

    async fn sleep_ms(&mut self, ms: u32) {
        embassy_time::Timer::after(embassy_time::Duration::from_millis(ms as u64)).await;
    }

    async fn sleep_us(&mut self, us: u32) {
        embassy_time::Timer::after(embassy_time::Duration::from_micros(us as u64)).await;
    }
}
