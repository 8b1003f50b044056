use std::time::Duration;

/// Capped exponential backoff, doubling from a base duration up to a ceiling.
///
/// This mirrors the shape (not necessarily the exact constants) of a typical
/// work-queue backoff: a key's delay doubles on every consecutive failure and
/// resets the moment a reconcile succeeds.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    failures: u32,
}

impl Backoff {
    /// Construct a new backoff with the given base delay and ceiling.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            failures: 0,
        }
    }

    /// The default backoff used by the controller runtime: 1s base, 5m cap.
    pub fn default_queue() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300))
    }

    /// Record a failure and return the delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let shift = self.failures.min(20);
        self.failures = self.failures.saturating_add(1);
        self.base
            .checked_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX))
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Reset the backoff after a successful reconcile.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
