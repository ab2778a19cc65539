//! Outbound byte throttling.
//!
//! The throttle keeps a byte-debt counter: every datagram sent adds its size
//! to the debt, and the debt decays at the configured bytes-per-second rate.
//! Sending pauses while the debt exceeds one second's allowance, bounding
//! sustained output to the configured rate while permitting short bursts.

use std::time::Instant;

/// Byte-debt outbound throttle. A rate of 0 disables throttling.
#[derive(Debug)]
pub struct SendThrottle {
    bytes_per_sec: u32,
    debt: f64,
    last_decay: Instant,
}

impl SendThrottle {
    /// Creates a throttle at the given rate (0 = unlimited).
    pub fn new(bytes_per_sec: u32, now: Instant) -> Self {
        Self { bytes_per_sec, debt: 0.0, last_decay: now }
    }

    /// Decays accumulated debt for the time elapsed since the last call.
    pub fn replenish(&mut self, now: Instant) {
        if self.bytes_per_sec == 0 {
            return;
        }
        let elapsed = now.duration_since(self.last_decay).as_secs_f64();
        self.last_decay = now;
        self.debt = (self.debt - elapsed * self.bytes_per_sec as f64).max(0.0);
    }

    /// Whether another datagram may be sent right now.
    pub fn allows_send(&self) -> bool {
        self.bytes_per_sec == 0 || self.debt < self.bytes_per_sec as f64
    }

    /// Records a sent datagram against the debt.
    pub fn record(&mut self, bytes: usize) {
        if self.bytes_per_sec != 0 {
            self.debt += bytes as f64;
        }
    }

    /// Current debt in bytes.
    pub fn debt(&self) -> u64 {
        self.debt as u64
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_unlimited_throttle_never_blocks() {
        let now = Instant::now();
        let mut throttle = SendThrottle::new(0, now);
        throttle.record(10_000_000);
        assert!(throttle.allows_send());
        assert_eq!(throttle.debt(), 0);
    }

    #[test]
    fn test_debt_blocks_past_one_second_allowance() {
        let now = Instant::now();
        let mut throttle = SendThrottle::new(1000, now);
        assert!(throttle.allows_send());

        throttle.record(999);
        assert!(throttle.allows_send());
        throttle.record(10);
        assert!(!throttle.allows_send());
    }

    #[test]
    fn test_debt_decays_over_time() {
        let now = Instant::now();
        let mut throttle = SendThrottle::new(1000, now);
        throttle.record(1500);
        assert!(!throttle.allows_send());

        throttle.replenish(now + Duration::from_millis(600));
        // 1500 - 600 = 900 below the 1000 allowance.
        assert!(throttle.allows_send());

        throttle.replenish(now + Duration::from_secs(10));
        assert_eq!(throttle.debt(), 0);
    }
}
