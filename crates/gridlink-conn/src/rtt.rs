//! Round-trip time estimation.
//!
//! A 3-sample rolling window combined with weights (3,2,1)/6 from newest to
//! oldest. The estimate is seeded on connect with an optimistic overestimate
//! of the handshake round trip so resend timers have something sane to work
//! with before real ping samples exist.

use std::time::Duration;

/// Estimate used before any sample or seed exists.
const DEFAULT_RTT: Duration = Duration::from_millis(250);

/// Factor applied to the handshake round trip when seeding.
const SEED_FACTOR: f64 = 1.2;

/// Weighted rolling window over the three most recent RTT samples.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Newest sample first.
    samples: [Duration; 3],
    count: usize,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    /// Creates an estimator with no samples.
    pub fn new() -> Self {
        Self { samples: [Duration::ZERO; 3], count: 0 }
    }

    /// Seeds the window from the handshake round trip, deliberately
    /// overestimating to avoid premature resends.
    pub fn seed(&mut self, handshake_rtt: Duration) {
        self.samples = [handshake_rtt.mul_f64(SEED_FACTOR); 3];
        self.count = 1;
    }

    /// Records a measured round trip from a ping/pong exchange.
    pub fn sample(&mut self, rtt: Duration) {
        self.samples[2] = self.samples[1];
        self.samples[1] = self.samples[0];
        self.samples[0] = rtt;
        self.count = (self.count + 1).min(3);
    }

    /// Number of samples currently in the window (seeding counts as one).
    pub fn sample_count(&self) -> usize {
        self.count
    }

    /// The smoothed estimate, weights (3,2,1)/6 newest to oldest,
    /// renormalized while the window is still filling.
    pub fn smoothed(&self) -> Duration {
        const WEIGHTS: [u32; 3] = [3, 2, 1];
        if self.count == 0 {
            return DEFAULT_RTT;
        }
        let mut total = Duration::ZERO;
        let mut weight_sum = 0u32;
        for i in 0..self.count {
            total += self.samples[i] * WEIGHTS[i];
            weight_sum += WEIGHTS[i];
        }
        total / weight_sum
    }
}
