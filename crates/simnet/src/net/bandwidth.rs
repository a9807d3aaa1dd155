use std::time::Instant;

use super::header::MAX_DATAGRAM_SIZE;

/// Token bucket over bytes per second; a rate of zero is unlimited. The
/// burst allowance is one second of budget, but never less than one
/// full-size datagram so that slow peers are paced rather than starved.
#[derive(Debug, Clone)]
pub struct BandwidthBudget {
    rate: u32,
    allowance: f64,
    last_refill: Instant,
}

impl BandwidthBudget {
    pub fn new(rate: u32, now: Instant) -> Self {
        Self {
            rate,
            allowance: burst(rate),
            last_refill: now,
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate == 0
    }

    pub fn set_rate(&mut self, rate: u32, now: Instant) {
        self.rate = rate;
        self.allowance = self.allowance.min(burst(rate));
        self.last_refill = now;
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.allowance = (self.allowance + elapsed * self.rate as f64).min(burst(self.rate));
        self.last_refill = now;
    }

    pub fn available(&mut self, now: Instant) -> f64 {
        if self.is_unlimited() {
            return f64::INFINITY;
        }
        self.refill(now);
        self.allowance
    }

    pub fn try_consume(&mut self, bytes: usize, now: Instant) -> bool {
        if self.is_unlimited() {
            return true;
        }
        self.refill(now);
        if self.allowance < bytes as f64 {
            return false;
        }
        self.allowance -= bytes as f64;
        true
    }
}

fn burst(rate: u32) -> f64 {
    (rate as usize).max(MAX_DATAGRAM_SIZE) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_unlimited_budget() {
        let now = Instant::now();
        let mut budget = BandwidthBudget::new(0, now);

        for _ in 0..1000 {
            assert!(budget.try_consume(1500, now));
        }
    }

    #[test]
    fn test_budget_exhausts_and_refills() {
        let now = Instant::now();
        let mut budget = BandwidthBudget::new(1000, now);

        assert!(budget.try_consume(600, now));
        assert!(!budget.try_consume(600, now));

        let later = now + Duration::from_millis(500);
        assert!(budget.try_consume(600, later));
        assert!(!budget.try_consume(400, later));
    }

    #[test]
    fn test_burst_is_capped() {
        let now = Instant::now();
        let mut budget = BandwidthBudget::new(1000, now);

        let later = now + Duration::from_secs(60);
        assert!((budget.available(later) - 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_slow_rate_still_passes_full_datagrams() {
        let now = Instant::now();
        let mut budget = BandwidthBudget::new(100, now);

        assert!(budget.try_consume(124, now));
        assert!(!budget.try_consume(MAX_DATAGRAM_SIZE, now));

        let later = now + Duration::from_secs(60);
        assert!((budget.available(later) - MAX_DATAGRAM_SIZE as f64).abs() < f64::EPSILON);
        assert!(budget.try_consume(MAX_DATAGRAM_SIZE, later));
    }
}
