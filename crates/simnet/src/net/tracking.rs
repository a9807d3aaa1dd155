use std::collections::VecDeque;
use std::time::Duration;

use super::reliable::ConfirmationId;

const RECEIPT_WINDOW: usize = 128;

/// Smoothed round-trip estimate (RFC 6298 gains).
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: f32,
    rtt_var: f32,
    samples: u32,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            srtt: 100.0,
            rtt_var: 50.0,
            samples: 0,
        }
    }

    pub fn record(&mut self, sample: Duration) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let rtt = sample.as_secs_f32() * 1000.0;
        if self.samples == 0 {
            self.srtt = rtt;
            self.rtt_var = rtt / 2.0;
        } else {
            let diff = (rtt - self.srtt).abs();
            self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
            self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
        }
        self.samples = self.samples.saturating_add(1);
    }

    pub fn srtt_ms(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var_ms(&self) -> f32 {
        self.rtt_var
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }
}

/// Recently delivered confirmation ids from one peer, used to dispatch each
/// reliable packet once even when its retries arrive too.
#[derive(Debug)]
pub struct ReceiptWindow {
    recent: VecDeque<ConfirmationId>,
    max_recent: usize,
}

impl Default for ReceiptWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiptWindow {
    pub fn new() -> Self {
        Self {
            recent: VecDeque::with_capacity(RECEIPT_WINDOW),
            max_recent: RECEIPT_WINDOW,
        }
    }

    pub fn contains(&self, id: ConfirmationId) -> bool {
        self.recent.contains(&id)
    }

    /// Returns `false` if `id` was already seen.
    pub fn record_received(&mut self, id: ConfirmationId) -> bool {
        if self.recent.contains(&id) {
            return false;
        }

        if self.recent.len() >= self.max_recent {
            self.recent.pop_front();
        }
        self.recent.push_back(id);
        true
    }

    pub fn clear(&mut self) {
        self.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_detection() {
        let mut window = ReceiptWindow::new();

        assert!(window.record_received(ConfirmationId(1)));
        assert!(!window.record_received(ConfirmationId(1)));
        assert!(window.record_received(ConfirmationId(2)));
    }

    #[test]
    fn test_window_forgets_oldest() {
        let mut window = ReceiptWindow::new();

        for id in 0..=RECEIPT_WINDOW as u32 {
            assert!(window.record_received(ConfirmationId(id)));
        }

        assert!(window.record_received(ConfirmationId(0)));
        assert!(!window.record_received(ConfirmationId(RECEIPT_WINDOW as u32)));
    }

    #[test]
    fn test_first_sample_seeds_estimate() {
        let mut rtt = RttEstimator::new();
        rtt.record(Duration::from_millis(40));

        assert!((rtt.srtt_ms() - 40.0).abs() < 0.01);
        assert!((rtt.rtt_var_ms() - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_rtt_smoothing() {
        let mut rtt = RttEstimator::new();
        rtt.record(Duration::from_millis(40));
        rtt.record(Duration::from_millis(120));

        assert!((rtt.srtt_ms() - 50.0).abs() < 0.01);
        assert!((rtt.rtt_var_ms() - 35.0).abs() < 0.01);
        assert_eq!(rtt.samples(), 2);
    }
}
