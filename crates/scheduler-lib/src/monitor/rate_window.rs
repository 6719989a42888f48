//! Per-machine arrival-rate window
//!
//! Keeps the arrival instants of recent messages for one machine and counts
//! how many fall inside the monitoring window.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Default monitoring window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

/// Sliding window of message arrival instants
#[derive(Debug, Clone)]
pub struct RateWindow {
    arrivals: VecDeque<Instant>,
    window: Duration,
}

impl RateWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            arrivals: VecDeque::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record one arrival; entries that fell out of the window are dropped
    pub fn record(&mut self, now: Instant) {
        self.prune(now);
        self.arrivals.push_back(now);
    }

    /// Arrivals strictly newer than `now - window`
    pub fn rate(&self, now: Instant) -> usize {
        match now.checked_sub(self.window) {
            Some(cutoff) => self.arrivals.iter().filter(|ts| **ts > cutoff).count(),
            None => self.arrivals.len(),
        }
    }

    /// Remove arrivals outside the window
    pub fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while let Some(ts) = self.arrivals.front() {
            if *ts <= cutoff {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.arrivals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rate_counts_recent_arrivals() {
        let mut window = RateWindow::new(Duration::from_secs(30));
        let start = Instant::now();

        for i in 0..20 {
            window.record(start + Duration::from_secs(i));
        }

        assert_eq!(window.rate(start + Duration::from_secs(20)), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry() {
        let mut window = RateWindow::new(Duration::from_secs(30));
        let start = Instant::now();

        // One arrival per second for a minute
        for i in 0..60 {
            window.record(start + Duration::from_secs(i));
        }

        let now = start + Duration::from_secs(59);
        assert_eq!(window.rate(now), 30);
        assert_eq!(window.len(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boundary_is_exclusive() {
        let mut window = RateWindow::new(Duration::from_secs(30));
        let start = Instant::now();
        window.record(start);

        assert_eq!(window.rate(start + Duration::from_secs(29)), 1);
        assert_eq!(window.rate(start + Duration::from_secs(30)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_empties_idle_window() {
        let mut window = RateWindow::default();
        let start = Instant::now();
        window.record(start);

        window.prune(start + Duration::from_secs(120));
        assert!(window.is_empty());
        assert_eq!(window.rate(start + Duration::from_secs(120)), 0);
    }
}
