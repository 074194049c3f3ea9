use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding 60s window cap on scan-triggered discoveries, shaped after
/// `haven-api`'s `AuthRateLimiter` (sliding window over a `Vec<Instant>`,
/// pruned on each check).
pub struct ScanRateLimiter {
    timestamps: Mutex<Vec<Instant>>,
    max_per_window: usize,
}

const WINDOW: Duration = Duration::from_secs(60);

impl ScanRateLimiter {
    pub fn new(max_per_window: usize) -> Self {
        Self { timestamps: Mutex::new(Vec::new()), max_per_window }
    }

    /// Returns `true` and records a slot if the window has room, `false`
    /// if the cap is already reached.
    pub fn try_acquire(&self) -> bool {
        let mut timestamps = self.timestamps.lock().expect("rate limiter poisoned");
        let now = Instant::now();
        timestamps.retain(|t| now.duration_since(*t) < WINDOW);
        if timestamps.len() >= self.max_per_window {
            return false;
        }
        timestamps.push(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_acquisitions_within_window() {
        let limiter = ScanRateLimiter::new(2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
