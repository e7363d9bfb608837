//! Sustained-rate admission gate shared across concurrent workers.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// Allows at most `max_per_window` call starts per rolling one-second window.
/// `acquire` suspends until capacity is available; it never rejects.
pub struct RateLimiter {
    max_per_window: usize,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_window: usize) -> Self {
        assert!(max_per_window > 0, "rate limit must be positive");
        Self {
            max_per_window,
            starts: Mutex::new(VecDeque::with_capacity(max_per_window)),
        }
    }

    /// Wait for a call slot in the rolling window, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut starts = self.starts.lock().await;
                let now = Instant::now();
                while let Some(&front) = starts.front() {
                    if now.duration_since(front) >= WINDOW {
                        starts.pop_front();
                    } else {
                        break;
                    }
                }
                if starts.len() < self.max_per_window {
                    starts.push_back(now);
                    return;
                }
                // Oldest start leaves the window first; sleep until it does.
                WINDOW - now.duration_since(starts[0])
            };
            tokio::time::sleep(wait).await;
        }
    }
}
