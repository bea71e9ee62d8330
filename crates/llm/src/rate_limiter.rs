//! Sliding-Window Rate Limiter
//!
//! Caller-side throttle shared by every query running through one gateway.
//! Requests blocked here fail fast; nothing is queued.
//!
//! Timestamps use `tokio::time::Instant` so tests can drive the window with
//! paused time.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_requests() -> usize {
    5
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

/// Sliding window of request timestamps.
///
/// The count of timestamps newer than `now - window` never exceeds capacity;
/// older entries are evicted lazily on every check.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    capacity: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether one more request fits in the current window.
    pub fn can_proceed(&self) -> bool {
        let now = Instant::now();
        let mut timestamps = self.lock();
        self.evict(&mut timestamps, now);
        timestamps.len() < self.capacity
    }

    /// Record a request at the current time.
    pub fn record(&self) {
        let now = Instant::now();
        let mut timestamps = self.lock();
        self.evict(&mut timestamps, now);
        timestamps.push_back(now);
    }

    /// Check and record under one lock. On rejection returns how long until
    /// the oldest request leaves the window.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut timestamps = self.lock();
        self.evict(&mut timestamps, now);

        if timestamps.len() < self.capacity {
            timestamps.push_back(now);
            Ok(())
        } else {
            Err(self.wait_time(&timestamps, now))
        }
    }

    /// Time until a slot frees up, `None` if one is free now.
    pub fn retry_after(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut timestamps = self.lock();
        self.evict(&mut timestamps, now);
        if timestamps.len() < self.capacity {
            None
        } else {
            Some(self.wait_time(&timestamps, now))
        }
    }

    /// Requests currently inside the window.
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        let mut timestamps = self.lock();
        self.evict(&mut timestamps, now);
        timestamps.len()
    }

    fn evict(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = timestamps.front() {
            if now.duration_since(oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn wait_time(&self, timestamps: &VecDeque<Instant>, now: Instant) -> Duration {
        timestamps
            .front()
            .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Instant>> {
        // Bookkeeping only, a poisoned lock still holds a consistent deque
        self.timestamps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}
