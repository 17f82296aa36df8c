//! Rate limiting for public endpoints.
//!
//! Two layers with different jobs:
//!
//! - per-IP tower_governor layers on the public routes (DoS dampening);
//! - a process-local per-user sliding window for redeem claims. This one is
//!   not shared across instances; multi-instance deployments need a shared
//!   counter store. It is an abuse dampener, not a security boundary: the
//!   redeem counters' atomic guards are what actually hold the limits.
//!
//! Configure via environment variables:
//! - RATE_LIMIT_STANDARD_RPM (default: 30)
//! - RATE_LIMIT_RELAXED_RPM (default: 60)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;

/// Rate limiter layer type alias using governor types directly
pub type RateLimitLayer = GovernorLayer<
    tower_governor::key_extractor::PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
>;

/// Creates a rate limiter layer with the specified requests per minute.
fn create_layer(requests_per_minute: u32) -> RateLimitLayer {
    assert!(requests_per_minute > 0, "Rate limit must be greater than 0");

    let period_secs = 60 / requests_per_minute as u64;
    let config = GovernorConfigBuilder::default()
        .period(Duration::from_secs(period_secs.max(1)))
        .burst_size(requests_per_minute)
        .finish()
        .expect("Failed to build rate limiter config");

    GovernorLayer::new(Arc::new(config))
}

/// Standard tier: validate/heartbeat/redeem endpoints doing crypto/DB work.
pub fn standard_layer(requests_per_minute: u32) -> RateLimitLayer {
    create_layer(requests_per_minute)
}

/// Relaxed tier: lightweight endpoints like health checks.
pub fn relaxed_layer(requests_per_minute: u32) -> RateLimitLayer {
    create_layer(requests_per_minute)
}

struct Window {
    started_at: Instant,
    count: u32,
}

/// Process-local per-key sliding window (fixed window from first attempt).
/// Every call counts as an attempt; returns whether it is allowed.
pub struct SlidingWindowLimiter {
    max_attempts: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_attempts: u32, window_secs: u64) -> Self {
        Self {
            max_attempts,
            window: Duration::from_secs(window_secs),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("limiter mutex poisoned");

        let window = windows
            .entry(key.to_string())
            .and_modify(|w| {
                if now.duration_since(w.started_at) > self.window {
                    w.started_at = now;
                    w.count = 0;
                }
                w.count += 1;
            })
            .or_insert(Window {
                started_at: now,
                count: 1,
            });

        window.count <= self.max_attempts
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(5, 60)
    }
}
