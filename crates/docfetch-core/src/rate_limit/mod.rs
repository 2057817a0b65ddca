//! Per-source rate limiting.
//!
//! Each source has a bucket of `capacity` permits per window. A permit spent
//! at `t` becomes available again at `t + window`, so any rolling window of
//! that length contains at most `capacity` transfer starts, and an idle source
//! can burst up to `capacity` immediately.
//!
//! The limiter is owned by the scheduler task; callers pass the current
//! instant explicitly (`*_at`) so tests can drive time.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::DocfetchConfig;

/// Permits per window for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub capacity: u32,
    pub window: Duration,
}

impl Rate {
    pub fn per_minute(capacity: u32) -> Self {
        Self {
            capacity,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    rate: Rate,
    /// Instants at which permits were spent, oldest first.
    spent: VecDeque<Instant>,
}

impl Bucket {
    fn new(rate: Rate) -> Self {
        Self {
            rate,
            spent: VecDeque::with_capacity(rate.capacity as usize),
        }
    }

    fn refill(&mut self, now: Instant) {
        while let Some(&oldest) = self.spent.front() {
            if now.saturating_duration_since(oldest) >= self.rate.window {
                self.spent.pop_front();
            } else {
                break;
            }
        }
    }

    fn available(&self) -> u32 {
        self.rate
            .capacity
            .saturating_sub(self.spent.len() as u32)
    }
}

/// Token buckets keyed by source id.
#[derive(Debug)]
pub struct RateLimiter {
    default_rate: Rate,
    overrides: HashMap<String, Rate>,
    buckets: HashMap<String, Bucket>,
}

impl RateLimiter {
    /// Limiter where every source gets `default_rate` unless overridden.
    pub fn new(default_rate: Rate) -> Self {
        Self {
            default_rate,
            overrides: HashMap::new(),
            buckets: HashMap::new(),
        }
    }

    /// Build from the `[rate_limits]` and `[sources.*]` config sections.
    pub fn from_config(cfg: &DocfetchConfig) -> Self {
        let mut limiter = Self::new(Rate::per_minute(
            cfg.rate_limits.default_requests_per_minute.max(1),
        ));
        for id in cfg.sources.keys() {
            let (capacity, window) = cfg.rate_for(id);
            limiter.set_rate(id, Rate { capacity, window });
        }
        limiter
    }

    /// Override the rate for one source. Permits already spent keep counting.
    pub fn set_rate(&mut self, source_id: &str, rate: Rate) {
        let rate = Rate {
            capacity: rate.capacity.max(1),
            window: rate.window,
        };
        self.overrides.insert(source_id.to_string(), rate);
        if let Some(bucket) = self.buckets.get_mut(source_id) {
            bucket.rate = rate;
        }
    }

    pub fn rate_for(&self, source_id: &str) -> Rate {
        self.overrides
            .get(source_id)
            .copied()
            .unwrap_or(self.default_rate)
    }

    fn bucket(&mut self, source_id: &str) -> &mut Bucket {
        let rate = self.rate_for(source_id);
        self.buckets
            .entry(source_id.to_string())
            .or_insert_with(|| Bucket::new(rate))
    }

    /// Take one permit for `source_id` if available. Never blocks.
    pub fn try_acquire_at(&mut self, source_id: &str, now: Instant) -> bool {
        let bucket = self.bucket(source_id);
        bucket.refill(now);
        if bucket.available() == 0 {
            tracing::debug!(source = source_id, "rate limit: no token available");
            return false;
        }
        bucket.spent.push_back(now);
        true
    }

    pub fn try_acquire(&mut self, source_id: &str) -> bool {
        self.try_acquire_at(source_id, Instant::now())
    }

    /// Give back the most recently spent permit, for a start that never
    /// reached the source.
    pub fn refund(&mut self, source_id: &str) {
        if let Some(bucket) = self.buckets.get_mut(source_id) {
            bucket.spent.pop_back();
        }
    }

    /// How long until `source_id` has a permit again (zero if it has one now).
    pub fn time_until_available_at(&mut self, source_id: &str, now: Instant) -> Duration {
        let bucket = self.bucket(source_id);
        bucket.refill(now);
        if bucket.available() > 0 {
            return Duration::ZERO;
        }
        match bucket.spent.front() {
            Some(&oldest) => (oldest + bucket.rate.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    pub fn time_until_available(&mut self, source_id: &str) -> Duration {
        self.time_until_available_at(source_id, Instant::now())
    }

    /// Permits currently available for `source_id`.
    pub fn available_at(&mut self, source_id: &str, now: Instant) -> u32 {
        let bucket = self.bucket(source_id);
        bucket.refill(now);
        bucket.available()
    }
}
