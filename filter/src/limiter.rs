// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fixed-window rate limiter keyed by client address and route.
//!
//! Counters live in a sharded concurrent map; the check-and-increment for a
//! key runs under that key's shard lock only. Limits are enforced per filter
//! instance: N replicas admit up to N times the configured rate in total.
//!
//! A window opens with the first request after the previous one expired and
//! lasts exactly one `TimeUnit`.

use crate::config::{LimiterConfig, RateLimitSpec};
use crate::metrics;
use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request is admitted
    Admitted {
        /// Remaining requests in current window
        remaining: u32,
        /// Time until window resets
        reset_in: Duration,
    },
    /// Window quota exhausted
    Rejected {
        /// Time until the window resets
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CounterKey {
    client: IpAddr,
    route: String,
}

#[derive(Debug)]
struct RateLimitCounter {
    count: u32,
    window_start: Instant,
    window: Duration,
    last_seen: Instant,
}

impl RateLimitCounter {
    fn new(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            window_start: now,
            window,
            last_seen: now,
        }
    }
}

/// Thread-safe rate limiter.
pub struct RateLimiter {
    config: LimiterConfig,
    counters: DashMap<CounterKey, RateLimitCounter>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            counters: DashMap::new(),
        }
    }

    /// Count a request from `client` against `route`.
    pub fn admit(&self, client: IpAddr, route: &str, spec: &RateLimitSpec) -> Admission {
        self.admit_at(client, route, spec, Instant::now())
    }

    /// [`RateLimiter::admit`] with an explicit clock.
    pub fn admit_at(&self, client: IpAddr, route: &str, spec: &RateLimitSpec, now: Instant) -> Admission {
        let window = spec.window();
        let limit = spec.requests_per_unit.get();
        let key = CounterKey {
            client,
            route: route.to_string(),
        };

        if !self.counters.contains_key(&key) && self.counters.len() >= self.config.max_tracked_keys {
            warn!(
                %client,
                route,
                tracked = self.config.max_tracked_keys,
                "Rate limiter at capacity, admitting untracked request"
            );
            metrics::LIMITER_FAIL_OPEN.inc();
            return Admission::Admitted {
                remaining: limit,
                reset_in: window,
            };
        }

        let mut counter = self
            .counters
            .entry(key)
            .or_insert_with(|| RateLimitCounter::new(now, window));

        if now.duration_since(counter.window_start) >= window || counter.window != window {
            counter.count = 0;
            counter.window_start = now;
            counter.window = window;
        }
        counter.last_seen = now;

        let reset_in = window.saturating_sub(now.duration_since(counter.window_start));
        if counter.count < limit {
            counter.count += 1;
            Admission::Admitted {
                remaining: limit - counter.count,
                reset_in,
            }
        } else {
            debug!(%client, route, retry_after = ?reset_in, "Route rate limit exceeded");
            Admission::Rejected {
                retry_after: reset_in,
            }
        }
    }

    /// Drop counters idle for longer than their window and the retention
    /// period (should be called periodically).
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }

    pub fn cleanup_at(&self, now: Instant) {
        let retention = self.config.retention();
        self.counters.retain(|_, counter| {
            now.duration_since(counter.last_seen) < retention.max(counter.window)
        });
        metrics::TRACKED_COUNTERS.set(self.counters.len() as i64);
    }

    /// Number of live counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
