//! Per-sender rate limiting with blacklist escalation.
//!
//! Implements a fixed-window counter per identifier with a violation tally:
//! - Open: under `max_requests` in the current window
//! - Limited: over the limit, each rejected call adds a violation
//! - Blacklisted: `blacklist_threshold` consecutive violations (operator unblock required)
//!
//! ## Design
//! - One mutex guards buckets and blacklist, so every check is atomic
//! - A fixed window can admit up to `2 × max_requests` across a boundary
//! - Buckets idle for more than two windows are swept; the blacklist is never swept

use crate::error::{IngressError, BLACKLIST_RETRY_AFTER_SECS};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Default window: 60 seconds.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Default: 100 requests per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 100;

/// Default: blacklist after 10 violations.
pub const DEFAULT_BLACKLIST_THRESHOLD: u32 = 10;

/// Longest accepted window: one day. Longer values are clamped.
pub const MAX_WINDOW_MS: u64 = 86_400_000;

/// Rate limiter settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Requests admitted per identifier per window.
    pub max_requests: u32,
    /// Violations that move an identifier onto the blacklist.
    pub blacklist_threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_requests: DEFAULT_MAX_REQUESTS,
            blacklist_threshold: DEFAULT_BLACKLIST_THRESHOLD,
        }
    }
}

impl RateLimitConfig {
    /// Effective window length, clamped to `1..=MAX_WINDOW_MS`.
    pub fn window_ms_clamped(&self) -> u64 {
        self.window_ms.clamp(1, MAX_WINDOW_MS)
    }

    fn window(&self) -> ChronoDuration {
        ChronoDuration::milliseconds(i64::try_from(self.window_ms_clamped()).unwrap_or(0))
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is allowed.
    pub allowed: bool,
    /// Requests left in the current window (0 if blocked).
    pub remaining: u32,
    /// When the current window (or blacklist penalty) ends.
    pub reset_at: DateTime<Utc>,
    /// Seconds to wait before retrying; set only when blocked.
    pub retry_after: Option<u64>,
    /// Whether the identifier is on the blacklist.
    pub blacklisted: bool,
}

impl RateLimitDecision {
    /// The terminal error for a rejected decision, `None` when allowed.
    pub fn rejection(&self) -> Option<IngressError> {
        if self.allowed {
            return None;
        }
        if self.blacklisted {
            return Some(IngressError::Blacklisted);
        }
        Some(IngressError::RateLimited {
            retry_after_secs: self.retry_after.unwrap_or(1),
            reset_at: self.reset_at.timestamp(),
        })
    }
}

/// Operational snapshot of the limiter.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub bucket_count: usize,
    pub blacklist_count: usize,
    pub config: RateLimitConfig,
}

/// Per-identifier counter state for one window.
#[derive(Debug, Clone)]
struct Bucket {
    count: u32,
    window_reset_at: DateTime<Utc>,
    violations: u32,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LimiterState {
    buckets: HashMap<String, Bucket>,
    blacklist: HashSet<String>,
}

/// Fixed-window rate limiter shared by all in-flight requests.
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
    sink: Arc<dyn TelemetrySink>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
            sink,
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// How often the idle-bucket sweep should run (one window).
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.config.window_ms_clamped())
    }

    /// Check and count one request from `identifier`.
    pub fn check_limit(&self, identifier: &str, correlation_id: &str) -> RateLimitDecision {
        self.check_limit_at(identifier, correlation_id, Utc::now())
    }

    /// [`Self::check_limit`] against an explicit clock reading.
    pub fn check_limit_at(
        &self,
        identifier: &str,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let mut events = Vec::new();
        let decision = {
            let mut state = self.state.lock();
            self.evaluate(&mut state, identifier, correlation_id, now, &mut events)
        };

        for event in events {
            self.sink.record(event);
        }
        decision
    }

    fn evaluate(
        &self,
        state: &mut LimiterState,
        identifier: &str,
        correlation_id: &str,
        now: DateTime<Utc>,
        events: &mut Vec<TelemetryEvent>,
    ) -> RateLimitDecision {
        // Blacklist first, independent of window state
        if state.blacklist.contains(identifier) {
            events.push(TelemetryEvent::BlacklistedRejection {
                correlation_id: correlation_id.to_string(),
                identifier: identifier.to_string(),
            });
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at: saturating_add(
                    now,
                    ChronoDuration::seconds(
                        i64::try_from(BLACKLIST_RETRY_AFTER_SECS).unwrap_or(0),
                    ),
                ),
                retry_after: Some(BLACKLIST_RETRY_AFTER_SECS),
                blacklisted: true,
            };
        }

        let window = self.config.window();
        let bucket = state
            .buckets
            .entry(identifier.to_string())
            .or_insert_with(|| Bucket {
                count: 0,
                window_reset_at: saturating_add(now, window),
                violations: 0,
                last_seen: now,
            });
        bucket.last_seen = now;

        // Window expired: start a new one, violations carry over
        if now >= bucket.window_reset_at {
            bucket.count = 0;
            bucket.window_reset_at = saturating_add(now, window);
        }

        if bucket.count >= self.config.max_requests {
            bucket.violations = bucket.violations.saturating_add(1);
            let violations = bucket.violations;
            let reset_at = bucket.window_reset_at;
            let retry_after = retry_after_secs(reset_at, now);

            events.push(TelemetryEvent::RateLimitExceeded {
                correlation_id: correlation_id.to_string(),
                identifier: identifier.to_string(),
                violations,
                retry_after_secs: retry_after,
            });

            if violations >= self.config.blacklist_threshold {
                state.blacklist.insert(identifier.to_string());
                events.push(TelemetryEvent::BlacklistAdded {
                    correlation_id: correlation_id.to_string(),
                    identifier: identifier.to_string(),
                    violations,
                });
            }

            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at,
                retry_after: Some(retry_after),
                blacklisted: false,
            };
        }

        bucket.count += 1;
        // A successful request forgives earlier near-misses
        bucket.violations = 0;

        RateLimitDecision {
            allowed: true,
            remaining: self.config.max_requests - bucket.count,
            reset_at: bucket.window_reset_at,
            retry_after: None,
            blacklisted: false,
        }
    }

    /// Operator action: clear blacklist membership and bucket state.
    /// Returns whether the identifier was blacklisted.
    pub fn unblock(&self, identifier: &str) -> bool {
        let was_blacklisted = {
            let mut state = self.state.lock();
            state.buckets.remove(identifier);
            state.blacklist.remove(identifier)
        };
        self.sink.record(TelemetryEvent::Unblocked {
            identifier: identifier.to_string(),
            was_blacklisted,
        });
        was_blacklisted
    }

    pub fn is_blacklisted(&self, identifier: &str) -> bool {
        self.state.lock().blacklist.contains(identifier)
    }

    /// Remove buckets idle for more than two windows. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let idle_limit = self.config.window() + self.config.window();
        let (removed, remaining) = {
            let mut state = self.state.lock();
            let before = state.buckets.len();
            state
                .buckets
                .retain(|_, bucket| now - bucket.last_seen <= idle_limit);
            (before - state.buckets.len(), state.buckets.len())
        };

        if removed > 0 {
            self.sink
                .record(TelemetryEvent::BucketCleanup { removed, remaining });
        }
        removed
    }

    pub fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock();
        RateLimiterStats {
            bucket_count: state.buckets.len(),
            blacklist_count: state.blacklist.len(),
            config: self.config,
        }
    }
}

/// `now + delta`, pinned to the latest representable instant on overflow.
fn saturating_add(now: DateTime<Utc>, delta: ChronoDuration) -> DateTime<Utc> {
    now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whole seconds until `reset_at`, rounded up.
fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset_at - now).num_milliseconds().max(0);
    u64::try_from(millis).unwrap_or(0).div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RecordingSink;

    fn limiter(max_requests: u32, window_ms: u64) -> (RateLimiter, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let limiter = RateLimiter::new(
            RateLimitConfig {
                window_ms,
                max_requests,
                blacklist_threshold: DEFAULT_BLACKLIST_THRESHOLD,
            },
            sink.clone(),
        );
        (limiter, sink)
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + millis).unwrap()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = RateLimitConfig::default();
        assert_eq!(config.window_ms, 60_000);
        assert_eq!(config.max_requests, 100);
        assert_eq!(config.blacklist_threshold, 10);
    }

    #[test]
    fn hundred_allowed_then_rejected() {
        let limiter = RateLimiter::new(RateLimitConfig::default(), Arc::new(RecordingSink::new()));
        let now = at(0);

        let mut previous = u32::MAX;
        for _ in 0..100 {
            let d = limiter.check_limit_at("x", "cid", now);
            assert!(d.allowed);
            assert!(d.remaining < previous);
            previous = d.remaining;
        }
        assert_eq!(previous, 0);

        let d = limiter.check_limit_at("x", "cid", now);
        assert!(!d.allowed);
        assert!(d.retry_after.unwrap() > 0);
        assert_eq!(d.remaining, 0);
    }

    #[test]
    fn remaining_decreases() {
        let (limiter, _) = limiter(5, 60_000);
        assert_eq!(limiter.check_limit_at("u", "c", at(0)).remaining, 4);
        assert_eq!(limiter.check_limit_at("u", "c", at(1)).remaining, 3);
    }

    #[test]
    fn retry_after_rounds_up_to_window_end() {
        let (limiter, _) = limiter(1, 60_000);
        limiter.check_limit_at("u", "c", at(0));
        let d = limiter.check_limit_at("u", "c", at(10_500));
        assert_eq!(d.retry_after, Some(50));
        assert_eq!(d.reset_at, at(60_000));
    }

    #[test]
    fn window_resets_count_but_keeps_violations() {
        let (limiter, _) = limiter(1, 1_000);
        assert!(limiter.check_limit_at("u", "c", at(0)).allowed);
        assert!(!limiter.check_limit_at("u", "c", at(10)).allowed);
        assert!(!limiter.check_limit_at("u", "c", at(20)).allowed);

        {
            let state = limiter.state.lock();
            assert_eq!(state.buckets["u"].violations, 2);
        }

        // New window at 1000ms
        let d = limiter.check_limit_at("u", "c", at(1_000));
        assert!(d.allowed);
        assert_eq!(d.reset_at, at(2_000));

        // Success forgave the violations
        let state = limiter.state.lock();
        assert_eq!(state.buckets["u"].violations, 0);
    }

    #[test]
    fn violations_escalate_to_blacklist() {
        let (limiter, sink) = limiter(100, 60_000);
        let now = at(0);
        for _ in 0..100 {
            limiter.check_limit_at("y", "cid", now);
        }
        for i in 1..=10 {
            let d = limiter.check_limit_at("y", "cid", now);
            assert!(!d.allowed);
            assert!(!d.blacklisted, "violation {i} is reported as a plain limit");
        }

        assert!(limiter.is_blacklisted("y"));
        assert_eq!(sink.count("blacklist_added"), 1);
        assert_eq!(sink.count("rate_limit_exceeded"), 10);

        // Well past the window: still rejected with the fixed penalty
        let later = at(10 * 60_000);
        let d = limiter.check_limit_at("y", "cid", later);
        assert!(!d.allowed);
        assert!(d.blacklisted);
        assert_eq!(d.retry_after, Some(3600));
        assert_eq!(d.remaining, 0);
        assert_eq!(sink.count("blacklisted_rejection"), 1);
        assert!(matches!(d.rejection(), Some(IngressError::Blacklisted)));
    }

    #[test]
    fn unblock_restores_access() {
        let (limiter, sink) = limiter(1, 60_000);
        let now = at(0);
        limiter.check_limit_at("y", "c", now);
        for _ in 0..10 {
            limiter.check_limit_at("y", "c", now);
        }
        assert!(limiter.is_blacklisted("y"));

        assert!(limiter.unblock("y"));
        assert!(!limiter.is_blacklisted("y"));
        assert_eq!(sink.count("unblocked"), 1);

        // Bucket state is gone too, so the window starts fresh
        let d = limiter.check_limit_at("y", "c", now);
        assert!(d.allowed);
        assert_eq!(d.remaining, 0);

        assert!(!limiter.unblock("never-seen"));
    }

    #[test]
    fn separate_keys_tracked_independently() {
        let (limiter, _) = limiter(2, 60_000);
        let now = at(0);
        limiter.check_limit_at("a", "c", now);
        limiter.check_limit_at("a", "c", now);
        assert!(!limiter.check_limit_at("a", "c", now).allowed);
        assert!(limiter.check_limit_at("b", "c", now).allowed);
    }

    #[test]
    fn rejection_maps_to_rate_limited_error() {
        let (limiter, _) = limiter(1, 60_000);
        limiter.check_limit_at("u", "c", at(0));
        let d = limiter.check_limit_at("u", "c", at(30_000));
        match d.rejection() {
            Some(IngressError::RateLimited {
                retry_after_secs,
                reset_at,
            }) => {
                assert_eq!(retry_after_secs, 30);
                assert_eq!(reset_at, at(60_000).timestamp());
            }
            other => panic!("unexpected rejection: {other:?}"),
        }
        assert!(limiter.check_limit_at("v", "c", at(0)).rejection().is_none());
    }

    #[test]
    fn sweep_removes_idle_buckets_only() {
        let (limiter, sink) = limiter(10, 1_000);
        limiter.check_limit_at("stale", "c", at(0));
        limiter.check_limit_at("fresh", "c", at(2_500));
        assert_eq!(limiter.stats().bucket_count, 2);

        let removed = limiter.sweep_at(at(3_000));
        assert_eq!(removed, 1);
        assert_eq!(limiter.stats().bucket_count, 1);
        assert_eq!(sink.count("bucket_cleanup"), 1);

        // Nothing idle: no event
        assert_eq!(limiter.sweep_at(at(3_000)), 0);
        assert_eq!(sink.count("bucket_cleanup"), 1);
    }

    #[test]
    fn sweep_keeps_blacklist() {
        let (limiter, _) = limiter(1, 1_000);
        limiter.check_limit_at("y", "c", at(0));
        for i in 0..10 {
            limiter.check_limit_at("y", "c", at(1 + i));
        }
        limiter.sweep_at(at(60_000));

        let stats = limiter.stats();
        assert_eq!(stats.bucket_count, 0);
        assert_eq!(stats.blacklist_count, 1);
        assert!(!limiter.check_limit_at("y", "c", at(60_001)).allowed);
    }

    #[test]
    fn stats_expose_effective_config() {
        let (limiter, _) = limiter(7, 2_000);
        let stats = limiter.stats();
        assert_eq!(stats.config.max_requests, 7);
        assert_eq!(stats.config.window_ms, 2_000);
        assert_eq!(limiter.sweep_interval(), Duration::from_millis(2_000));
    }

    #[test]
    fn oversized_window_is_clamped_instead_of_overflowing() {
        let (limiter, _) = limiter(1, u64::MAX);
        assert_eq!(limiter.sweep_interval(), Duration::from_millis(MAX_WINDOW_MS));

        let first = limiter.check_limit("x", "c");
        assert!(first.allowed);
        assert!(first.reset_at <= Utc::now() + ChronoDuration::milliseconds(86_400_000));

        let second = limiter.check_limit("x", "c");
        assert!(!second.allowed);
        assert_eq!(limiter.sweep(), 0);
    }

    #[test]
    fn reset_time_saturates_near_end_of_time() {
        let (limiter, _) = limiter(1, 60_000);
        let late = DateTime::<Utc>::MAX_UTC - ChronoDuration::seconds(1);
        let decision = limiter.check_limit_at("z", "c", late);
        assert!(decision.allowed);
        assert_eq!(decision.reset_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn concurrent_checks_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::new(
            RateLimitConfig {
                window_ms: 60_000,
                max_requests: 50,
                blacklist_threshold: 1_000,
            },
            Arc::new(RecordingSink::new()),
        ));
        let now = at(0);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..20)
                        .filter(|_| limiter.check_limit_at("shared", "c", now).allowed)
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }
}
