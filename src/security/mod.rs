//! Request authentication and abuse control for the webhook edge.

pub mod rate_limiter;
pub mod signature;

pub use rate_limiter::{RateLimitConfig, RateLimitDecision, RateLimiter, RateLimiterStats};
pub use signature::{SignatureCheck, SignatureVerifier};

/// Compare two strings without short-circuiting on the first differing byte.
///
/// Length mismatches still return early; lengths of tokens are not secret here.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq("hello", "hello"));
        assert!(!constant_time_eq("hello", "world"));
        assert!(!constant_time_eq("short", "longer"));
        assert!(constant_time_eq("", ""));
    }
}
