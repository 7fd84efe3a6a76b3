//! Endpoint-ownership handshake (`GET ?hub.mode=subscribe&...`).
//!
//! The provider may repeat an identical verification call; answers are
//! cached per `(mode, verify_token, challenge)` triple for a short TTL.

use super::WebhookResponse;
use crate::security::constant_time_eq;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use axum::http::StatusCode;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default lifetime of a cached handshake answer.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Default upper bound on cached handshake answers.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1024;

/// Verification query params
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Hash)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedAnswer {
    response: WebhookResponse,
    expires_at: Instant,
}

/// Answers handshake calls, with a bounded response cache.
pub struct HandshakeResponder {
    verify_token: Arc<str>,
    ttl: Duration,
    max_entries: usize,
    cache: Mutex<HashMap<VerifyQuery, CachedAnswer>>,
    sink: Arc<dyn TelemetrySink>,
}

impl HandshakeResponder {
    pub fn new(
        verify_token: &str,
        ttl: Duration,
        max_entries: usize,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            verify_token: Arc::from(verify_token.trim()),
            ttl,
            max_entries,
            cache: Mutex::new(HashMap::new()),
            sink,
        }
    }

    pub fn respond(&self, query: &VerifyQuery, correlation_id: &str) -> WebhookResponse {
        self.respond_at(query, correlation_id, Instant::now())
    }

    pub fn respond_at(
        &self,
        query: &VerifyQuery,
        correlation_id: &str,
        now: Instant,
    ) -> WebhookResponse {
        let cached = {
            let cache = self.cache.lock();
            cache
                .get(query)
                .filter(|answer| answer.expires_at > now)
                .map(|answer| answer.response.clone())
        };
        if let Some(response) = cached {
            self.sink.record(TelemetryEvent::ChallengeCacheHit {
                correlation_id: correlation_id.to_string(),
                status: response.status.as_u16(),
            });
            return response;
        }

        let response = self.compute(query, correlation_id);
        self.store(query, &response, now);
        response
    }

    fn compute(&self, query: &VerifyQuery, correlation_id: &str) -> WebhookResponse {
        // Verify the token matches (constant-time comparison to prevent timing attacks)
        let token_matches = !self.verify_token.is_empty()
            && query
                .verify_token
                .as_deref()
                .is_some_and(|t| constant_time_eq(t, &self.verify_token));

        if query.mode.as_deref() == Some("subscribe") && token_matches {
            tracing::info!(correlation_id, "Webhook handshake verified");
            self.sink.record(TelemetryEvent::HandshakeVerified {
                correlation_id: correlation_id.to_string(),
            });
            let challenge = query.challenge.clone().unwrap_or_default();
            return WebhookResponse::text(StatusCode::OK, challenge);
        }

        tracing::warn!(
            correlation_id,
            mode = query.mode.as_deref().unwrap_or("missing"),
            token = if query.verify_token.is_some() { "present" } else { "missing" },
            "Webhook handshake rejected"
        );
        self.sink.record(TelemetryEvent::HandshakeRejected {
            correlation_id: correlation_id.to_string(),
        });
        WebhookResponse::text(StatusCode::FORBIDDEN, "Forbidden")
    }

    fn store(&self, query: &VerifyQuery, response: &WebhookResponse, now: Instant) {
        if self.ttl.is_zero() || self.max_entries == 0 {
            return;
        }

        let mut cache = self.cache.lock();
        cache.retain(|_, answer| answer.expires_at > now);
        if cache.len() >= self.max_entries {
            let oldest = cache
                .iter()
                .min_by_key(|(_, answer)| answer.expires_at)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                cache.remove(&key);
            }
        }
        cache.insert(
            query.clone(),
            CachedAnswer {
                response: response.clone(),
                expires_at: now + self.ttl,
            },
        );
    }

    /// Number of live cache entries.
    pub fn cached_entries(&self) -> usize {
        let now = Instant::now();
        self.cache
            .lock()
            .values()
            .filter(|answer| answer.expires_at > now)
            .count()
    }
}
