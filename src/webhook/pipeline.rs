//! One inbound webhook call, start to finish.
//!
//! ```text
//! GET  → handshake ─────────────────────────────────────────→ Response
//! POST → signature → decode → extract → dedup → rate limit → Messages
//!            │          │                           │
//!           401        400                         429
//! ```
//!
//! The pipeline owns the process-wide shared state (rate-limit buckets,
//! blacklist, handshake cache). Build one per process and share it behind an
//! `Arc`; tests build isolated instances.

use super::{
    Deduplicator, DedupOutcome, Envelope, HandshakeResponder, MessageBatch, PipelineOutcome,
    VerifyQuery, WebhookResponse,
};
use crate::config::Config;
use crate::error::{AuthFailure, IngressError};
use crate::security::{RateLimiter, SignatureCheck, SignatureVerifier};
use crate::telemetry::{SignatureRejection, TelemetryEvent, TelemetrySink};
use crate::util::mask_phone;
use axum::http::{Method, StatusCode};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One inbound HTTP call, as seen by the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub method: &'a Method,
    pub query: &'a VerifyQuery,
    /// Value of the signature header, if any.
    pub signature: Option<&'a str>,
    /// Raw, unparsed body bytes.
    pub body: &'a [u8],
    pub correlation_id: &'a str,
}

struct Maintenance {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Extraction result handed from the guarded stage to the limiter.
struct Extracted {
    dedup: DedupOutcome,
    locales: super::ContactLocaleIndex,
    display_number: Option<String>,
}

pub struct WebhookPipeline {
    enabled: bool,
    own_endpoint_id: Arc<str>,
    verifier: SignatureVerifier,
    handshake: HandshakeResponder,
    deduplicator: Deduplicator,
    rate_limiter: Arc<RateLimiter>,
    sink: Arc<dyn TelemetrySink>,
    maintenance: Mutex<Option<Maintenance>>,
}

impl WebhookPipeline {
    pub fn from_config(config: &Config, sink: Arc<dyn TelemetrySink>) -> Self {
        let wa = &config.whatsapp;
        if wa.allow_unsigned {
            tracing::warn!("Unsigned webhook deliveries are accepted; do not use in production");
        }

        Self {
            enabled: wa.enabled,
            own_endpoint_id: Arc::from(wa.phone_number_id.trim()),
            verifier: SignatureVerifier::new(wa.app_secret.as_deref(), wa.allow_unsigned),
            handshake: HandshakeResponder::new(
                &wa.verify_token,
                Duration::from_secs(config.handshake.cache_ttl_secs),
                config.handshake.cache_max_entries,
                Arc::clone(&sink),
            ),
            deduplicator: Deduplicator::new(Arc::clone(&sink)),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit, Arc::clone(&sink))),
            sink,
            maintenance: Mutex::new(None),
        }
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Route one call by method.
    pub fn handle(&self, request: &InboundRequest<'_>) -> PipelineOutcome {
        let cid = request.correlation_id;
        if !self.enabled {
            return PipelineOutcome::Response(WebhookResponse::from_error(
                &IngressError::Unavailable,
                cid,
            ));
        }

        match *request.method {
            Method::GET => PipelineOutcome::Response(self.verify(request.query, cid)),
            Method::POST => self.deliver(request.body, request.signature, cid),
            _ => PipelineOutcome::Response(WebhookResponse::json(
                StatusCode::METHOD_NOT_ALLOWED,
                &serde_json::json!({
                    "error": "method_not_allowed",
                    "correlationId": cid,
                }),
            )),
        }
    }

    /// GET: endpoint-ownership handshake.
    pub fn verify(&self, query: &VerifyQuery, correlation_id: &str) -> WebhookResponse {
        self.handshake.respond(query, correlation_id)
    }

    /// POST: authenticate, extract, deduplicate and rate limit one delivery.
    pub fn deliver(
        &self,
        body: &[u8],
        signature: Option<&str>,
        correlation_id: &str,
    ) -> PipelineOutcome {
        if let Err(failure) = self.authenticate(body, signature, correlation_id) {
            return PipelineOutcome::Response(WebhookResponse::from_error(
                &IngressError::Authentication(failure),
                correlation_id,
            ));
        }

        let extracted = match self.guarded("extract", correlation_id, || {
            self.extract(body, correlation_id)
        }) {
            Ok(extracted) => extracted,
            Err(error) => {
                return PipelineOutcome::Response(WebhookResponse::from_error(
                    &error,
                    correlation_id,
                ))
            }
        };

        let messages = extracted.dedup.unique;
        let sender = messages
            .iter()
            .map(|m| m.from.trim())
            .find(|from| !from.is_empty());

        if let Some(sender) = sender {
            let decision = self.rate_limiter.check_limit(sender, correlation_id);
            if let Some(rejection) = decision.rejection() {
                tracing::warn!(
                    correlation_id,
                    sender = %mask_phone(sender),
                    blacklisted = decision.blacklisted,
                    "Webhook delivery rate limited"
                );
                return PipelineOutcome::Response(WebhookResponse::from_error(
                    &rejection,
                    correlation_id,
                ));
            }
        }

        tracing::debug!(
            correlation_id,
            messages = messages.len(),
            duplicates = extracted.dedup.duplicate_count,
            "Webhook delivery accepted"
        );

        PipelineOutcome::Messages(MessageBatch {
            correlation_id: correlation_id.to_string(),
            messages,
            contact_locales: extracted.locales,
            display_number: extracted.display_number,
        })
    }

    fn authenticate(
        &self,
        body: &[u8],
        signature: Option<&str>,
        correlation_id: &str,
    ) -> Result<(), AuthFailure> {
        match self.verifier.check(body, signature) {
            Ok(SignatureCheck::Verified) => {
                self.sink.record(TelemetryEvent::SignatureVerified {
                    correlation_id: correlation_id.to_string(),
                });
                Ok(())
            }
            Ok(SignatureCheck::Bypassed) => {
                tracing::warn!(correlation_id, "Webhook signature check bypassed");
                self.sink.record(TelemetryEvent::SignatureBypassed {
                    correlation_id: correlation_id.to_string(),
                });
                Ok(())
            }
            Err(failure) => {
                tracing::warn!(
                    correlation_id,
                    "WhatsApp webhook signature verification failed (signature {failure})"
                );
                let reason = match failure {
                    AuthFailure::Missing => SignatureRejection::Missing,
                    AuthFailure::Invalid => SignatureRejection::Invalid,
                };
                self.sink.record(TelemetryEvent::SignatureRejected {
                    correlation_id: correlation_id.to_string(),
                    reason,
                });
                Err(failure)
            }
        }
    }

    fn extract(&self, body: &[u8], correlation_id: &str) -> Result<Extracted, IngressError> {
        let envelope = Envelope::decode(body).inspect_err(|e| {
            tracing::warn!(correlation_id, error = %e, "Rejected webhook envelope");
        })?;
        let parsed = envelope.extract(&self.own_endpoint_id);
        if parsed.foreign_changes > 0 {
            tracing::debug!(
                correlation_id,
                dropped = parsed.foreign_changes,
                "Dropped changes for other phone number ids"
            );
        }

        let dedup = self.deduplicator.dedup(parsed.messages, correlation_id);
        Ok(Extracted {
            dedup,
            locales: parsed.locales,
            display_number: parsed.display_number,
        })
    }

    /// Run `stage` so a panic becomes a 500 instead of unwinding into the server.
    fn guarded<T>(
        &self,
        stage: &'static str,
        correlation_id: &str,
        f: impl FnOnce() -> Result<T, IngressError>,
    ) -> Result<T, IngressError> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => {
                let detail = panic_detail(payload.as_ref());
                tracing::error!(correlation_id, stage, detail = %detail, "Webhook pipeline panicked");
                self.sink.record(TelemetryEvent::PipelineFailure {
                    correlation_id: correlation_id.to_string(),
                    stage,
                    detail: detail.clone(),
                });
                Err(IngressError::Internal(detail))
            }
        }
    }

    /// Spawn the periodic bucket sweep. Must run inside a Tokio runtime.
    /// Calling it again while running is a no-op.
    pub fn start_maintenance(&self) {
        let mut slot = self.maintenance.lock();
        if slot.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let limiter = Arc::clone(&self.rate_limiter);
        let period = limiter.sweep_interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        limiter.sweep();
                    }
                }
            }
            tracing::debug!("Rate limiter maintenance stopped");
        });

        *slot = Some(Maintenance { cancel, task });
    }

    pub fn maintenance_running(&self) -> bool {
        self.maintenance.lock().is_some()
    }

    /// Stop the maintenance task and wait for it to exit.
    pub async fn shutdown(&self) {
        let maintenance = self.maintenance.lock().take();
        if let Some(Maintenance { cancel, task }) = maintenance {
            cancel.cancel();
            if let Err(e) = task.await {
                tracing::warn!("Rate limiter maintenance task failed: {e}");
            }
        }
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
