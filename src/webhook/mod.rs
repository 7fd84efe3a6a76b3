//! Inbound webhook pipeline for the WhatsApp Cloud API.
//!
//! GET calls answer the endpoint-ownership handshake. POST calls are
//! authenticated, decoded, scoped to the owned phone number id, deduplicated
//! and rate limited before the messages reach a downstream handler.

pub mod dedup;
pub mod envelope;
pub mod handshake;
pub mod pipeline;

pub use dedup::{Deduplicator, DedupOutcome};
pub use envelope::{ContactLocaleIndex, Envelope, ParsedEnvelope, RawMessage};
pub use handshake::{HandshakeResponder, VerifyQuery};
pub use pipeline::{InboundRequest, WebhookPipeline};

use crate::error::IngressError;
use axum::http::StatusCode;
use serde::Serialize;

/// A provider message that survived filtering and deduplication.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    /// Provider message id, never empty.
    pub id: String,
    /// Sender phone number as sent by the provider.
    pub from: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Provider timestamp in epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Text body, interactive reply id or media caption, whichever applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Every other provider field, untouched.
    pub raw: serde_json::Map<String, serde_json::Value>,
}

/// Messages extracted from one delivery, ready for a downstream handler.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageBatch {
    pub correlation_id: String,
    pub messages: Vec<NormalizedMessage>,
    pub contact_locales: ContactLocaleIndex,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_number: Option<String>,
}

impl MessageBatch {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Locale of a message's sender, if the provider sent contact metadata.
    pub fn locale_for(&self, message: &NormalizedMessage) -> Option<&str> {
        self.contact_locales.get(&message.from)
    }
}

/// A terminal HTTP answer produced by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl WebhookResponse {
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn json(status: StatusCode, body: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    /// Machine-readable error body; 429s carry `Retry-After` and rate-limit headers.
    pub fn from_error(error: &IngressError, correlation_id: &str) -> Self {
        let mut body = serde_json::json!({
            "error": error.code(),
            "correlationId": correlation_id,
        });
        let mut headers = Vec::new();

        if let Some(retry_after) = error.retry_after() {
            body["retryAfter"] = retry_after.into();
            headers.push(("Retry-After", retry_after.to_string()));
            headers.push(("X-RateLimit-Remaining", "0".to_string()));
        }
        if let IngressError::RateLimited { reset_at, .. } = error {
            headers.push(("X-RateLimit-Reset", reset_at.to_string()));
        }

        let mut response = Self::json(error.status(), &body);
        response.headers = headers;
        response
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// What the pipeline hands back to the hosting server.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Short-circuit: send this response and stop.
    Response(WebhookResponse),
    /// Messages for the downstream handler. May be empty.
    Messages(MessageBatch),
}

impl PipelineOutcome {
    pub fn into_response(self) -> Option<WebhookResponse> {
        match self {
            Self::Response(response) => Some(response),
            Self::Messages(_) => None,
        }
    }

    pub fn into_batch(self) -> Option<MessageBatch> {
        match self {
            Self::Messages(batch) => Some(batch),
            Self::Response(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthFailure;

    #[test]
    fn error_response_has_machine_readable_body() {
        let response =
            WebhookResponse::from_error(&IngressError::Authentication(AuthFailure::Invalid), "cid-1");
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["error"], "invalid_signature");
        assert_eq!(body["correlationId"], "cid-1");
        assert!(response.header("Retry-After").is_none());
    }

    #[test]
    fn rate_limited_response_carries_retry_headers() {
        let response = WebhookResponse::from_error(
            &IngressError::RateLimited {
                retry_after_secs: 42,
                reset_at: 1_700_000_060,
            },
            "cid",
        );
        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.header("retry-after"), Some("42"));
        assert_eq!(response.header("X-RateLimit-Reset"), Some("1700000060"));
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["retryAfter"], 42);
    }

    #[test]
    fn blacklisted_response_uses_fixed_penalty() {
        let response = WebhookResponse::from_error(&IngressError::Blacklisted, "cid");
        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.header("Retry-After"), Some("3600"));
        assert!(response.header("X-RateLimit-Reset").is_none());
    }

    #[test]
    fn message_serializes_type_field() {
        let message = NormalizedMessage {
            id: "wamid.1".into(),
            from: "250788000000".into(),
            kind: "text".into(),
            timestamp: Some(1_700_000_000),
            text: Some("hi".into()),
            raw: serde_json::Map::new(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["timestamp"], 1_700_000_000);
    }
}
