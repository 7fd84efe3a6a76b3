//! Structured telemetry emitted by the webhook pipeline.
//!
//! Events are handed to an injected [`TelemetrySink`]. Delivery is synchronous:
//! a sink receives each event on the request path and must not block.

pub mod sink;

pub use sink::{RecordingSink, TelemetrySink, TracingSink};

use serde::Serialize;

/// Signature outcome reported with [`TelemetryEvent::SignatureRejected`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignatureRejection {
    Missing,
    Invalid,
}

/// A single telemetry event recorded by the pipeline.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    SignatureVerified {
        correlation_id: String,
    },
    SignatureRejected {
        correlation_id: String,
        reason: SignatureRejection,
    },
    /// Signature check skipped because unsigned deliveries are allowed.
    SignatureBypassed {
        correlation_id: String,
    },
    HandshakeVerified {
        correlation_id: String,
    },
    HandshakeRejected {
        correlation_id: String,
    },
    ChallengeCacheHit {
        correlation_id: String,
        status: u16,
    },
    DuplicateMessagesIgnored {
        correlation_id: String,
        duplicates: usize,
        total: usize,
    },
    MalformedMessagesDropped {
        correlation_id: String,
        dropped: usize,
    },
    RateLimitExceeded {
        correlation_id: String,
        identifier: String,
        violations: u32,
        retry_after_secs: u64,
    },
    BlacklistAdded {
        correlation_id: String,
        identifier: String,
        violations: u32,
    },
    BlacklistedRejection {
        correlation_id: String,
        identifier: String,
    },
    Unblocked {
        identifier: String,
        was_blacklisted: bool,
    },
    BucketCleanup {
        removed: usize,
        remaining: usize,
    },
    PipelineFailure {
        correlation_id: String,
        stage: &'static str,
        detail: String,
    },
}

impl TelemetryEvent {
    /// Stable event name, matching the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SignatureVerified { .. } => "signature_verified",
            Self::SignatureRejected { .. } => "signature_rejected",
            Self::SignatureBypassed { .. } => "signature_bypassed",
            Self::HandshakeVerified { .. } => "handshake_verified",
            Self::HandshakeRejected { .. } => "handshake_rejected",
            Self::ChallengeCacheHit { .. } => "challenge_cache_hit",
            Self::DuplicateMessagesIgnored { .. } => "duplicate_messages_ignored",
            Self::MalformedMessagesDropped { .. } => "malformed_messages_dropped",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::BlacklistAdded { .. } => "blacklist_added",
            Self::BlacklistedRejection { .. } => "blacklisted_rejection",
            Self::Unblocked { .. } => "unblocked",
            Self::BucketCleanup { .. } => "bucket_cleanup",
            Self::PipelineFailure { .. } => "pipeline_failure",
        }
    }

    /// Whether the event reports something an operator should look at.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::SignatureRejected { .. }
                | Self::SignatureBypassed { .. }
                | Self::HandshakeRejected { .. }
                | Self::RateLimitExceeded { .. }
                | Self::BlacklistAdded { .. }
                | Self::BlacklistedRejection { .. }
                | Self::PipelineFailure { .. }
        )
    }
}
