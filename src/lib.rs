//! Webhook ingestion edge for the WhatsApp Cloud API.
//!
//! Authenticates deliveries, answers the subscription handshake, scopes
//! payloads to one owned phone number id, drops duplicate message ids and
//! rate limits senders before handing messages to a [`gateway::MessageHandler`].

pub mod config;
pub mod error;
pub mod gateway;
pub mod security;
pub mod telemetry;
pub mod util;
pub mod webhook;

pub use config::Config;
pub use error::IngressError;
pub use telemetry::{TelemetryEvent, TelemetrySink};
pub use webhook::{MessageBatch, NormalizedMessage, PipelineOutcome, WebhookPipeline};
