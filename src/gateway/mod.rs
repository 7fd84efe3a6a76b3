//! Axum HTTP surface hosting the webhook pipeline.
//!
//! - `GET|POST /webhook`: handshake and deliveries (other methods: 405)
//! - `GET /health`: liveness plus rate limiter stats
//! - `GET /admin/rate-limit`, `DELETE /admin/rate-limit/{identifier}`:
//!   operator routes, mounted only when an admin token is configured
//!
//! Every response carries `X-Correlation-ID`.

pub mod handler;

pub use handler::{LoggingHandler, MessageHandler};

use crate::config::{Config, GatewayConfig};
use crate::error::IngressError;
use crate::security::constant_time_eq;
use crate::security::signature::signature_from_headers;
use crate::telemetry::{TelemetrySink, TracingSink};
use crate::util::mask_phone;
use crate::webhook::{
    InboundRequest, MessageBatch, PipelineOutcome, VerifyQuery, WebhookPipeline, WebhookResponse,
};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{any, delete, get},
    Router,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use uuid::Uuid;

/// Response header carrying the request's correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";
const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_CORRELATION_ID_LEN: usize = 128;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<WebhookPipeline>,
    pub handler: Arc<dyn MessageHandler>,
    /// SHA-256 of the admin bearer token; `None` disables `/admin/*`.
    pub admin_token_hash: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        pipeline: Arc<WebhookPipeline>,
        handler: Arc<dyn MessageHandler>,
        admin_token: Option<&str>,
    ) -> Self {
        let admin_token_hash = admin_token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| Arc::from(hash_token(token)));
        Self {
            pipeline,
            handler,
            admin_token_hash,
        }
    }
}

fn hash_token(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

/// Run the HTTP gateway until Ctrl-C, then stop pipeline maintenance.
pub async fn run_gateway(config: Config, handler: Arc<dyn MessageHandler>) -> Result<()> {
    config.validate()?;

    let host = config.gateway.host.as_str();
    let port = config.gateway.port;
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind {host}:{port}"))?;
    let local_addr = listener.local_addr()?;

    let sink: Arc<dyn TelemetrySink> = Arc::new(TracingSink);
    let pipeline = Arc::new(WebhookPipeline::from_config(&config, sink));
    pipeline.start_maintenance();

    let state = AppState::new(
        Arc::clone(&pipeline),
        handler,
        config.gateway.admin_token.as_deref(),
    );
    let admin_enabled = state.admin_token_hash.is_some();
    let app = build_router(state, &config.gateway);

    tracing::info!(
        addr = %local_addr,
        phone_number_id = %mask_phone(&config.whatsapp.phone_number_id),
        admin_enabled,
        "Webhook gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Gateway server error")?;

    pipeline.shutdown().await;
    tracing::info!("Webhook gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Build the router with body-size and timeout limits applied.
pub fn build_router(state: AppState, gateway: &GatewayConfig) -> Router {
    let mut router = Router::new()
        .route("/health", get(handle_health))
        .route("/webhook", any(handle_webhook));

    if state.admin_token_hash.is_some() {
        router = router
            .route("/admin/rate-limit", get(handle_admin_stats))
            .route(
                "/admin/rate-limit/{identifier}",
                delete(handle_admin_unblock),
            );
    }

    router
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(gateway.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(gateway.request_timeout_secs),
        ))
}

/// Correlation id from `X-Correlation-ID` or `X-Request-ID`, else a fresh UUID.
pub fn correlation_id(headers: &HeaderMap) -> String {
    [CORRELATION_HEADER, REQUEST_ID_HEADER]
        .into_iter()
        .find_map(|name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty() && v.len() <= MAX_CORRELATION_ID_LEN)
        })
        .map_or_else(|| Uuid::new_v4().to_string(), ToOwned::to_owned)
}

fn with_correlation(mut response: Response, correlation_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    response
}

impl IntoResponse for WebhookResponse {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            [(header::CONTENT_TYPE, self.content_type)],
            self.body,
        )
            .into_response();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health: always public
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "enabled": state.pipeline.is_enabled(),
        "rateLimiter": state.pipeline.rate_limiter().stats(),
    }))
}

/// ANY /webhook: handshake (GET) and deliveries (POST)
async fn handle_webhook(
    State(state): State<AppState>,
    method: Method,
    query: Result<Query<VerifyQuery>, axum::extract::rejection::QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let cid = correlation_id(&headers);
    let query = query.map(|Query(q)| q).unwrap_or_default();

    let outcome = state.pipeline.handle(&InboundRequest {
        method: &method,
        query: &query,
        signature: signature_from_headers(&headers),
        body: &body,
        correlation_id: &cid,
    });

    let response = match outcome {
        PipelineOutcome::Response(response) => response,
        PipelineOutcome::Messages(batch) => dispatch(&state, batch).await,
    };
    with_correlation(response.into_response(), &cid)
}

async fn dispatch(state: &AppState, batch: MessageBatch) -> WebhookResponse {
    let accepted = batch.messages.len();
    let ok = || {
        WebhookResponse::json(
            StatusCode::OK,
            &serde_json::json!({"status": "ok", "accepted": accepted}),
        )
    };
    if batch.is_empty() {
        return ok();
    }

    let cid = batch.correlation_id.clone();
    match state.handler.handle(batch).await {
        Ok(()) => ok(),
        Err(e) => {
            tracing::error!(
                correlation_id = %cid,
                handler = state.handler.name(),
                "Message handler failed: {e:#}"
            );
            WebhookResponse::from_error(&IngressError::Internal(e.to_string()), &cid)
        }
    }
}

/// Authenticate admin requests by checking the `Authorization: Bearer <token>` header
/// against the SHA-256-hashed admin token stored in state.
fn authenticate_admin(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(ref expected_hash) = state.admin_token_hash else {
        return false;
    };
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("");

    if token.is_empty() {
        return false;
    }
    constant_time_eq(&hash_token(token), expected_hash)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "unauthorized"})),
    )
        .into_response()
}

/// GET /admin/rate-limit: limiter stats
async fn handle_admin_stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authenticate_admin(&state, &headers) {
        return unauthorized();
    }
    Json(state.pipeline.rate_limiter().stats()).into_response()
}

/// DELETE /admin/rate-limit/{identifier}: clear blacklist and bucket state
async fn handle_admin_unblock(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authenticate_admin(&state, &headers) {
        return unauthorized();
    }

    let was_blacklisted = state.pipeline.rate_limiter().unblock(&identifier);
    tracing::info!(
        identifier = %mask_phone(&identifier),
        was_blacklisted,
        "Rate limit state cleared by operator"
    );
    Json(serde_json::json!({
        "identifier": identifier,
        "unblocked": true,
        "wasBlacklisted": was_blacklisted,
    }))
    .into_response()
}
