use crate::security::RateLimitConfig;
use crate::webhook::handshake::{DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL_SECS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Where this config was read from; not part of the file.
    #[serde(skip)]
    pub config_path: PathBuf,

    pub whatsapp: WhatsAppConfig,
    pub rate_limit: RateLimitConfig,
    pub handshake: HandshakeConfig,
    pub gateway: GatewayConfig,
}

/// WhatsApp Cloud API webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Own endpoint identifier; changes for any other id are dropped.
    pub phone_number_id: String,
    /// Token the provider echoes during the handshake.
    pub verify_token: String,
    /// App secret for `X-Hub-Signature-256` verification.
    pub app_secret: Option<String>,
    /// Accept deliveries without a signature. Testing only.
    pub allow_unsigned: bool,
    /// When false every webhook call answers 503.
    pub enabled: bool,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            phone_number_id: String::new(),
            verify_token: String::new(),
            app_secret: None,
            allow_unsigned: false,
            enabled: true,
        }
    }
}

/// Handshake response cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HandshakeConfig {
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Request body cap in bytes.
    pub max_body_bytes: usize,
    pub request_timeout_secs: u64,
    /// Bearer token for `/admin/*`. Operator routes are off when unset.
    pub admin_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            max_body_bytes: 1_048_576,
            request_timeout_secs: 10,
            admin_token: None,
        }
    }
}
