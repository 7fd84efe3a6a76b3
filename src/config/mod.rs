pub mod schema;

pub use schema::{Config, GatewayConfig, HandshakeConfig, WhatsAppConfig};

use crate::security::rate_limiter::MAX_WINDOW_MS;
use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Environment variable overriding `whatsapp.phone_number_id`.
pub const ENV_PHONE_NUMBER_ID: &str = "WA_EDGE_PHONE_NUMBER_ID";
/// Environment variable overriding `whatsapp.verify_token`.
pub const ENV_VERIFY_TOKEN: &str = "WA_EDGE_VERIFY_TOKEN";
/// Environment variable overriding `whatsapp.app_secret`.
pub const ENV_APP_SECRET: &str = "WA_EDGE_APP_SECRET";

/// Platform config file location, e.g. `~/.config/wa-edge/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "wa-edge").map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Config {
    /// Load config from `path`, or from the platform location when `None`.
    ///
    /// An explicit path must exist. A missing default file yields defaults.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                Some(path) => {
                    tracing::debug!(path = %path.display(), "No config file, using defaults");
                    Self {
                        config_path: path,
                        ..Self::default()
                    }
                }
                None => Self::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|key| std::env::var(key).ok());
    }

    /// Priority: environment variable > config file. Blank values are ignored.
    pub fn apply_env_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(id) = read(ENV_PHONE_NUMBER_ID) {
            self.whatsapp.phone_number_id = id;
        }
        if let Some(token) = read(ENV_VERIFY_TOKEN) {
            self.whatsapp.verify_token = token;
        }
        if let Some(secret) = read(ENV_APP_SECRET) {
            self.whatsapp.app_secret = Some(secret);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let wa = &self.whatsapp;
        if wa.phone_number_id.trim().is_empty() {
            bail!("whatsapp.phone_number_id is required");
        }
        if wa.verify_token.trim().is_empty() {
            bail!("whatsapp.verify_token is required");
        }
        let has_secret = wa
            .app_secret
            .as_deref()
            .is_some_and(|secret| !secret.trim().is_empty());
        if !has_secret && !wa.allow_unsigned {
            bail!("whatsapp.app_secret is required unless whatsapp.allow_unsigned = true");
        }

        let limits = &self.rate_limit;
        if limits.window_ms == 0 || limits.max_requests == 0 || limits.blacklist_threshold == 0 {
            bail!("rate_limit values must be greater than zero");
        }
        if limits.window_ms > MAX_WINDOW_MS {
            bail!("rate_limit.window_ms must not exceed {MAX_WINDOW_MS} (one day)");
        }
        if self.gateway.max_body_bytes == 0 {
            bail!("gateway.max_body_bytes must be greater than zero");
        }
        Ok(())
    }
}
