//! Service configuration, read from flags or the environment.

use crate::domain::addressing::is_valid_prefix;
use crate::domain::ports::ReceiverSecret;
use crate::error::{Result, ServiceError};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use clap::Args;
use rand::RngCore;
use std::time::Duration;
use tracing::warn;

pub const SECRET_LEN: usize = 32;
pub const DEFAULT_LISTENER_WINDOW_SECS: u64 = 60;
/// One day.
pub const MAX_LISTENER_WINDOW_SECS: u64 = 86_400;

#[derive(Args, Debug, Clone)]
pub struct ServiceConfig {
    /// Receiver secret, base64 or base64url encoded. A random one is generated if absent.
    #[arg(long, env = "ILP_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// ILP address prefix of the ledger, e.g. `example.red.`
    #[arg(long, env = "ILP_PREFIX")]
    pub ilp_prefix: Option<String>,

    /// Base URL of the backend receiving payment notifications.
    #[arg(long, env = "ILP_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Account URI of the connector whose incoming transfers are settled upstream.
    #[arg(long, env = "ILP_CONNECTOR")]
    pub connector: Option<String>,

    /// Default lifetime of a cached listener.
    #[arg(long, env = "ILP_LISTENER_WINDOW_SECS", default_value_t = DEFAULT_LISTENER_WINDOW_SECS)]
    pub listener_window_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            secret: None,
            ilp_prefix: None,
            backend_url: None,
            connector: None,
            listener_window_secs: DEFAULT_LISTENER_WINDOW_SECS,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        let prefix = self
            .ilp_prefix
            .as_deref()
            .ok_or_else(|| ServiceError::Config("ILP_PREFIX must be set".to_string()))?;
        if !is_valid_prefix(prefix) {
            return Err(ServiceError::Config(format!(
                "ILP_PREFIX ({prefix}) is not a valid ILP prefix"
            )));
        }

        let backend_url = self
            .backend_url
            .as_deref()
            .ok_or_else(|| ServiceError::Config("ILP_BACKEND_URL must be set".to_string()))?;
        if !(backend_url.starts_with("http://") || backend_url.starts_with("https://")) {
            return Err(ServiceError::Config(format!(
                "ILP_BACKEND_URL ({backend_url}) must be an http(s) URL"
            )));
        }

        if self.connector.as_deref() == Some("") {
            return Err(ServiceError::Config("ILP_CONNECTOR must not be empty".to_string()));
        }
        if self.listener_window_secs == 0 || self.listener_window_secs > MAX_LISTENER_WINDOW_SECS {
            return Err(ServiceError::Config(format!(
                "ILP_LISTENER_WINDOW_SECS must be between 1 and {MAX_LISTENER_WINDOW_SECS}"
            )));
        }
        if let Some(secret) = &self.secret {
            decode_secret(secret)?;
        }
        Ok(())
    }

    pub fn prefix(&self) -> Result<&str> {
        self.ilp_prefix
            .as_deref()
            .ok_or_else(|| ServiceError::Config("ILP_PREFIX must be set".to_string()))
    }

    pub fn backend_url(&self) -> Result<&str> {
        self.backend_url
            .as_deref()
            .ok_or_else(|| ServiceError::Config("ILP_BACKEND_URL must be set".to_string()))
    }

    pub fn listener_window(&self) -> Duration {
        Duration::from_secs(self.listener_window_secs)
    }

    /// Decodes the configured secret, or generates one.
    ///
    /// A generated secret lives only as long as the process: requests issued before a
    /// restart can no longer be fulfilled.
    pub fn receiver_secret(&self) -> Result<ReceiverSecret> {
        match &self.secret {
            Some(secret) => decode_secret(secret),
            None => {
                warn!("ILP_SECRET not set, generating a random receiver secret");
                let mut bytes = vec![0u8; SECRET_LEN];
                rand::thread_rng().fill_bytes(&mut bytes);
                Ok(ReceiverSecret::new(bytes))
            }
        }
    }
}

fn decode_secret(raw: &str) -> Result<ReceiverSecret> {
    let trimmed = raw.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD.decode(raw))
        .map_err(|_| ServiceError::Config("ILP_SECRET must be base64 encoded".to_string()))?;
    if bytes.len() != SECRET_LEN {
        return Err(ServiceError::Config(format!(
            "ILP_SECRET must decode to {SECRET_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(ReceiverSecret::new(bytes))
}
