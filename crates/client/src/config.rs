//! Client connection settings.

use std::time::Duration;

use protocol::{Endpoint, ResponseMode, READ_ONLY_SUFFIX};
use url::Url;

use crate::error::{ClientError, Result};

/// Default time to wait for the ready marker.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how a bridge connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Daemon base URL, e.g. `ws://127.0.0.1:8080`.
    pub base_url: String,
    /// Session context; empty selects the default session.
    pub context: String,
    /// Frame representation requested for output.
    pub response_mode: ResponseMode,
    /// Connect to the read-only command endpoint.
    pub read_only: bool,
    /// How long `connect` waits for the ready marker.
    pub ready_timeout: Duration,
}

impl ClientConfig {
    /// Creates a configuration for the default context in binary mode.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            context: String::new(),
            response_mode: ResponseMode::Binary,
            read_only: false,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    /// Sets the session context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Sets the response mode.
    pub fn with_response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }

    /// Selects the read-only command endpoint.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets the ready timeout.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Checks the configuration and returns the parsed base URL.
    pub fn validate(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::InvalidConfig(format!("base URL {}: {}", self.base_url, e)))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidConfig(format!(
                "base URL must use ws or wss, got {}",
                url.scheme()
            )));
        }
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(ClientError::InvalidConfig(format!(
                "base URL has no host: {}",
                self.base_url
            )));
        }
        if self.context.contains('/') || self.context == READ_ONLY_SUFFIX {
            return Err(ClientError::InvalidConfig(format!(
                "context cannot be used in a path: {:?}",
                self.context
            )));
        }
        if self.ready_timeout.is_zero() {
            return Err(ClientError::InvalidConfig(
                "ready timeout must be positive".to_string(),
            ));
        }

        Ok(url)
    }

    /// URL of the command endpoint.
    pub fn command_url(&self) -> Result<Url> {
        self.endpoint_url(&Endpoint::Command {
            context: self.context.clone(),
            mode: self.response_mode,
            read_only: self.read_only,
        })
    }

    /// URL of the status endpoint.
    pub fn status_url(&self) -> Result<Url> {
        self.endpoint_url(&Endpoint::Status {
            context: self.context.clone(),
        })
    }

    fn endpoint_url(&self, endpoint: &Endpoint) -> Result<Url> {
        let mut url = self.validate()?;
        url.set_path(&endpoint.path());
        url.set_query(None);
        Ok(url)
    }
}
