//! Session configuration
//!
//! [`SessionConfig`] carries the timeouts and client identity used by one
//! session. Build it with [`SessionConfig::builder`], which validates values.

use std::time::Duration;

use crate::backend::error::ConfigError;

/// Default timeout for the initialize round trip (30 seconds)
///
/// Backends that index on startup may answer `initialize` slowly.
pub const DEFAULT_INITIALIZATION_TIMEOUT_SECS: u64 = 30;

/// Default timeout for individual requests (10 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default time granted to the backend to close after `exit` (5 seconds)
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Maximum allowed initialization timeout (5 minutes)
pub const MAX_INITIALIZATION_TIMEOUT_SECS: u64 = 300;

/// Timeouts and identity for one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Bound on the initialize request
    pub initialization_timeout: Duration,

    /// Bound on every other request unless overridden per call
    pub request_timeout: Duration,

    /// Bound on the shutdown request and on waiting for the backend to close
    pub shutdown_timeout: Duration,

    /// Reported as `clientInfo.name` when the template does not set it
    pub client_name: String,

    /// Reported as `clientInfo.version` when the template does not set it
    pub client_version: String,

    /// Server capability keys the backend must advertise
    pub required_capabilities: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initialization_timeout: Duration::from_secs(DEFAULT_INITIALIZATION_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            required_capabilities: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder for [`SessionConfig`]
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    initialization_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    client_name: Option<String>,
    client_version: Option<String>,
    required_capabilities: Vec<String>,
}

impl SessionConfigBuilder {
    pub fn initialization_timeout(mut self, timeout: Duration) -> Self {
        self.initialization_timeout = Some(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    pub fn client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = Some(version.into());
        self
    }

    /// Add server capability keys that must be present in the initialize result
    pub fn required_capabilities(
        mut self,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.required_capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        let default = SessionConfig::default();
        let config = SessionConfig {
            initialization_timeout: self
                .initialization_timeout
                .unwrap_or(default.initialization_timeout),
            request_timeout: self.request_timeout.unwrap_or(default.request_timeout),
            shutdown_timeout: self.shutdown_timeout.unwrap_or(default.shutdown_timeout),
            client_name: self.client_name.unwrap_or(default.client_name),
            client_version: self.client_version.unwrap_or(default.client_version),
            required_capabilities: self.required_capabilities,
        };

        Self::validate_timeouts(&config)?;

        if config.client_name.trim().is_empty() {
            return Err(ConfigError::missing_field("client_name"));
        }
        if config
            .required_capabilities
            .iter()
            .any(|capability| capability.trim().is_empty())
        {
            return Err(ConfigError::missing_field("required_capabilities entry"));
        }

        Ok(config)
    }

    fn validate_timeouts(config: &SessionConfig) -> Result<(), ConfigError> {
        for (timeout, name) in [
            (config.initialization_timeout, "Initialization timeout"),
            (config.request_timeout, "Request timeout"),
            (config.shutdown_timeout, "Shutdown timeout"),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::invalid_timeout(
                    timeout,
                    format!("{name} must be greater than zero"),
                ));
            }
        }

        if config.initialization_timeout > Duration::from_secs(MAX_INITIALIZATION_TIMEOUT_SECS) {
            return Err(ConfigError::invalid_timeout(
                config.initialization_timeout,
                "Initialization timeout too long (max 5 minutes)",
            ));
        }

        Ok(())
    }
}
