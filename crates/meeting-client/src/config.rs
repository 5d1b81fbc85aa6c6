//! Meeting client configuration.
//!
//! Configuration is loaded from environment variables. The access token is
//! redacted in Debug output.

use common::secret::SecretString;
use common::types::UserId;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default admission decision window in seconds.
pub const DEFAULT_ADMISSION_TIMEOUT_SECONDS: u64 = 5;

/// Default reconnect backoff base delay in milliseconds.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 500;

/// Default reconnect backoff ceiling in milliseconds.
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 15_000;

/// Default number of redial attempts before the drop is surfaced.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Default session command mailbox size.
pub const DEFAULT_COMMAND_BUFFER: usize = 64;

/// Default UI event channel size.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Meeting client configuration.
///
/// Loaded from environment variables with sensible defaults.
/// The access token is redacted in Debug output.
#[derive(Clone)]
pub struct SessionConfig {
    /// Base URL of the room-state REST service.
    pub api_base_url: String,

    /// WebSocket URL of the signaling service.
    pub signaling_url: String,

    /// Bearer token presented to both services.
    /// Protected by `SecretString` to prevent accidental logging.
    pub access_token: SecretString,

    /// Identity of the local user, as issued by the auth layer.
    pub local_user_id: UserId,

    /// Display name announced to other participants.
    pub display_name: String,

    /// How long a join attempt waits for an admission decision.
    pub admission_timeout: Duration,

    /// Reconnect backoff base delay.
    pub reconnect_base_delay: Duration,

    /// Reconnect backoff ceiling.
    pub reconnect_max_delay: Duration,

    /// Redial attempts before an unexpected drop is surfaced as fatal.
    pub max_reconnect_attempts: u32,

    /// Session command mailbox size.
    pub command_buffer: usize,

    /// UI event channel size.
    pub event_buffer: usize,
}

/// Custom Debug implementation that redacts the access token.
impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("api_base_url", &self.api_base_url)
            .field("signaling_url", &self.signaling_url)
            .field("access_token", &"[REDACTED]")
            .field("local_user_id", &self.local_user_id)
            .field("display_name", &self.display_name)
            .field("admission_timeout", &self.admission_timeout)
            .field("reconnect_base_delay", &self.reconnect_base_delay)
            .field("reconnect_max_delay", &self.reconnect_max_delay)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("command_buffer", &self.command_buffer)
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl SessionConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let api_base_url = vars
            .get("MEETING_API_BASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("MEETING_API_BASE_URL".to_string()))?
            .clone();

        let signaling_url = vars
            .get("MEETING_SIGNALING_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("MEETING_SIGNALING_URL".to_string()))?
            .clone();

        let access_token = SecretString::from(
            vars.get("MEETING_ACCESS_TOKEN")
                .ok_or_else(|| ConfigError::MissingEnvVar("MEETING_ACCESS_TOKEN".to_string()))?
                .clone(),
        );

        let local_user_id = vars
            .get("MEETING_USER_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("MEETING_USER_ID".to_string()))?
            .parse()
            .map(UserId)
            .map_err(|e| ConfigError::InvalidValue(format!("MEETING_USER_ID: {e}")))?;

        let display_name = vars
            .get("MEETING_DISPLAY_NAME")
            .cloned()
            .unwrap_or_else(|| "Guest".to_string());

        let admission_timeout = vars
            .get("MEETING_ADMISSION_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .map_or(
                Duration::from_secs(DEFAULT_ADMISSION_TIMEOUT_SECONDS),
                Duration::from_secs,
            );

        let reconnect_base_delay = vars
            .get("MEETING_RECONNECT_BASE_DELAY_MS")
            .and_then(|s| s.parse().ok())
            .map_or(
                Duration::from_millis(DEFAULT_RECONNECT_BASE_DELAY_MS),
                Duration::from_millis,
            );

        let reconnect_max_delay = vars
            .get("MEETING_RECONNECT_MAX_DELAY_MS")
            .and_then(|s| s.parse().ok())
            .map_or(
                Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY_MS),
                Duration::from_millis,
            );

        let max_reconnect_attempts = vars
            .get("MEETING_MAX_RECONNECT_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS);

        Ok(SessionConfig {
            api_base_url,
            signaling_url,
            access_token,
            local_user_id,
            display_name,
            admission_timeout,
            reconnect_base_delay,
            reconnect_max_delay,
            max_reconnect_attempts,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
        })
    }
}
