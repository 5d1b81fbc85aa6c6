//! Meeting client error types.
//!
//! The taxonomy separates errors that are returned synchronously to the
//! caller of a join/leave/toggle operation from asynchronous post-join
//! failures, which are delivered over the session event channel and never
//! panic across the event loop boundary.

use thiserror::Error;

use crate::api::ApiError;
use crate::media::MediaError;
use crate::signaling::transport::TransportError;

/// Top-level error type for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Credentials were rejected. Fatal to the join attempt, never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// No admission decision arrived within the configured window.
    /// The caller decides whether to retry or abort.
    #[error("Admission decision timed out")]
    AdmissionTimeout,

    /// The host denied the join request. Terminal for this attempt.
    #[error("The host rejected the join request")]
    Rejected,

    /// An in-flight join attempt was cancelled by the caller.
    #[error("Join attempt cancelled")]
    Cancelled,

    /// Sending an offer/answer/candidate for one peer failed. The affected
    /// peer link is torn down; the session itself continues.
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// The transport dropped and reconnection attempts were exhausted.
    #[error("Connection to the meeting service lost: {0}")]
    TransportDropped(String),

    /// A roster snapshot disagreed with local connection state in a way that
    /// could not be reconciled.
    #[error("Roster inconsistency: {0}")]
    RosterInconsistency(String),

    /// The room-state REST service reported a failure.
    #[error("Room service error: {0}")]
    Api(String),

    /// The media engine reported a failure.
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// The signaling transport reported a failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Operation requires host privileges.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Operation is not valid in the current session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Internal error (actor mailbox unavailable and similar).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Whether a fresh join attempt is a reasonable reaction to this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::AdmissionTimeout
                | SessionError::TransportDropped(_)
                | SessionError::Api(_)
        )
    }

    /// Returns a user-facing message (no internal details).
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Auth(_) => "Your session has expired, please sign in again".to_string(),
            SessionError::AdmissionTimeout => {
                "The meeting did not respond in time, please try again".to_string()
            }
            SessionError::Rejected => "The host declined your request to join".to_string(),
            SessionError::Cancelled => "Join attempt cancelled".to_string(),
            SessionError::Signaling(_) => {
                "A connection to another participant failed".to_string()
            }
            SessionError::TransportDropped(_) => {
                "Connection to the meeting was lost".to_string()
            }
            SessionError::PermissionDenied(msg) | SessionError::InvalidState(msg) => msg.clone(),
            SessionError::RosterInconsistency(_)
            | SessionError::Api(_)
            | SessionError::Media(_)
            | SessionError::Transport(_)
            | SessionError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Auth(msg) => SessionError::Auth(msg),
            ApiError::Request(msg) => SessionError::Api(msg),
            ApiError::Http(msg) | ApiError::Decode(msg) => SessionError::Api(msg),
        }
    }
}
