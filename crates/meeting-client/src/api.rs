//! Room-state REST boundary.
//!
//! The meeting client consumes a small REST surface for room lifecycle and
//! the authoritative participant snapshot used by post-reconnect resync.
//! The surface is modeled as the [`RoomApi`] trait so tests can substitute
//! a mock; [`HttpRoomApi`] is the production implementation.

use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::RoomId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::signaling::protocol::ParticipantInfo;

/// Errors from the room-state service.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Credentials were rejected (401/403).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The service processed the request but declined it.
    #[error("request declined: {0}")]
    Request(String),

    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(String),

    /// The response body did not match the expected shape.
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Standard response envelope used by the room-state service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the envelope into its payload, mapping unsuccessful responses
    /// to [`ApiError::Request`].
    pub fn into_data(self) -> Result<T, ApiError> {
        self.into_unit()?;
        self.data
            .ok_or_else(|| ApiError::Decode("missing data in successful response".to_string()))
    }

    /// Check only the success flag; some endpoints carry no payload.
    pub fn into_unit(&self) -> Result<(), ApiError> {
        if self.success {
            Ok(())
        } else {
            Err(ApiError::Request(
                self.message
                    .clone()
                    .unwrap_or_else(|| "request declined".to_string()),
            ))
        }
    }
}

/// Role assigned to the local participant when joining a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Host,
    Guest,
}

/// Room identity as returned by the room-state service.
///
/// Immutable once joined; replaced wholesale on leave/rejoin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: RoomId,
    pub room_key: String,
    pub room_name: String,
    pub join_url: String,
}

/// Payload returned by the join endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomData {
    pub room: RoomInfo,
    pub role: ParticipantRole,
    /// Whether the room's waiting room will hold this participant.
    pub is_waiting: bool,
}

/// Request body for creating a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub room_name: String,
    pub max_participants: u32,
}

/// REST operations consumed from the room-state service.
#[async_trait]
pub trait RoomApi: Send + Sync {
    /// Create a new room owned by the local user.
    async fn create_room(&self, request: CreateRoomRequest) -> Result<RoomInfo, ApiError>;

    /// Register the local user as a participant of `room_id`.
    async fn join_room_by_id(&self, room_id: RoomId) -> Result<JoinRoomData, ApiError>;

    /// Register the local user as a participant of the room with `room_key`.
    async fn join_room_by_key(&self, room_key: &str) -> Result<JoinRoomData, ApiError>;

    /// Remove the local user from `room_id`.
    async fn leave_room(&self, room_id: RoomId) -> Result<(), ApiError>;

    /// Fetch the authoritative participant snapshot for `room_id`.
    async fn get_participants(&self, room_id: RoomId) -> Result<Vec<ParticipantInfo>, ApiError>;
}

/// `reqwest`-backed [`RoomApi`] implementation.
pub struct HttpRoomApi {
    client: reqwest::Client,
    base_url: String,
    access_token: SecretString,
}

impl HttpRoomApi {
    /// Create a client against `base_url`, authenticating with `access_token`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, access_token: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<ApiEnvelope<T>, ApiError> {
        let response = request
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        let status = response.status();
        debug!(target: "session.api", status = %status, "room service response");

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ApiError::Auth(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(ApiError::Http(format!("status {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RoomApi for HttpRoomApi {
    async fn create_room(&self, request: CreateRoomRequest) -> Result<RoomInfo, ApiError> {
        self.execute(self.client.post(self.url("rooms")).json(&request))
            .await?
            .into_data()
    }

    async fn join_room_by_id(&self, room_id: RoomId) -> Result<JoinRoomData, ApiError> {
        self.execute(self.client.post(self.url(&format!("rooms/{room_id}/join"))))
            .await?
            .into_data()
    }

    async fn join_room_by_key(&self, room_key: &str) -> Result<JoinRoomData, ApiError> {
        self.execute(
            self.client
                .post(self.url("rooms/join-by-key"))
                .json(&serde_json::json!({ "roomKey": room_key })),
        )
        .await?
        .into_data()
    }

    async fn leave_room(&self, room_id: RoomId) -> Result<(), ApiError> {
        // The leave endpoint carries no payload on success.
        self.execute::<serde_json::Value>(
            self.client.post(self.url(&format!("rooms/{room_id}/leave"))),
        )
        .await?
        .into_unit()
    }

    async fn get_participants(&self, room_id: RoomId) -> Result<Vec<ParticipantInfo>, ApiError> {
        self.execute(
            self.client
                .get(self.url(&format!("rooms/{room_id}/participants"))),
        )
        .await?
        .into_data()
    }
}
