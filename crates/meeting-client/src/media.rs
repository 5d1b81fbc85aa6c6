//! External media engine boundary.
//!
//! The session core never inspects SDP or ICE payloads and never touches
//! codecs or transport internals; all of that is delegated to an injected
//! engine implementing [`MediaEngine`]. The core treats session descriptions
//! and candidates as opaque JSON values it forwards between the engine and
//! the signaling transport.
//!
//! Engines report locally gathered candidates and connection state changes
//! by pushing [`PeerEvent`]s into the channel handed to
//! [`MediaEngine::create_connection`]; the session processes them on its
//! serialized event loop.

use async_trait::async_trait;
use common::types::ConnectionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque session description payload (offer or answer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionDescription(pub serde_json::Value);

/// Opaque ICE candidate payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IceCandidate(pub serde_json::Value);

/// Kind of an outgoing media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Result of asking the engine for a track of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackAcquisition {
    /// The track already existed; enabling it is enough.
    AlreadyAvailable,
    /// A new device was opened; the track must be pushed onto every open
    /// peer connection via [`PeerConnection::replace_outgoing_track`].
    Acquired,
}

/// Peer connection lifecycle states, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    /// Terminal failure; the session removes the link and does not retry.
    Failed,
    /// The transport closed; the session removes the link.
    Closed,
}

/// Asynchronous notifications from the engine to the session.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A locally gathered candidate that must be forwarded to the remote
    /// side over the signaling transport.
    IceCandidate {
        connection_id: ConnectionId,
        candidate: IceCandidate,
    },
    /// The underlying connection changed state.
    StateChanged {
        connection_id: ConnectionId,
        state: PeerState,
    },
}

/// Errors reported by the media engine.
#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("media engine error: {0}")]
    Engine(String),

    #[error("media device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("invalid media state: {0}")]
    InvalidState(String),
}

/// The injected media engine.
///
/// The engine owns the local capture tracks (microphone, camera, composited
/// screen share) and the native peer connection objects. Mute and unmute
/// only flip the enabled flag on an existing track; they never renegotiate.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a native peer connection for `remote`.
    ///
    /// `events` receives candidates and state changes for this connection.
    async fn create_connection(
        &self,
        remote: ConnectionId,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Box<dyn PeerConnection>, MediaError>;

    /// Flip the enabled flag on the local track of `kind`.
    ///
    /// No-op if the track does not exist yet.
    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<(), MediaError>;

    /// Ensure a local track of `kind` exists, opening the device on first use.
    async fn acquire_track(&self, kind: TrackKind) -> Result<TrackAcquisition, MediaError>;

    /// Swap the outgoing video source to the composited screen+camera track.
    async fn start_screen_capture(&self) -> Result<(), MediaError>;

    /// Revert the outgoing video source to the plain camera track.
    async fn stop_screen_capture(&self) -> Result<(), MediaError>;
}

/// One native peer connection.
///
/// Implementations set the local description as part of `create_offer` /
/// `create_answer`, so the session only shuttles the opaque payloads.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach all currently available local tracks.
    ///
    /// Must be called before `create_offer`; attaching tracks afterwards
    /// would require renegotiation.
    async fn attach_local_tracks(&mut self) -> Result<(), MediaError>;

    /// Generate and store the local offer.
    async fn create_offer(&mut self) -> Result<SessionDescription, MediaError>;

    /// Generate and store the local answer for a previously applied offer.
    async fn create_answer(&mut self) -> Result<SessionDescription, MediaError>;

    /// Apply the remote description (offer or answer).
    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;

    /// Apply a remote ICE candidate. Only valid once a remote description
    /// has been applied; the session buffers earlier candidates.
    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), MediaError>;

    /// Swap the outgoing track of `kind` to the engine's current source
    /// without restarting ICE/SDP negotiation.
    async fn replace_outgoing_track(&mut self, kind: TrackKind) -> Result<(), MediaError>;

    /// Close the connection and release its resources.
    async fn close(&mut self);
}
