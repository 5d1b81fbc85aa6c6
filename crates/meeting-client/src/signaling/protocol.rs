//! Signaling wire vocabulary.
//!
//! Commands flow client -> service, events flow service -> client. Both are
//! internally tagged JSON (`{"type": "SendOffer", ...}`) so the service can
//! dispatch on the name without a second parse. Offer/answer/candidate
//! payloads stay opaque end to end.

use chrono::{DateTime, Utc};
use common::types::{ConnectionId, RoomId, UserId};
use serde::{Deserialize, Serialize};

use crate::media::{IceCandidate, SessionDescription};

/// One participant as carried on the wire and mirrored in the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub username: String,
    pub mic_enabled: bool,
    pub cam_enabled: bool,
    #[serde(default)]
    pub is_screen_sharing: bool,
}

/// Outbound commands accepted by the signaling service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "PascalCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientCommand {
    JoinRoom {
        room_id: RoomId,
        mic_enabled: bool,
        cam_enabled: bool,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    SendOffer {
        to_connection_id: ConnectionId,
        offer: SessionDescription,
    },
    SendAnswer {
        to_connection_id: ConnectionId,
        answer: SessionDescription,
    },
    SendIceCandidate {
        to_connection_id: ConnectionId,
        candidate: IceCandidate,
    },
    ToggleCamera {
        enabled: bool,
    },
    ToggleMicrophone {
        enabled: bool,
    },
    ToggleScreenShare {
        enabled: bool,
    },
    AdmitUser {
        connection_id: ConnectionId,
    },
    RejectUser {
        connection_id: ConnectionId,
    },
    SendChatMessage {
        content: String,
    },
}

/// Inbound events delivered by the signaling service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "PascalCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Admission snapshot: everyone already in the room, local user excluded.
    ExistingParticipants {
        participants: Vec<ParticipantInfo>,
    },
    UserJoined {
        participant: ParticipantInfo,
    },
    UserLeft {
        user_id: UserId,
        connection_id: ConnectionId,
    },
    ReceiveOffer {
        from_connection_id: ConnectionId,
        from_user_id: UserId,
        from_username: String,
        offer: SessionDescription,
    },
    ReceiveAnswer {
        from_connection_id: ConnectionId,
        from_user_id: UserId,
        from_username: String,
        answer: SessionDescription,
    },
    ReceiveIceCandidate {
        from_connection_id: ConnectionId,
        candidate: IceCandidate,
    },
    CameraToggled {
        user_id: UserId,
        enabled: bool,
    },
    MicrophoneToggled {
        user_id: UserId,
        enabled: bool,
    },
    ScreenShareToggled {
        user_id: UserId,
        username: String,
        enabled: bool,
    },
    /// The room has a waiting room; the host must admit this client.
    YouAreWaiting,
    /// Host-side: a guest is waiting for an admission decision.
    GuestRequested {
        connection_id: ConnectionId,
        user_id: UserId,
        display_name: String,
    },
    /// The host declined this client's join request.
    YouAreRejected,
    MeetingEnded {
        reason: String,
    },
    ReceiveChatMessage {
        user_id: UserId,
        username: String,
        content: String,
        sent_at: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}
