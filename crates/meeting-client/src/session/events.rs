//! Notifications delivered to the embedding (UI) layer.
//!
//! Post-join asynchronous errors arrive here as [`SessionEvent::Error`];
//! they never cross the event loop boundary as panics, and join-time errors
//! are returned synchronously from the handle instead.

use chrono::{DateTime, Utc};
use common::types::UserId;

use crate::session::admission::PendingGuest;
use crate::signaling::protocol::ParticipantInfo;

/// A chat message relayed through the meeting.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub user_id: UserId,
    pub username: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Events pushed to the embedding layer over the session event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The roster changed; carries a transactional snapshot.
    RosterChanged(Vec<ParticipantInfo>),
    /// A participant joined.
    UserJoined(ParticipantInfo),
    /// A participant left.
    UserLeft { user_id: UserId },
    /// A waiting join attempt was admitted by the host.
    Admitted { roster: Vec<ParticipantInfo> },
    /// The join attempt is being held in the waiting room.
    Waiting,
    /// The host rejected the local user while they were waiting.
    RejectedByHost,
    /// Host side: a guest asked to join.
    GuestRequested(PendingGuest),
    /// The meeting was ended for everyone.
    MeetingEnded { reason: String },
    /// A chat message arrived.
    Chat(ChatMessage),
    /// A recoverable asynchronous failure (per-peer signaling errors,
    /// exhausted reconnects, service-reported errors).
    Error { message: String },
}
