//! Participant roster: the authoritative local mirror of who is in the room.
//!
//! Keyed by `UserId` (at most one entry per user); the local user is never
//! present. Incremental updates (`apply_join`/`apply_leave`/
//! `apply_media_update`) keep the mirror current, and full snapshots are
//! reconciled by diffing so that missed deltas after a reconnect translate
//! into the same join/leave signals the live path produces. Applying the
//! same snapshot twice yields an empty diff.

use common::types::UserId;
use std::collections::HashMap;

use crate::signaling::protocol::ParticipantInfo;

/// Result of reconciling a snapshot against the current roster.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RosterDiff {
    /// Participants present in the snapshot but not in the roster.
    pub joined: Vec<ParticipantInfo>,
    /// Participants present in the roster but absent from the snapshot.
    pub left: Vec<ParticipantInfo>,
}

impl RosterDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

/// Partial media-state update; unspecified fields are unchanged.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MediaUpdate {
    pub mic: Option<bool>,
    pub cam: Option<bool>,
    pub screen_share: Option<bool>,
}

/// The roster.
#[derive(Debug)]
pub struct Roster {
    local_user_id: UserId,
    participants: HashMap<UserId, ParticipantInfo>,
}

impl Roster {
    #[must_use]
    pub fn new(local_user_id: UserId) -> Self {
        Self {
            local_user_id,
            participants: HashMap::new(),
        }
    }

    /// Replace all entries with `snapshot`, reporting who joined and who
    /// left relative to the previous contents. The local user is filtered
    /// out; duplicate user ids within one snapshot collapse to the last
    /// occurrence.
    pub fn apply_snapshot(&mut self, snapshot: Vec<ParticipantInfo>) -> RosterDiff {
        let mut next: HashMap<UserId, ParticipantInfo> = HashMap::new();
        for participant in snapshot {
            if participant.user_id == self.local_user_id {
                continue;
            }
            next.insert(participant.user_id, participant);
        }

        let mut diff = RosterDiff::default();
        for (user_id, participant) in &next {
            if !self.participants.contains_key(user_id) {
                diff.joined.push(participant.clone());
            }
        }
        for (user_id, participant) in &self.participants {
            if !next.contains_key(user_id) {
                diff.left.push(participant.clone());
            }
        }

        self.participants = next;
        diff
    }

    /// Insert or update a participant. Returns the previous entry when one
    /// existed (the caller checks for a changed connection id). The local
    /// user is never inserted.
    pub fn apply_join(&mut self, participant: ParticipantInfo) -> Option<ParticipantInfo> {
        if participant.user_id == self.local_user_id {
            return None;
        }
        self.participants
            .insert(participant.user_id, participant)
    }

    /// Remove a participant. No-op when absent.
    pub fn apply_leave(&mut self, user_id: UserId) -> Option<ParticipantInfo> {
        self.participants.remove(&user_id)
    }

    /// Apply a partial media update. Returns false when the user is unknown.
    pub fn apply_media_update(&mut self, user_id: UserId, update: MediaUpdate) -> bool {
        let Some(participant) = self.participants.get_mut(&user_id) else {
            return false;
        };
        if let Some(mic) = update.mic {
            participant.mic_enabled = mic;
        }
        if let Some(cam) = update.cam {
            participant.cam_enabled = cam;
        }
        if let Some(screen) = update.screen_share {
            participant.is_screen_sharing = screen;
        }
        true
    }

    /// Transactional copy for readers, ordered by username for stable
    /// presentation.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ParticipantInfo> {
        let mut entries: Vec<_> = self.participants.values().cloned().collect();
        entries.sort_by(|a, b| a.username.cmp(&b.username).then(a.user_id.0.cmp(&b.user_id.0)));
        entries
    }

    #[must_use]
    pub fn get(&self, user_id: UserId) -> Option<&ParticipantInfo> {
        self.participants.get(&user_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}
