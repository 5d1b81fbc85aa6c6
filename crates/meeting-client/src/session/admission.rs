//! Admission control.
//!
//! Guest side: one [`AdmissionState`] machine per join attempt. The attempt
//! races three one-shot outcomes (admitted snapshot, waiting, rejected)
//! against a deadline owned by the coordinator; this module only validates
//! the transition table.
//!
//! Host side: [`HostAdmissionQueue`] mirrors the guests currently waiting
//! for a decision. Admit and reject remove the entry optimistically before
//! the service confirms; the authoritative admission still happens on the
//! guest's own state machine when the resulting signal arrives, so either
//! ordering is safe.

use common::types::{ConnectionId, UserId};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Guest-side admission state for one join attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionState {
    /// Join issued, no decision yet.
    Requesting,
    /// The room's waiting room is holding this client.
    Waiting,
    /// Snapshot received; the client is in the room.
    Admitted,
    /// The host declined. Terminal for this attempt.
    Rejected,
}

impl AdmissionState {
    /// Snapshot received. Legal from `Requesting` (direct admission) and
    /// `Waiting` (the host admitted us; the service re-runs the join flow
    /// and sends a fresh snapshot).
    #[must_use]
    pub fn on_snapshot(self) -> Self {
        match self {
            AdmissionState::Requesting | AdmissionState::Waiting => AdmissionState::Admitted,
            other => {
                warn!(
                    target: "session.admission",
                    state = ?other,
                    "ignoring snapshot in terminal admission state"
                );
                other
            }
        }
    }

    /// Waiting-room signal. Legal only from `Requesting`.
    #[must_use]
    pub fn on_waiting(self) -> Self {
        match self {
            AdmissionState::Requesting => AdmissionState::Waiting,
            other => {
                warn!(
                    target: "session.admission",
                    state = ?other,
                    "ignoring waiting signal"
                );
                other
            }
        }
    }

    /// Rejection signal. Legal from `Requesting` and `Waiting`.
    #[must_use]
    pub fn on_rejected(self) -> Self {
        match self {
            AdmissionState::Requesting | AdmissionState::Waiting => AdmissionState::Rejected,
            other => {
                warn!(
                    target: "session.admission",
                    state = ?other,
                    "ignoring rejection signal"
                );
                other
            }
        }
    }

    /// Whether this state still awaits a decision.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, AdmissionState::Requesting | AdmissionState::Waiting)
    }
}

/// A guest awaiting the host's admission decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingGuest {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub display_name: String,
}

/// Host-side queue of guests waiting for admission.
///
/// Exists only while the local user is host; entries leave on admit, reject,
/// or guest disconnect.
#[derive(Debug, Default)]
pub struct HostAdmissionQueue {
    pending: Vec<PendingGuest>,
}

impl HostAdmissionQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a guest request. Idempotent: a duplicate connection id is
    /// ignored. Returns whether the entry was added.
    pub fn add(&mut self, guest: PendingGuest) -> bool {
        if self
            .pending
            .iter()
            .any(|g| g.connection_id == guest.connection_id)
        {
            return false;
        }
        self.pending.push(guest);
        true
    }

    /// Remove a guest by connection id (admit, reject, or disconnect).
    /// Returns the removed entry, if any.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<PendingGuest> {
        let index = self
            .pending
            .iter()
            .position(|g| &g.connection_id == connection_id)?;
        Some(self.pending.remove(index))
    }

    /// Guests currently waiting, in arrival order.
    #[must_use]
    pub fn list(&self) -> Vec<PendingGuest> {
        self.pending.clone()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_admission() {
        let state = AdmissionState::Requesting.on_snapshot();
        assert_eq!(state, AdmissionState::Admitted);
        assert!(!state.is_pending());
    }

    #[test]
    fn test_waiting_then_admitted() {
        let state = AdmissionState::Requesting.on_waiting();
        assert_eq!(state, AdmissionState::Waiting);
        assert!(state.is_pending());

        let state = state.on_snapshot();
        assert_eq!(state, AdmissionState::Admitted);
    }

    #[test]
    fn test_rejection_from_both_pending_states() {
        assert_eq!(
            AdmissionState::Requesting.on_rejected(),
            AdmissionState::Rejected
        );
        assert_eq!(
            AdmissionState::Waiting.on_rejected(),
            AdmissionState::Rejected
        );
    }

    #[test]
    fn test_terminal_states_ignore_further_signals() {
        assert_eq!(
            AdmissionState::Admitted.on_rejected(),
            AdmissionState::Admitted
        );
        assert_eq!(
            AdmissionState::Rejected.on_snapshot(),
            AdmissionState::Rejected
        );
        assert_eq!(
            AdmissionState::Admitted.on_waiting(),
            AdmissionState::Admitted
        );
    }

    fn guest(conn: &str) -> PendingGuest {
        PendingGuest {
            connection_id: ConnectionId::from(conn),
            user_id: UserId::new(),
            display_name: format!("guest-{conn}"),
        }
    }

    #[test]
    fn test_queue_add_is_idempotent_on_connection_id() {
        let mut queue = HostAdmissionQueue::new();

        assert!(queue.add(guest("c1")));
        assert!(queue.add(guest("c2")));
        // Same connection id again, different user payload: ignored.
        assert!(!queue.add(guest("c1")));

        assert_eq!(queue.list().len(), 2);
    }

    #[test]
    fn test_queue_remove_is_safe_when_absent() {
        let mut queue = HostAdmissionQueue::new();
        queue.add(guest("c1"));

        assert!(queue.remove(&ConnectionId::from("c1")).is_some());
        assert!(queue.remove(&ConnectionId::from("c1")).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_preserves_arrival_order() {
        let mut queue = HostAdmissionQueue::new();
        queue.add(guest("c1"));
        queue.add(guest("c2"));
        queue.add(guest("c3"));
        queue.remove(&ConnectionId::from("c2"));

        let names: Vec<_> = queue
            .list()
            .into_iter()
            .map(|g| g.connection_id.as_str().to_string())
            .collect();
        assert_eq!(names, vec!["c1", "c3"]);
    }
}
