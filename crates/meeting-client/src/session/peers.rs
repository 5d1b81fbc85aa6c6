//! Peer connection orchestration.
//!
//! One logical [`PeerLink`] per remote participant, keyed by the remote's
//! `ConnectionId`. The registry enforces the glare-free initiation rule
//! (only the snapshot-consuming joiner offers), keeps candidate buffering
//! honest, and performs live track replacement without renegotiation.
//!
//! Candidate buffering happens at two levels, both order-preserving:
//! - candidates for a link that does not exist yet wait in a registry-level
//!   buffer and migrate into the link the moment it is created;
//! - candidates for a link without a remote description wait inside the
//!   link and flush right after the description is applied.
//!
//! Removing a link discards anything still buffered for it.

use common::types::{ConnectionId, UserId};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::media::{
    IceCandidate, MediaEngine, MediaError, PeerConnection, PeerEvent, SessionDescription,
    TrackKind,
};
use crate::signaling::protocol::ParticipantInfo;

/// Identity of a remote peer as needed for link bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePeer {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub username: String,
}

impl From<&ParticipantInfo> for RemotePeer {
    fn from(info: &ParticipantInfo) -> Self {
        Self {
            connection_id: info.connection_id.clone(),
            user_id: info.user_id,
            username: info.username.clone(),
        }
    }
}

/// Errors from link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No link exists for the addressed connection id.
    #[error("no peer link for connection {0}")]
    UnknownLink(ConnectionId),

    /// The media engine failed.
    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Where an inbound candidate ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateRoute {
    /// No link yet; buffered at the registry level.
    BufferedForLink,
    /// Link exists but has no remote description; held inside the link.
    HeldForRemoteDescription,
    /// Applied to the native connection immediately.
    Applied,
}

/// One logical peer-to-peer media connection.
struct PeerLink {
    remote: RemotePeer,
    /// Whether the local side is responsible for the initial offer.
    should_offer: bool,
    conn: Box<dyn PeerConnection>,
    have_remote_description: bool,
    /// Candidates received before the remote description, in arrival order.
    held_candidates: Vec<IceCandidate>,
}

impl PeerLink {
    async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.conn.set_remote_description(description).await?;
        self.have_remote_description = true;
        self.flush_held().await;
        Ok(())
    }

    /// Apply held candidates in arrival order, exactly once each. Individual
    /// failures are logged and do not abort the flush; a candidate is never
    /// retried.
    async fn flush_held(&mut self) {
        for candidate in self.held_candidates.drain(..) {
            if let Err(e) = self.conn.add_ice_candidate(candidate).await {
                warn!(
                    target: "session.peers",
                    connection_id = %self.remote.connection_id,
                    error = %e,
                    "buffered candidate rejected by engine"
                );
            }
        }
    }
}

/// The set of peer links for one room membership.
pub struct PeerRegistry {
    engine: std::sync::Arc<dyn MediaEngine>,
    engine_events: mpsc::Sender<PeerEvent>,
    links: HashMap<ConnectionId, PeerLink>,
    /// Candidates that arrived before their link existed.
    pending_candidates: HashMap<ConnectionId, Vec<IceCandidate>>,
}

impl PeerRegistry {
    #[must_use]
    pub fn new(
        engine: std::sync::Arc<dyn MediaEngine>,
        engine_events: mpsc::Sender<PeerEvent>,
    ) -> Self {
        Self {
            engine,
            engine_events,
            links: HashMap::new(),
            pending_candidates: HashMap::new(),
        }
    }

    /// Create a link for `remote` unless one already exists (idempotent).
    ///
    /// Local tracks are attached before any offer is generated; candidates
    /// already buffered for this connection id migrate into the link. When
    /// `should_offer` is set and the link is new, the generated offer is
    /// returned for the caller to send.
    pub async fn ensure_link(
        &mut self,
        remote: RemotePeer,
        should_offer: bool,
    ) -> Result<Option<SessionDescription>, LinkError> {
        if self.links.contains_key(&remote.connection_id) {
            debug!(
                target: "session.peers",
                connection_id = %remote.connection_id,
                "link already exists, ignoring duplicate create"
            );
            return Ok(None);
        }

        info!(
            target: "session.peers",
            connection_id = %remote.connection_id,
            username = %remote.username,
            should_offer,
            "creating peer link"
        );

        let mut conn = self
            .engine
            .create_connection(remote.connection_id.clone(), self.engine_events.clone())
            .await?;
        conn.attach_local_tracks().await?;

        let held_candidates = self
            .pending_candidates
            .remove(&remote.connection_id)
            .unwrap_or_default();

        let mut link = PeerLink {
            remote: remote.clone(),
            should_offer,
            conn,
            have_remote_description: false,
            held_candidates,
        };

        let offer = if should_offer {
            Some(link.conn.create_offer().await?)
        } else {
            None
        };

        self.links.insert(remote.connection_id, link);
        Ok(offer)
    }

    /// Handle an inbound offer: create the link on demand (the sender is the
    /// joiner, so the local side never offers), apply the remote
    /// description, flush held candidates, and return the answer to send.
    pub async fn accept_offer(
        &mut self,
        remote: RemotePeer,
        offer: SessionDescription,
    ) -> Result<SessionDescription, LinkError> {
        self.ensure_link(remote.clone(), false).await?;
        let link = self
            .links
            .get_mut(&remote.connection_id)
            .ok_or_else(|| LinkError::UnknownLink(remote.connection_id.clone()))?;

        link.apply_remote_description(offer).await?;
        let answer = link.conn.create_answer().await?;
        Ok(answer)
    }

    /// Handle an inbound answer on the offering side.
    pub async fn accept_answer(
        &mut self,
        connection_id: &ConnectionId,
        answer: SessionDescription,
    ) -> Result<(), LinkError> {
        let link = self
            .links
            .get_mut(connection_id)
            .ok_or_else(|| LinkError::UnknownLink(connection_id.clone()))?;
        link.apply_remote_description(answer).await?;
        Ok(())
    }

    /// Route an inbound candidate: buffer, hold, or apply.
    pub async fn accept_candidate(
        &mut self,
        connection_id: &ConnectionId,
        candidate: IceCandidate,
    ) -> Result<CandidateRoute, LinkError> {
        let Some(link) = self.links.get_mut(connection_id) else {
            self.pending_candidates
                .entry(connection_id.clone())
                .or_default()
                .push(candidate);
            return Ok(CandidateRoute::BufferedForLink);
        };

        if !link.have_remote_description {
            link.held_candidates.push(candidate);
            return Ok(CandidateRoute::HeldForRemoteDescription);
        }

        link.conn.add_ice_candidate(candidate).await?;
        Ok(CandidateRoute::Applied)
    }

    /// Close and remove the link for `connection_id`, discarding anything
    /// still buffered for it. Returns whether a link existed.
    pub async fn remove_link(&mut self, connection_id: &ConnectionId) -> bool {
        self.pending_candidates.remove(connection_id);
        let Some(mut link) = self.links.remove(connection_id) else {
            return false;
        };
        info!(
            target: "session.peers",
            connection_id = %connection_id,
            username = %link.remote.username,
            "closing peer link"
        );
        link.conn.close().await;
        true
    }

    /// Swap the outgoing track of `kind` on every open link, without
    /// renegotiation. Returns per-link failures.
    pub async fn replace_outgoing_track_on_all(
        &mut self,
        kind: TrackKind,
    ) -> Vec<(ConnectionId, MediaError)> {
        let mut failures = Vec::new();
        for (connection_id, link) in &mut self.links {
            if let Err(e) = link.conn.replace_outgoing_track(kind).await {
                warn!(
                    target: "session.peers",
                    connection_id = %connection_id,
                    error = %e,
                    "track replacement failed"
                );
                failures.push((connection_id.clone(), e));
            }
        }
        failures
    }

    /// Close every link (room teardown).
    pub async fn close_all(&mut self) {
        for (_, mut link) in self.links.drain() {
            link.conn.close().await;
        }
        self.pending_candidates.clear();
    }

    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.links.contains_key(connection_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Offer direction recorded for a link, if it exists.
    #[must_use]
    pub fn should_offer(&self, connection_id: &ConnectionId) -> Option<bool> {
        self.links.get(connection_id).map(|l| l.should_offer)
    }
}
