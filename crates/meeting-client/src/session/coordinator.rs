//! Session coordinator: one actor per local client, owning the room, the
//! roster, and the peer link set.
//!
//! Every mutation flows through the actor's serialized event loop, so
//! readers never observe half-applied state: commands from the embedding
//! layer, inbound signaling events, and media engine notifications are all
//! processed one at a time, in arrival order. Peer negotiation for one
//! remote never interleaves with another operation on the same link.
//!
//! # Join flow
//!
//! A join registers with the room-state REST service, connects the
//! signaling transport if needed, issues `JoinRoom`, and then parks a
//! pending-join slot that races the three one-shot admission outcomes
//! (snapshot, waiting, rejected) against a deadline. Exactly one outcome
//! wins; the slot is cleared on every exit path so repeated attempts never
//! leak a stale waiter.
//!
//! # Reconnect
//!
//! The transport announces each connection epoch. A new epoch while the
//! session is admitted means an unexpected drop was healed: the coordinator
//! re-fetches the authoritative participant snapshot, reconciles it against
//! the roster by diffing (never clear-then-refill), and rejoins the
//! signaling group. Intentional disconnects never trigger resync.

use common::types::{ConnectionId, RoomId, UserId};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::{ParticipantRole, RoomApi, RoomInfo};
use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::media::{MediaEngine, PeerEvent, PeerState, TrackAcquisition, TrackKind};
use crate::session::admission::{AdmissionState, HostAdmissionQueue, PendingGuest};
use crate::session::events::{ChatMessage, SessionEvent};
use crate::session::peers::{LinkError, PeerRegistry, RemotePeer};
use crate::session::roster::{MediaUpdate, Roster};
use crate::signaling::protocol::{ClientCommand, ParticipantInfo, ServerEvent};
use crate::signaling::transport::{
    Connector, ReconnectPolicy, SignalingTransport, TransportError, TransportEvent,
};

/// Buffer for transport notifications into the actor.
const TRANSPORT_CHANNEL_BUFFER: usize = 256;

/// Buffer for media engine notifications into the actor.
const ENGINE_CHANNEL_BUFFER: usize = 256;

/// Lifecycle of one room membership attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// REST registration and transport dialing in progress.
    Connecting,
    /// `JoinRoom` issued; the admission decision is outstanding.
    AwaitingAdmission(AdmissionState),
    Admitted,
    Leaving,
}

/// Local media flags announced to the room.
#[derive(Debug, Clone, Copy, Default)]
struct LocalMediaState {
    mic_enabled: bool,
    cam_enabled: bool,
    screen_sharing: bool,
}

/// Media preferences carried into a join.
#[derive(Debug, Clone, Copy)]
pub struct JoinMedia {
    pub mic_enabled: bool,
    pub cam_enabled: bool,
}

impl Default for JoinMedia {
    fn default() -> Self {
        Self {
            mic_enabled: true,
            cam_enabled: true,
        }
    }
}

/// Successful resolution of a join attempt.
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    /// In the room; the roster snapshot has been applied and peer links are
    /// being established.
    Admitted {
        room: RoomInfo,
        role: ParticipantRole,
        roster: Vec<ParticipantInfo>,
    },
    /// Held in the waiting room pending a host decision. Admission (or
    /// rejection) arrives later on the session event channel.
    Waiting { room: RoomInfo },
}

enum JoinTarget {
    ById(RoomId),
    ByKey(String),
    AsHost(RoomId),
}

type JoinResponder = oneshot::Sender<Result<JoinOutcome, SessionError>>;
type AckResponder = oneshot::Sender<Result<(), SessionError>>;

enum SessionCommand {
    Join {
        target: JoinTarget,
        media: JoinMedia,
        respond_to: JoinResponder,
    },
    Leave {
        respond_to: AckResponder,
    },
    AdmitGuest {
        connection_id: ConnectionId,
        respond_to: AckResponder,
    },
    RejectGuest {
        connection_id: ConnectionId,
        respond_to: AckResponder,
    },
    ToggleMicrophone {
        enabled: bool,
        respond_to: AckResponder,
    },
    ToggleCamera {
        enabled: bool,
        respond_to: AckResponder,
    },
    ToggleScreenShare {
        enabled: bool,
        respond_to: AckResponder,
    },
    SendChat {
        content: String,
        respond_to: AckResponder,
    },
    GetRoster {
        respond_to: oneshot::Sender<Vec<ParticipantInfo>>,
    },
    GetPendingGuests {
        respond_to: oneshot::Sender<Vec<PendingGuest>>,
    },
    GetState {
        respond_to: oneshot::Sender<SessionState>,
    },
}

/// The pending-join slot: the bounded race between the admission outcomes
/// and the deadline. Cleared on every exit path.
struct PendingJoin {
    respond_to: JoinResponder,
    deadline: Instant,
    as_host: bool,
}

/// Handle to a running [`Session`].
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        command: SessionCommand,
        rx: oneshot::Receiver<Result<T, SessionError>>,
    ) -> Result<T, SessionError> {
        self.sender
            .send(command)
            .await
            .map_err(|e| SessionError::Internal(format!("command send failed: {e}")))?;
        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Join a room by its id.
    pub async fn join_by_id(
        &self,
        room_id: RoomId,
        media: JoinMedia,
    ) -> Result<JoinOutcome, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            SessionCommand::Join {
                target: JoinTarget::ById(room_id),
                media,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Join a room by its shareable key.
    pub async fn join_by_key(
        &self,
        room_key: impl Into<String>,
        media: JoinMedia,
    ) -> Result<JoinOutcome, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            SessionCommand::Join {
                target: JoinTarget::ByKey(room_key.into()),
                media,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Join a room the local user just created. Hosts bypass admission
    /// control: only the snapshot outcome is legal.
    pub async fn join_as_host(
        &self,
        room_id: RoomId,
        media: JoinMedia,
    ) -> Result<JoinOutcome, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            SessionCommand::Join {
                target: JoinTarget::AsHost(room_id),
                media,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Leave the room. Cancels an in-flight join attempt.
    pub async fn leave(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.request(SessionCommand::Leave { respond_to: tx }, rx).await
    }

    /// Host only: admit a waiting guest.
    pub async fn admit_guest(&self, connection_id: ConnectionId) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            SessionCommand::AdmitGuest {
                connection_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Host only: reject a waiting guest.
    pub async fn reject_guest(&self, connection_id: ConnectionId) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            SessionCommand::RejectGuest {
                connection_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Mute or unmute the microphone. Never renegotiates.
    pub async fn toggle_microphone(&self, enabled: bool) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            SessionCommand::ToggleMicrophone {
                enabled,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Enable or disable the camera. Never renegotiates; a first-time device
    /// grant is pushed onto open links via track replacement.
    pub async fn toggle_camera(&self, enabled: bool) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            SessionCommand::ToggleCamera {
                enabled,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Start or stop screen sharing. Swaps the outgoing video track on every
    /// open link without renegotiation.
    pub async fn toggle_screen_share(&self, enabled: bool) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            SessionCommand::ToggleScreenShare {
                enabled,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Send a chat message to the room.
    pub async fn send_chat(&self, content: impl Into<String>) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            SessionCommand::SendChat {
                content: content.into(),
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Transactional roster snapshot.
    pub async fn roster(&self) -> Result<Vec<ParticipantInfo>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::GetRoster { respond_to: tx })
            .await
            .map_err(|e| SessionError::Internal(format!("command send failed: {e}")))?;
        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))
    }

    /// Host only: guests currently waiting for an admission decision.
    pub async fn pending_guests(&self) -> Result<Vec<PendingGuest>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::GetPendingGuests { respond_to: tx })
            .await
            .map_err(|e| SessionError::Internal(format!("command send failed: {e}")))?;
        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))
    }

    /// Current session state.
    pub async fn state(&self) -> Result<SessionState, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::GetState { respond_to: tx })
            .await
            .map_err(|e| SessionError::Internal(format!("command send failed: {e}")))?;
        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop the session actor and its transport.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// The session actor.
pub struct Session {
    local_user_id: UserId,
    admission_timeout: std::time::Duration,
    api: Arc<dyn RoomApi>,
    engine: Arc<dyn MediaEngine>,
    transport: SignalingTransport,
    transport_events: mpsc::Receiver<TransportEvent>,
    engine_events: mpsc::Receiver<PeerEvent>,
    commands: mpsc::Receiver<SessionCommand>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,

    state: SessionState,
    room: Option<RoomInfo>,
    role: Option<ParticipantRole>,
    roster: Roster,
    peers: PeerRegistry,
    host_queue: HostAdmissionQueue,
    pending_join: Option<PendingJoin>,
    local_media: LocalMediaState,
    last_epoch: u64,
}

impl Session {
    /// Spawn a session actor wired to the given collaborators.
    ///
    /// Returns the command handle, the UI event stream, and the actor's
    /// join handle.
    pub fn spawn(
        config: &SessionConfig,
        api: Arc<dyn RoomApi>,
        engine: Arc<dyn MediaEngine>,
        connector: Arc<dyn Connector>,
    ) -> (SessionHandle, mpsc::Receiver<SessionEvent>, JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let (transport_events_tx, transport_events_rx) = mpsc::channel(TRANSPORT_CHANNEL_BUFFER);
        let (engine_events_tx, engine_events_rx) = mpsc::channel(ENGINE_CHANNEL_BUFFER);

        let policy = ReconnectPolicy {
            base_delay: config.reconnect_base_delay,
            max_delay: config.reconnect_max_delay,
            max_attempts: config.max_reconnect_attempts,
        };
        let (transport, _transport_task) = SignalingTransport::spawn(
            connector,
            policy,
            transport_events_tx,
            cancel.child_token(),
        );

        let actor = Session {
            local_user_id: config.local_user_id,
            admission_timeout: config.admission_timeout,
            api,
            engine: Arc::clone(&engine),
            transport,
            transport_events: transport_events_rx,
            engine_events: engine_events_rx,
            commands: command_rx,
            events: event_tx,
            cancel: cancel.clone(),
            state: SessionState::Idle,
            room: None,
            role: None,
            roster: Roster::new(config.local_user_id),
            peers: PeerRegistry::new(engine, engine_events_tx),
            host_queue: HostAdmissionQueue::new(),
            pending_join: None,
            local_media: LocalMediaState::default(),
            last_epoch: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        (
            SessionHandle {
                sender: command_tx,
                cancel,
            },
            event_rx,
            task_handle,
        )
    }

    /// Run the actor event loop.
    #[instrument(skip_all, name = "session.coordinator", fields(user_id = %self.local_user_id))]
    async fn run(mut self) {
        info!(target: "session.coordinator", "session actor started");

        loop {
            let deadline = self.pending_join.as_ref().map(|p| p.deadline);

            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!(target: "session.coordinator", "session cancelled");
                    break;
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                event = self.transport_events.recv() => match event {
                    Some(event) => self.on_transport_event(event).await,
                    None => {
                        warn!(target: "session.coordinator", "transport task terminated");
                        break;
                    }
                },

                event = self.engine_events.recv() => match event {
                    Some(event) => self.on_peer_event(event).await,
                    None => break,
                },

                () = Self::admission_deadline(deadline), if deadline.is_some() => {
                    self.on_admission_timeout().await;
                }
            }
        }

        self.shutdown().await;
        info!(target: "session.coordinator", "session actor stopped");
    }

    async fn admission_deadline(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    async fn shutdown(&mut self) {
        if let Some(pending) = self.pending_join.take() {
            let _ = pending.respond_to.send(Err(SessionError::Cancelled));
        }
        self.peers.close_all().await;
        self.transport.disconnect().await;
    }

    async fn emit(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            debug!(target: "session.coordinator", "event receiver dropped");
        }
    }

    // ===== commands =====

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Join {
                target,
                media,
                respond_to,
            } => self.handle_join(target, media, respond_to).await,
            SessionCommand::Leave { respond_to } => {
                let result = self.handle_leave().await;
                let _ = respond_to.send(result);
            }
            SessionCommand::AdmitGuest {
                connection_id,
                respond_to,
            } => {
                let result = self.handle_admission_decision(connection_id, true).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::RejectGuest {
                connection_id,
                respond_to,
            } => {
                let result = self.handle_admission_decision(connection_id, false).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::ToggleMicrophone {
                enabled,
                respond_to,
            } => {
                let result = self.handle_toggle_track(TrackKind::Audio, enabled).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::ToggleCamera {
                enabled,
                respond_to,
            } => {
                let result = self.handle_toggle_track(TrackKind::Video, enabled).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::ToggleScreenShare {
                enabled,
                respond_to,
            } => {
                let result = self.handle_toggle_screen_share(enabled).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::SendChat {
                content,
                respond_to,
            } => {
                let result = self.handle_send_chat(content).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::GetRoster { respond_to } => {
                let _ = respond_to.send(self.roster.snapshot());
            }
            SessionCommand::GetPendingGuests { respond_to } => {
                let _ = respond_to.send(self.host_queue.list());
            }
            SessionCommand::GetState { respond_to } => {
                let _ = respond_to.send(self.state);
            }
        }
    }

    async fn handle_join(
        &mut self,
        target: JoinTarget,
        media: JoinMedia,
        respond_to: JoinResponder,
    ) {
        if self.state != SessionState::Idle {
            let _ = respond_to.send(Err(SessionError::InvalidState(
                "a session is already active or joining".to_string(),
            )));
            return;
        }

        self.state = SessionState::Connecting;

        let join_data = match &target {
            JoinTarget::ById(room_id) | JoinTarget::AsHost(room_id) => {
                self.api.join_room_by_id(*room_id).await
            }
            JoinTarget::ByKey(room_key) => self.api.join_room_by_key(room_key).await,
        };
        let join_data = match join_data {
            Ok(data) => data,
            Err(e) => {
                self.state = SessionState::Idle;
                let _ = respond_to.send(Err(e.into()));
                return;
            }
        };

        match self.transport.connect().await {
            Ok(epoch) => self.last_epoch = epoch,
            Err(e) => {
                self.state = SessionState::Idle;
                let error = match e {
                    TransportError::Auth(msg) => SessionError::Auth(msg),
                    other => other.into(),
                };
                let _ = respond_to.send(Err(error));
                return;
            }
        }

        if let Err(e) = self
            .transport
            .send(ClientCommand::JoinRoom {
                room_id: join_data.room.id,
                mic_enabled: media.mic_enabled,
                cam_enabled: media.cam_enabled,
            })
            .await
        {
            self.state = SessionState::Idle;
            let _ = respond_to.send(Err(e.into()));
            return;
        }

        info!(
            target: "session.coordinator",
            room_id = %join_data.room.id,
            role = ?join_data.role,
            "join issued, awaiting admission decision"
        );

        let as_host =
            matches!(target, JoinTarget::AsHost(_)) || join_data.role == ParticipantRole::Host;
        self.room = Some(join_data.room);
        self.role = Some(join_data.role);
        self.local_media = LocalMediaState {
            mic_enabled: media.mic_enabled,
            cam_enabled: media.cam_enabled,
            screen_sharing: false,
        };
        self.pending_join = Some(PendingJoin {
            respond_to,
            deadline: Instant::now() + self.admission_timeout,
            as_host,
        });
        self.state = SessionState::AwaitingAdmission(AdmissionState::Requesting);
    }

    async fn on_admission_timeout(&mut self) {
        let Some(pending) = self.pending_join.take() else {
            return;
        };
        warn!(
            target: "session.coordinator",
            "no admission decision within the deadline, abandoning join attempt"
        );
        let _ = pending.respond_to.send(Err(SessionError::AdmissionTimeout));
        // No connection state is assumed; the transport stays up for the
        // next attempt.
        self.state = SessionState::Idle;
        self.room = None;
        self.role = None;
    }

    async fn handle_leave(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Idle {
            return Ok(());
        }
        self.state = SessionState::Leaving;

        if let Some(pending) = self.pending_join.take() {
            let _ = pending.respond_to.send(Err(SessionError::Cancelled));
        }

        if let Some(room) = self.room.take() {
            if let Err(e) = self
                .transport
                .send(ClientCommand::LeaveRoom { room_id: room.id })
                .await
            {
                debug!(target: "session.coordinator", error = %e, "leave command not sent");
            }
            if let Err(e) = self.api.leave_room(room.id).await {
                warn!(target: "session.coordinator", error = %e, "room service leave failed");
            }
        }

        self.peers.close_all().await;
        self.roster.clear();
        self.host_queue.clear();
        self.emit(SessionEvent::RosterChanged(Vec::new())).await;

        // Intentional: suppresses reconnect and resync.
        self.transport.disconnect().await;

        self.role = None;
        self.local_media = LocalMediaState::default();
        self.state = SessionState::Idle;
        Ok(())
    }

    async fn handle_admission_decision(
        &mut self,
        connection_id: ConnectionId,
        admit: bool,
    ) -> Result<(), SessionError> {
        if self.role != Some(ParticipantRole::Host) {
            return Err(SessionError::PermissionDenied(
                "only the host can admit or reject guests".to_string(),
            ));
        }
        if self.state != SessionState::Admitted {
            return Err(SessionError::InvalidState("not in a meeting".to_string()));
        }

        // Optimistic removal; the authoritative admission happens on the
        // guest's side when the resulting signal reaches them.
        self.host_queue.remove(&connection_id);

        let command = if admit {
            ClientCommand::AdmitUser { connection_id }
        } else {
            ClientCommand::RejectUser { connection_id }
        };
        self.transport.send(command).await?;
        Ok(())
    }

    async fn handle_toggle_track(
        &mut self,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Admitted {
            return Err(SessionError::InvalidState("not in a meeting".to_string()));
        }

        if enabled && self.engine.acquire_track(kind).await? == TrackAcquisition::Acquired {
            // First-time device grant: push the new track onto every open
            // link without renegotiating.
            let failures = self.peers.replace_outgoing_track_on_all(kind).await;
            for (connection_id, error) in failures {
                self.emit(SessionEvent::Error {
                    message: format!("track update failed for peer {connection_id}: {error}"),
                })
                .await;
            }
        }

        self.engine.set_track_enabled(kind, enabled).await?;
        let command = match kind {
            TrackKind::Audio => {
                self.local_media.mic_enabled = enabled;
                ClientCommand::ToggleMicrophone { enabled }
            }
            TrackKind::Video => {
                self.local_media.cam_enabled = enabled;
                ClientCommand::ToggleCamera { enabled }
            }
        };
        self.transport.send(command).await?;
        Ok(())
    }

    async fn handle_toggle_screen_share(&mut self, enabled: bool) -> Result<(), SessionError> {
        if self.state != SessionState::Admitted {
            return Err(SessionError::InvalidState("not in a meeting".to_string()));
        }
        if enabled == self.local_media.screen_sharing {
            return Ok(());
        }

        if enabled {
            self.engine.start_screen_capture().await?;
        } else {
            self.engine.stop_screen_capture().await?;
        }

        // Swap the outgoing video source everywhere; the connections and
        // their negotiated state stay untouched.
        let failures = self.peers.replace_outgoing_track_on_all(TrackKind::Video).await;
        for (connection_id, error) in failures {
            self.emit(SessionEvent::Error {
                message: format!("screen share update failed for peer {connection_id}: {error}"),
            })
            .await;
        }

        self.local_media.screen_sharing = enabled;
        self.transport
            .send(ClientCommand::ToggleScreenShare { enabled })
            .await?;
        Ok(())
    }

    async fn handle_send_chat(&mut self, content: String) -> Result<(), SessionError> {
        if self.state != SessionState::Admitted {
            return Err(SessionError::InvalidState("not in a meeting".to_string()));
        }
        self.transport
            .send(ClientCommand::SendChatMessage { content })
            .await?;
        Ok(())
    }

    // ===== transport events =====

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { epoch } => {
                if epoch != self.last_epoch {
                    self.last_epoch = epoch;
                    if self.state == SessionState::Admitted {
                        self.resync().await;
                    }
                }
            }
            TransportEvent::Event(event) => self.on_server_event(event).await,
            TransportEvent::Dropped { epoch, reason } => {
                // Redialing is already underway; resync happens when the new
                // epoch is announced.
                warn!(
                    target: "session.coordinator",
                    epoch,
                    reason = %reason,
                    "transport dropped unexpectedly"
                );
            }
            TransportEvent::ReconnectsExhausted { reason } => {
                let error = SessionError::TransportDropped(reason);
                self.emit(SessionEvent::Error {
                    message: error.user_message(),
                })
                .await;
                self.teardown_to_idle().await;
            }
            TransportEvent::Closed => {
                debug!(target: "session.coordinator", "transport closed intentionally");
            }
        }
    }

    /// Drop all room state after an unrecoverable failure.
    async fn teardown_to_idle(&mut self) {
        if let Some(pending) = self.pending_join.take() {
            let _ = pending.respond_to.send(Err(SessionError::Cancelled));
        }
        self.peers.close_all().await;
        if !self.roster.is_empty() {
            self.roster.clear();
            self.emit(SessionEvent::RosterChanged(Vec::new())).await;
        }
        self.host_queue.clear();
        self.room = None;
        self.role = None;
        self.local_media = LocalMediaState::default();
        self.state = SessionState::Idle;
    }

    /// Re-establish a consistent roster and connection set after an
    /// unexpected reconnect.
    async fn resync(&mut self) {
        let Some(room) = self.room.clone() else {
            return;
        };
        info!(target: "session.coordinator", room_id = %room.id, "resyncing after reconnect");

        let snapshot = match self.api.get_participants(room.id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(target: "session.coordinator", error = %e, "resync snapshot fetch failed");
                let error = SessionError::RosterInconsistency(format!(
                    "authoritative snapshot unavailable after reconnect: {e}"
                ));
                self.emit(SessionEvent::Error {
                    message: error.to_string(),
                })
                .await;
                self.teardown_to_idle().await;
                return;
            }
        };

        self.apply_authoritative_snapshot(snapshot).await;

        // Rejoin the signaling group under the new connection epoch.
        if let Err(e) = self
            .transport
            .send(ClientCommand::JoinRoom {
                room_id: room.id,
                mic_enabled: self.local_media.mic_enabled,
                cam_enabled: self.local_media.cam_enabled,
            })
            .await
        {
            warn!(target: "session.coordinator", error = %e, "rejoin after reconnect failed");
            self.emit(SessionEvent::Error {
                message: SessionError::from(e).user_message(),
            })
            .await;
        }
    }

    /// Diff-apply an authoritative snapshot while admitted. New peers get
    /// `should_offer = false`: the local client is the late side, so the
    /// joiner-offers rule puts the initiative on them.
    async fn apply_authoritative_snapshot(&mut self, snapshot: Vec<ParticipantInfo>) {
        let diff = self.roster.apply_snapshot(snapshot);
        if diff.is_empty() {
            return;
        }

        for participant in &diff.left {
            self.peers.remove_link(&participant.connection_id).await;
            self.emit(SessionEvent::UserLeft {
                user_id: participant.user_id,
            })
            .await;
        }
        for participant in &diff.joined {
            self.create_link(participant, false).await;
            self.emit(SessionEvent::UserJoined(participant.clone())).await;
        }
        self.emit(SessionEvent::RosterChanged(self.roster.snapshot()))
            .await;
    }

    // ===== signaling events =====

    async fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ExistingParticipants { participants } => {
                match self.state {
                    SessionState::AwaitingAdmission(phase) => {
                        if phase.on_snapshot() == AdmissionState::Admitted {
                            self.complete_admission(participants).await;
                        }
                    }
                    SessionState::Admitted => {
                        // Snapshot re-sent by the service (rejoin after an
                        // unexpected reconnect); reconcile by diffing.
                        self.apply_authoritative_snapshot(participants).await;
                    }
                    _ => {
                        debug!(
                            target: "session.coordinator",
                            state = ?self.state,
                            "ignoring snapshot outside a join"
                        );
                    }
                }
            }

            ServerEvent::YouAreWaiting => self.on_waiting_signal().await,
            ServerEvent::YouAreRejected => self.on_rejected_signal().await,

            ServerEvent::UserJoined { participant } => self.on_user_joined(participant).await,
            ServerEvent::UserLeft {
                user_id,
                connection_id,
            } => self.on_user_left(user_id, connection_id).await,

            ServerEvent::ReceiveOffer {
                from_connection_id,
                from_user_id,
                from_username,
                offer,
            } => {
                if self.state != SessionState::Admitted {
                    warn!(
                        target: "session.coordinator",
                        from = %from_connection_id,
                        "dropping offer received while not admitted"
                    );
                    return;
                }
                let remote = RemotePeer {
                    connection_id: from_connection_id.clone(),
                    user_id: from_user_id,
                    username: from_username,
                };
                match self.peers.accept_offer(remote, offer).await {
                    Ok(answer) => {
                        if let Err(e) = self
                            .transport
                            .send(ClientCommand::SendAnswer {
                                to_connection_id: from_connection_id.clone(),
                                answer,
                            })
                            .await
                        {
                            self.signaling_failure(&from_connection_id, "answer send failed", &e)
                                .await;
                        }
                    }
                    Err(e) => {
                        self.signaling_failure(&from_connection_id, "offer handling failed", &e)
                            .await;
                    }
                }
            }

            ServerEvent::ReceiveAnswer {
                from_connection_id,
                answer,
                ..
            } => {
                if self.state != SessionState::Admitted {
                    return;
                }
                match self.peers.accept_answer(&from_connection_id, answer).await {
                    Ok(()) => {}
                    Err(LinkError::UnknownLink(_)) => {
                        warn!(
                            target: "session.coordinator",
                            from = %from_connection_id,
                            "answer for unknown link, ignoring"
                        );
                    }
                    Err(e) => {
                        self.signaling_failure(&from_connection_id, "answer handling failed", &e)
                            .await;
                    }
                }
            }

            ServerEvent::ReceiveIceCandidate {
                from_connection_id,
                candidate,
            } => {
                if self.state != SessionState::Admitted {
                    return;
                }
                match self
                    .peers
                    .accept_candidate(&from_connection_id, candidate)
                    .await
                {
                    Ok(route) => {
                        debug!(
                            target: "session.coordinator",
                            from = %from_connection_id,
                            route = ?route,
                            "candidate routed"
                        );
                    }
                    Err(e) => {
                        // A bad candidate is not fatal to the link.
                        warn!(
                            target: "session.coordinator",
                            from = %from_connection_id,
                            error = %e,
                            "candidate rejected"
                        );
                    }
                }
            }

            ServerEvent::MicrophoneToggled { user_id, enabled } => {
                let update = MediaUpdate {
                    mic: Some(enabled),
                    ..MediaUpdate::default()
                };
                if self.roster.apply_media_update(user_id, update) {
                    self.emit(SessionEvent::RosterChanged(self.roster.snapshot()))
                        .await;
                }
            }
            ServerEvent::CameraToggled { user_id, enabled } => {
                let update = MediaUpdate {
                    cam: Some(enabled),
                    ..MediaUpdate::default()
                };
                if self.roster.apply_media_update(user_id, update) {
                    self.emit(SessionEvent::RosterChanged(self.roster.snapshot()))
                        .await;
                }
            }
            ServerEvent::ScreenShareToggled {
                user_id, enabled, ..
            } => {
                let update = MediaUpdate {
                    screen_share: Some(enabled),
                    ..MediaUpdate::default()
                };
                if self.roster.apply_media_update(user_id, update) {
                    self.emit(SessionEvent::RosterChanged(self.roster.snapshot()))
                        .await;
                }
            }

            ServerEvent::GuestRequested {
                connection_id,
                user_id,
                display_name,
            } => {
                if self.role != Some(ParticipantRole::Host) {
                    warn!(
                        target: "session.coordinator",
                        "guest request received while not host, ignoring"
                    );
                    return;
                }
                let guest = PendingGuest {
                    connection_id,
                    user_id,
                    display_name,
                };
                if self.host_queue.add(guest.clone()) {
                    self.emit(SessionEvent::GuestRequested(guest)).await;
                }
            }

            ServerEvent::MeetingEnded { reason } => {
                info!(target: "session.coordinator", reason = %reason, "meeting ended");
                self.emit(SessionEvent::MeetingEnded { reason }).await;
                self.teardown_to_idle().await;
                self.transport.disconnect().await;
            }

            ServerEvent::ReceiveChatMessage {
                user_id,
                username,
                content,
                sent_at,
            } => {
                self.emit(SessionEvent::Chat(ChatMessage {
                    user_id,
                    username,
                    content,
                    sent_at,
                }))
                .await;
            }

            ServerEvent::Error { message } => {
                self.emit(SessionEvent::Error { message }).await;
            }
        }
    }

    async fn on_waiting_signal(&mut self) {
        let SessionState::AwaitingAdmission(phase) = self.state else {
            warn!(target: "session.coordinator", "waiting signal outside a join, ignoring");
            return;
        };
        if let Some(pending) = &self.pending_join {
            if pending.as_host {
                // Hosts bypass admission control; a waiting signal here is a
                // service anomaly. Keep waiting for the snapshot.
                warn!(
                    target: "session.coordinator",
                    "host placed in waiting room, ignoring"
                );
                return;
            }
        }
        let next = phase.on_waiting();
        if next != AdmissionState::Waiting {
            return;
        }
        self.state = SessionState::AwaitingAdmission(next);

        if let Some(pending) = self.pending_join.take() {
            match self.room.clone() {
                Some(room) => {
                    let _ = pending.respond_to.send(Ok(JoinOutcome::Waiting { room }));
                }
                None => {
                    let _ = pending.respond_to.send(Err(SessionError::Internal(
                        "room state missing while waiting".to_string(),
                    )));
                }
            }
        }
        self.emit(SessionEvent::Waiting).await;
    }

    async fn on_rejected_signal(&mut self) {
        let SessionState::AwaitingAdmission(phase) = self.state else {
            warn!(target: "session.coordinator", "rejection signal outside a join, ignoring");
            return;
        };
        if phase.on_rejected() != AdmissionState::Rejected {
            return;
        }

        info!(target: "session.coordinator", "join request rejected by host");
        if let Some(pending) = self.pending_join.take() {
            let _ = pending.respond_to.send(Err(SessionError::Rejected));
        } else {
            // We were waiting; the caller already received the Waiting
            // outcome, so rejection arrives as an event.
            self.emit(SessionEvent::RejectedByHost).await;
        }
        self.state = SessionState::Idle;
        self.room = None;
        self.role = None;
    }

    /// The admission snapshot arrived: populate the roster and open one
    /// offering link per existing participant (the local client is the
    /// joiner, so it sends every initial offer).
    async fn complete_admission(&mut self, participants: Vec<ParticipantInfo>) {
        let diff = self.roster.apply_snapshot(participants);
        for participant in &diff.left {
            self.peers.remove_link(&participant.connection_id).await;
        }
        for participant in &diff.joined {
            self.create_link(participant, true).await;
        }

        self.state = SessionState::Admitted;
        let roster = self.roster.snapshot();
        info!(
            target: "session.coordinator",
            participants = roster.len(),
            "admitted to the room"
        );

        if let Some(pending) = self.pending_join.take() {
            match (self.room.clone(), self.role) {
                (Some(room), Some(role)) => {
                    let _ = pending.respond_to.send(Ok(JoinOutcome::Admitted {
                        room,
                        role,
                        roster: roster.clone(),
                    }));
                }
                _ => {
                    let _ = pending.respond_to.send(Err(SessionError::Internal(
                        "room state missing at admission".to_string(),
                    )));
                }
            }
        } else {
            // Waiting-room path: the caller already returned, notify via the
            // event channel.
            self.emit(SessionEvent::Admitted {
                roster: roster.clone(),
            })
            .await;
        }
        self.emit(SessionEvent::RosterChanged(roster)).await;
    }

    async fn on_user_joined(&mut self, participant: ParticipantInfo) {
        if self.state != SessionState::Admitted {
            debug!(target: "session.coordinator", "ignoring join delta while not admitted");
            return;
        }

        if let Some(previous) = self.roster.apply_join(participant.clone()) {
            if previous.connection_id != participant.connection_id {
                // Same user, fresh transport session: the old link is dead.
                self.peers.remove_link(&previous.connection_id).await;
            }
        }

        // The new participant is the joiner and will send the offer; the
        // local side only prepares the link.
        self.create_link(&participant, false).await;

        self.emit(SessionEvent::UserJoined(participant)).await;
        self.emit(SessionEvent::RosterChanged(self.roster.snapshot()))
            .await;
    }

    async fn on_user_left(&mut self, user_id: UserId, connection_id: ConnectionId) {
        if self.state != SessionState::Admitted {
            return;
        }

        self.peers.remove_link(&connection_id).await;
        if self.host_queue.remove(&connection_id).is_some() {
            debug!(
                target: "session.coordinator",
                connection_id = %connection_id,
                "pending guest disconnected"
            );
        }

        if self.roster.apply_leave(user_id).is_some() {
            self.emit(SessionEvent::UserLeft { user_id }).await;
            self.emit(SessionEvent::RosterChanged(self.roster.snapshot()))
                .await;
        }
    }

    /// Create a link (idempotent) and send the initial offer when the local
    /// side carries the offering role.
    async fn create_link(&mut self, participant: &ParticipantInfo, should_offer: bool) {
        let remote = RemotePeer::from(participant);
        let connection_id = remote.connection_id.clone();
        match self.peers.ensure_link(remote, should_offer).await {
            Ok(Some(offer)) => {
                if let Err(e) = self
                    .transport
                    .send(ClientCommand::SendOffer {
                        to_connection_id: connection_id.clone(),
                        offer,
                    })
                    .await
                {
                    self.signaling_failure(&connection_id, "offer send failed", &e).await;
                }
            }
            Ok(None) => {}
            Err(e) => {
                self.signaling_failure(&connection_id, "link creation failed", &e).await;
            }
        }
    }

    /// Per-peer signaling failure: tear down that one link and surface the
    /// error without aborting the session.
    async fn signaling_failure(
        &mut self,
        connection_id: &ConnectionId,
        context: &str,
        error: &(dyn std::fmt::Display + Send + Sync),
    ) {
        warn!(
            target: "session.coordinator",
            connection_id = %connection_id,
            error = %error,
            "{context}"
        );
        self.peers.remove_link(connection_id).await;
        let error = SessionError::Signaling(format!("{context} for peer {connection_id}"));
        self.emit(SessionEvent::Error {
            message: error.to_string(),
        })
        .await;
    }

    // ===== media engine events =====

    async fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::IceCandidate {
                connection_id,
                candidate,
            } => {
                if !self.peers.contains(&connection_id) {
                    debug!(
                        target: "session.coordinator",
                        connection_id = %connection_id,
                        "dropping candidate for removed link"
                    );
                    return;
                }
                if let Err(e) = self
                    .transport
                    .send(ClientCommand::SendIceCandidate {
                        to_connection_id: connection_id.clone(),
                        candidate,
                    })
                    .await
                {
                    self.signaling_failure(&connection_id, "candidate send failed", &e)
                        .await;
                }
            }
            PeerEvent::StateChanged {
                connection_id,
                state,
            } => match state {
                PeerState::Failed => {
                    if self.peers.remove_link(&connection_id).await {
                        self.emit(SessionEvent::Error {
                            message: format!("connection to peer {connection_id} failed"),
                        })
                        .await;
                    }
                }
                PeerState::Closed => {
                    self.peers.remove_link(&connection_id).await;
                }
                other => {
                    debug!(
                        target: "session.coordinator",
                        connection_id = %connection_id,
                        state = ?other,
                        "peer state changed"
                    );
                }
            },
        }
    }
}
