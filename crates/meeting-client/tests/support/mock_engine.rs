//! In-memory media engine recording every call per connection.

use async_trait::async_trait;
use common::types::ConnectionId;
use meeting_client::media::{
    IceCandidate, MediaEngine, MediaError, PeerConnection, PeerEvent, SessionDescription,
    TrackAcquisition, TrackKind,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Everything a mock connection observed.
#[derive(Default, Debug)]
pub struct ConnRecord {
    pub attached: bool,
    pub offers: u32,
    pub answers: u32,
    pub remote_descriptions: Vec<SessionDescription>,
    pub candidates: Vec<IceCandidate>,
    pub replaced: Vec<TrackKind>,
    pub closed: bool,
}

#[derive(Default)]
struct EngineInner {
    connections_created: u32,
    /// Tracks that exist locally; enabling a missing one acquires it.
    track_exists: HashMap<TrackKind, bool>,
    track_enabled: HashMap<TrackKind, bool>,
    screen_capturing: bool,
    records: HashMap<ConnectionId, Arc<Mutex<ConnRecord>>>,
    event_senders: HashMap<ConnectionId, mpsc::Sender<PeerEvent>>,
}

/// Scriptable [`MediaEngine`] double.
#[derive(Clone)]
pub struct MockMediaEngine {
    inner: Arc<Mutex<EngineInner>>,
}

impl MockMediaEngine {
    pub fn new() -> Self {
        let mut inner = EngineInner::default();
        // Both capture tracks exist and are live by default.
        inner.track_exists.insert(TrackKind::Audio, true);
        inner.track_exists.insert(TrackKind::Video, true);
        inner.track_enabled.insert(TrackKind::Audio, true);
        inner.track_enabled.insert(TrackKind::Video, true);
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().expect("engine mock poisoned")
    }

    /// Pretend the device for `kind` has not been opened yet, so the next
    /// acquire reports `Acquired`.
    pub fn remove_track(&self, kind: TrackKind) {
        self.lock().track_exists.insert(kind, false);
    }

    pub fn connections_created(&self) -> u32 {
        self.lock().connections_created
    }

    pub fn record(&self, connection_id: &ConnectionId) -> Arc<Mutex<ConnRecord>> {
        Arc::clone(
            self.lock()
                .records
                .get(connection_id)
                .unwrap_or_else(|| panic!("no mock connection for {connection_id}")),
        )
    }

    pub fn has_connection(&self, connection_id: &ConnectionId) -> bool {
        self.lock().records.contains_key(connection_id)
    }

    pub fn track_enabled(&self, kind: TrackKind) -> bool {
        *self.lock().track_enabled.get(&kind).unwrap_or(&false)
    }

    pub fn screen_capturing(&self) -> bool {
        self.lock().screen_capturing
    }

    /// Emit an engine-side event for a connection, as the native engine
    /// would when gathering candidates or observing state changes.
    pub async fn push_event(&self, connection_id: &ConnectionId, event: PeerEvent) {
        let sender = self
            .lock()
            .event_senders
            .get(connection_id)
            .cloned()
            .unwrap_or_else(|| panic!("no event sender for {connection_id}"));
        sender.send(event).await.expect("engine event channel closed");
    }

    pub fn local_candidate(&self, connection_id: &ConnectionId, n: u32) -> PeerEvent {
        PeerEvent::IceCandidate {
            connection_id: connection_id.clone(),
            candidate: IceCandidate(json!({"candidate": format!("local:{n}")})),
        }
    }
}

struct MockPeerConnection {
    record: Arc<Mutex<ConnRecord>>,
}

impl MockPeerConnection {
    fn lock(&self) -> MutexGuard<'_, ConnRecord> {
        self.record.lock().expect("record poisoned")
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_connection(
        &self,
        remote: ConnectionId,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Box<dyn PeerConnection>, MediaError> {
        let record = Arc::new(Mutex::new(ConnRecord::default()));
        let mut inner = self.lock();
        inner.connections_created += 1;
        inner.records.insert(remote.clone(), Arc::clone(&record));
        inner.event_senders.insert(remote, events);
        Ok(Box::new(MockPeerConnection { record }))
    }

    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<(), MediaError> {
        self.lock().track_enabled.insert(kind, enabled);
        Ok(())
    }

    async fn acquire_track(&self, kind: TrackKind) -> Result<TrackAcquisition, MediaError> {
        let mut inner = self.lock();
        if *inner.track_exists.get(&kind).unwrap_or(&false) {
            Ok(TrackAcquisition::AlreadyAvailable)
        } else {
            inner.track_exists.insert(kind, true);
            Ok(TrackAcquisition::Acquired)
        }
    }

    async fn start_screen_capture(&self) -> Result<(), MediaError> {
        self.lock().screen_capturing = true;
        Ok(())
    }

    async fn stop_screen_capture(&self) -> Result<(), MediaError> {
        self.lock().screen_capturing = false;
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn attach_local_tracks(&mut self) -> Result<(), MediaError> {
        self.lock().attached = true;
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, MediaError> {
        let mut record = self.lock();
        assert!(
            record.attached,
            "local tracks must be attached before the offer"
        );
        record.offers += 1;
        Ok(SessionDescription(
            json!({"type": "offer", "n": record.offers}),
        ))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, MediaError> {
        let mut record = self.lock();
        record.answers += 1;
        Ok(SessionDescription(
            json!({"type": "answer", "n": record.answers}),
        ))
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.lock().remote_descriptions.push(description);
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.lock().candidates.push(candidate);
        Ok(())
    }

    async fn replace_outgoing_track(&mut self, kind: TrackKind) -> Result<(), MediaError> {
        self.lock().replaced.push(kind);
        Ok(())
    }

    async fn close(&mut self) {
        self.lock().closed = true;
    }
}
