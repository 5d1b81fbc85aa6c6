//! In-memory room-state service.

use async_trait::async_trait;
use common::types::RoomId;
use meeting_client::api::{
    ApiError, CreateRoomRequest, JoinRoomData, ParticipantRole, RoomApi, RoomInfo,
};
use meeting_client::signaling::protocol::ParticipantInfo;
use std::sync::{Arc, Mutex};

struct ApiInner {
    room: RoomInfo,
    role: ParticipantRole,
    is_waiting: bool,
    participants: Vec<ParticipantInfo>,
    fail_join: Option<ApiError>,
    fail_get_participants: Option<ApiError>,
    join_calls: u32,
    leave_calls: u32,
    participants_calls: u32,
}

/// Scriptable [`RoomApi`] double.
#[derive(Clone)]
pub struct MockRoomApi {
    inner: Arc<Mutex<ApiInner>>,
}

impl MockRoomApi {
    pub fn new(room: RoomInfo) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ApiInner {
                room,
                role: ParticipantRole::Guest,
                is_waiting: false,
                participants: Vec::new(),
                fail_join: None,
                fail_get_participants: None,
                join_calls: 0,
                leave_calls: 0,
                participants_calls: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ApiInner> {
        self.inner.lock().expect("api mock poisoned")
    }

    pub fn set_role(&self, role: ParticipantRole) {
        self.lock().role = role;
    }

    pub fn set_waiting(&self, is_waiting: bool) {
        self.lock().is_waiting = is_waiting;
    }

    /// The authoritative snapshot returned by `get_participants`.
    pub fn set_participants(&self, participants: Vec<ParticipantInfo>) {
        self.lock().participants = participants;
    }

    pub fn fail_join(&self, error: ApiError) {
        self.lock().fail_join = Some(error);
    }

    pub fn fail_get_participants(&self, error: ApiError) {
        self.lock().fail_get_participants = Some(error);
    }

    pub fn join_calls(&self) -> u32 {
        self.lock().join_calls
    }

    pub fn leave_calls(&self) -> u32 {
        self.lock().leave_calls
    }

    pub fn participants_calls(&self) -> u32 {
        self.lock().participants_calls
    }

    fn join(&self) -> Result<JoinRoomData, ApiError> {
        let mut inner = self.lock();
        inner.join_calls += 1;
        if let Some(error) = inner.fail_join.clone() {
            return Err(error);
        }
        Ok(JoinRoomData {
            room: inner.room.clone(),
            role: inner.role,
            is_waiting: inner.is_waiting,
        })
    }
}

#[async_trait]
impl RoomApi for MockRoomApi {
    async fn create_room(&self, _request: CreateRoomRequest) -> Result<RoomInfo, ApiError> {
        Ok(self.lock().room.clone())
    }

    async fn join_room_by_id(&self, _room_id: RoomId) -> Result<JoinRoomData, ApiError> {
        self.join()
    }

    async fn join_room_by_key(&self, _room_key: &str) -> Result<JoinRoomData, ApiError> {
        self.join()
    }

    async fn leave_room(&self, _room_id: RoomId) -> Result<(), ApiError> {
        self.lock().leave_calls += 1;
        Ok(())
    }

    async fn get_participants(&self, _room_id: RoomId) -> Result<Vec<ParticipantInfo>, ApiError> {
        let mut inner = self.lock();
        inner.participants_calls += 1;
        if let Some(error) = inner.fail_get_participants.clone() {
            return Err(error);
        }
        Ok(inner.participants.clone())
    }
}
