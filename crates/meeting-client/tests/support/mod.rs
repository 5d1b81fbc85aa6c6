//! Shared fixtures and mocks for the integration tests.

#![allow(dead_code)]

pub mod mock_api;
pub mod mock_engine;
pub mod mock_signaling;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::types::{ConnectionId, UserId};
use meeting_client::api::RoomInfo;
use meeting_client::session::{Session, SessionEvent, SessionHandle};
use meeting_client::signaling::protocol::ParticipantInfo;
use meeting_client::SessionConfig;
use tokio::sync::mpsc;

use self::mock_api::MockRoomApi;
use self::mock_engine::MockMediaEngine;
use self::mock_signaling::{Acceptor, ChannelConnector};

/// Default timeout for any single test expectation.
pub const EXPECT_TIMEOUT: Duration = Duration::from_secs(2);

pub fn test_room() -> RoomInfo {
    RoomInfo {
        id: common::types::RoomId::new(),
        room_key: "blue-falcon-42".to_string(),
        room_name: "Standup".to_string(),
        join_url: "https://rooms.example.com/j/blue-falcon-42".to_string(),
    }
}

pub fn participant(name: &str) -> ParticipantInfo {
    ParticipantInfo {
        user_id: UserId::new(),
        connection_id: ConnectionId::from(format!("conn-{name}")),
        username: name.to_string(),
        mic_enabled: true,
        cam_enabled: true,
        is_screen_sharing: false,
    }
}

fn test_vars(local_user: UserId) -> HashMap<String, String> {
    HashMap::from([
        (
            "MEETING_API_BASE_URL".to_string(),
            "https://rooms.example.com/api".to_string(),
        ),
        (
            "MEETING_SIGNALING_URL".to_string(),
            "wss://signal.example.com/meeting".to_string(),
        ),
        ("MEETING_ACCESS_TOKEN".to_string(), "test-token".to_string()),
        ("MEETING_USER_ID".to_string(), local_user.to_string()),
        ("MEETING_DISPLAY_NAME".to_string(), "Local".to_string()),
        // Keep redials fast and bounded for tests.
        ("MEETING_RECONNECT_BASE_DELAY_MS".to_string(), "1".to_string()),
        ("MEETING_RECONNECT_MAX_DELAY_MS".to_string(), "2".to_string()),
        ("MEETING_MAX_RECONNECT_ATTEMPTS".to_string(), "3".to_string()),
    ])
}

/// A fully wired session against mock collaborators.
pub struct TestHarness {
    pub session: SessionHandle,
    pub events: mpsc::Receiver<SessionEvent>,
    pub engine: MockMediaEngine,
    pub api: MockRoomApi,
    pub acceptor: Acceptor,
    pub connector: Arc<ChannelConnector>,
    pub room: RoomInfo,
    pub local_user: UserId,
}

/// Route test logs through `RUST_LOG` when debugging; safe to call from
/// every test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_vars(|_| {})
    }

    pub fn with_vars(adjust: impl FnOnce(&mut HashMap<String, String>)) -> Self {
        init_tracing();
        let local_user = UserId::new();
        let mut vars = test_vars(local_user);
        adjust(&mut vars);
        let config = SessionConfig::from_vars(&vars).expect("test config");

        let room = test_room();
        let api = MockRoomApi::new(room.clone());
        let engine = MockMediaEngine::new();
        let (connector, acceptor) = ChannelConnector::new();

        let (session, events, _task) = Session::spawn(
            &config,
            Arc::new(api.clone()),
            Arc::new(engine.clone()),
            Arc::clone(&connector) as Arc<dyn meeting_client::signaling::transport::Connector>,
        );

        Self {
            session,
            events,
            engine,
            api,
            acceptor,
            connector,
            room,
            local_user,
        }
    }

    /// Next session event, failing the test after a bounded wait.
    pub async fn next_event(&mut self) -> SessionEvent {
        tokio::time::timeout(EXPECT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for a session event")
            .expect("event channel closed")
    }

    /// Skip events until one matches `predicate`.
    pub async fn next_event_matching(
        &mut self,
        predicate: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        for _ in 0..32 {
            let event = self.next_event().await;
            if predicate(&event) {
                return event;
            }
        }
        panic!("no matching session event within 32 events");
    }

    /// Assert that no session event arrives within `window`.
    pub async fn expect_no_event(&mut self, window: Duration) {
        if let Ok(event) = tokio::time::timeout(window, self.events.recv()).await {
            panic!("unexpected session event: {event:?}");
        }
    }
}

/// Drive a join to the `Admitted` outcome with the given snapshot and hand
/// back the live server end.
pub async fn admit_with_roster(
    harness: &mut TestHarness,
    roster: Vec<ParticipantInfo>,
) -> mock_signaling::ServerEnd {
    use meeting_client::session::{JoinMedia, JoinOutcome};
    use meeting_client::signaling::protocol::ServerEvent;

    let handle = harness.session.clone();
    let room_id = harness.room.id;
    let join = tokio::spawn(async move { handle.join_by_id(room_id, JoinMedia::default()).await });

    let mut server = harness.acceptor.accept().await;
    server.expect_join_room().await;
    server.send(ServerEvent::ExistingParticipants {
        participants: roster,
    });

    let outcome = join.await.expect("join task").expect("join should succeed");
    assert!(
        matches!(outcome, JoinOutcome::Admitted { .. }),
        "expected admission, got {outcome:?}"
    );
    server
}
