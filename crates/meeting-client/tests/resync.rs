//! Transport drops: automatic reconnect with diff-based resync, intentional
//! leave, and reconnect exhaustion.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod support;

use std::time::Duration;

use meeting_client::api::ApiError;
use meeting_client::session::{SessionEvent, SessionState};
use meeting_client::signaling::protocol::ClientCommand;
use support::{admit_with_roster, participant, TestHarness};

#[tokio::test]
async fn unexpected_drop_resyncs_roster_and_links() {
    let mut harness = TestHarness::new();
    let alice = participant("alice");
    let bob = participant("bob");
    let carol = participant("carol");
    let mut server = admit_with_roster(
        &mut harness,
        vec![alice.clone(), bob.clone(), carol.clone()],
    )
    .await;
    for _ in 0..3 {
        server.expect_send_offer().await;
    }

    // While we are away: alice leaves, dave joins.
    let dave = participant("dave");
    harness
        .api
        .set_participants(vec![bob.clone(), carol.clone(), dave.clone()]);

    server.drop_connection();

    // The transport redials; resync fetches the authoritative snapshot and
    // rejoins the signaling group.
    let mut server2 = harness.acceptor.accept().await;
    assert_eq!(server2.expect_join_room().await, harness.room.id);
    assert!(harness.api.participants_calls() >= 1);

    harness
        .next_event_matching(
            |e| matches!(e, SessionEvent::UserLeft { user_id } if *user_id == alice.user_id),
        )
        .await;
    harness
        .next_event_matching(
            |e| matches!(e, SessionEvent::UserJoined(p) if p.user_id == dave.user_id),
        )
        .await;

    // Alice's link is gone; dave got a link on the waiting side of the
    // joiner-offers rule (the peers discovered via resync already initiated
    // signaling from their end).
    let record = harness.engine.record(&alice.connection_id);
    assert!(record.lock().unwrap().closed);
    assert!(harness.engine.has_connection(&dave.connection_id));
    let record = harness.engine.record(&dave.connection_id);
    assert_eq!(record.lock().unwrap().offers, 0);
    server2.expect_no_command(Duration::from_millis(50)).await;

    let roster = harness.session.roster().await.unwrap();
    let mut names: Vec<_> = roster.iter().map(|p| p.username.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["bob", "carol", "dave"]);
    assert_eq!(harness.session.state().await.unwrap(), SessionState::Admitted);
}

#[tokio::test]
async fn intentional_leave_never_resyncs() {
    let mut harness = TestHarness::new();
    let alice = participant("alice");
    let mut server = admit_with_roster(&mut harness, vec![alice.clone()]).await;
    server.expect_send_offer().await;

    harness.session.leave().await.unwrap();

    assert!(matches!(
        server.recv_command().await,
        ClientCommand::LeaveRoom { .. }
    ));
    assert_eq!(harness.api.leave_calls(), 1);

    // No redial, no resync fetch.
    harness
        .acceptor
        .expect_no_connection(Duration::from_millis(100))
        .await;
    assert_eq!(harness.api.participants_calls(), 0);

    assert_eq!(harness.session.state().await.unwrap(), SessionState::Idle);
    assert!(harness.session.roster().await.unwrap().is_empty());
    let record = harness.engine.record(&alice.connection_id);
    assert!(record.lock().unwrap().closed);
}

#[tokio::test]
async fn resync_fetch_failure_tears_the_session_down() {
    let mut harness = TestHarness::new();
    let alice = participant("alice");
    let mut server = admit_with_roster(&mut harness, vec![alice.clone()]).await;
    server.expect_send_offer().await;

    harness
        .api
        .fail_get_participants(ApiError::Request("not a participant".to_string()));
    server.drop_connection();

    // The reconnect succeeds but the authoritative snapshot cannot be
    // fetched: membership is unprovable, so the session winds down.
    let _server2 = harness.acceptor.accept().await;
    harness
        .next_event_matching(|e| matches!(e, SessionEvent::Error { .. }))
        .await;
    harness
        .next_event_matching(
            |e| matches!(e, SessionEvent::RosterChanged(roster) if roster.is_empty()),
        )
        .await;
    assert_eq!(harness.session.state().await.unwrap(), SessionState::Idle);
}

#[tokio::test]
async fn exhausted_reconnects_surface_and_tear_down() {
    let mut harness = TestHarness::new();
    let alice = participant("alice");
    let mut server = admit_with_roster(&mut harness, vec![alice.clone()]).await;
    server.expect_send_offer().await;

    // Refuse every redial (the test config allows 3 attempts).
    harness.connector.fail_next_dials(10);
    server.drop_connection();

    harness
        .next_event_matching(|e| matches!(e, SessionEvent::Error { .. }))
        .await;
    assert_eq!(harness.session.state().await.unwrap(), SessionState::Idle);
    assert!(harness.session.roster().await.unwrap().is_empty());
    let record = harness.engine.record(&alice.connection_id);
    assert!(record.lock().unwrap().closed);
}

#[tokio::test]
async fn meeting_ended_tears_down_without_reconnect() {
    let mut harness = TestHarness::new();
    let alice = participant("alice");
    let mut server = admit_with_roster(&mut harness, vec![alice.clone()]).await;
    server.expect_send_offer().await;

    server.send(meeting_client::signaling::protocol::ServerEvent::MeetingEnded {
        reason: "host ended the meeting".to_string(),
    });

    match harness
        .next_event_matching(|e| matches!(e, SessionEvent::MeetingEnded { .. }))
        .await
    {
        SessionEvent::MeetingEnded { reason } => {
            assert_eq!(reason, "host ended the meeting");
        }
        _ => unreachable!(),
    }

    assert_eq!(harness.session.state().await.unwrap(), SessionState::Idle);
    // The closure is intentional: no redial follows.
    harness
        .acceptor
        .expect_no_connection(Duration::from_millis(100))
        .await;
}
