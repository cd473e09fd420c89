//! End-to-end tests for the room session controller, driven through a mock
//! transport: the test plays the server, pushing frames and observing both
//! the published state snapshots and the messages the client sends.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod common;

use common::*;
use serde_json::json;
use tokio::sync::{mpsc, watch};

use omok_room_client::protocol::{ClientMessage, SessionEvent};
use omok_room_client::state::LogEntry;
use omok_room_client::{RoomClient, RoomConfig, RoomError, RoomSignal, SessionState};

fn start_client() -> (
    RoomClient,
    watch::Receiver<SessionState>,
    mpsc::Receiver<RoomSignal>,
    ServerHandle,
    RecordingBoard,
    RecordingNavigator,
) {
    let (transport, server) = mock_transport();
    let board = RecordingBoard::new();
    let navigator = RecordingNavigator::new();
    let (client, state, signals) = RoomClient::start(
        transport,
        board.clone(),
        navigator.clone(),
        RoomConfig::new(),
    );
    (client, state, signals, server, board, navigator)
}

/// Join `room-1` as `username` against a standard two-player room and wait
/// until the joined snapshot is published.
async fn join_as(
    client: &RoomClient,
    state: &mut watch::Receiver<SessionState>,
    server: &ServerHandle,
    username: &str,
) {
    client.join("room-1", username).unwrap();
    wait_for_sent(server, 1).await;
    server.push_frame(&join_success(two_players()));
    wait_for_state(state, |s| s.is_joined).await;
}

// ── Join ────────────────────────────────────────────────────────────

#[tokio::test]
async fn join_success_derives_seat_from_username() {
    let (mut client, mut state, _signals, server, _board, _nav) = start_client();

    join_as(&client, &mut state, &server, "b").await;

    let snapshot = client.state();
    assert_eq!(snapshot.room_id.as_deref(), Some("room-1"));
    assert_eq!(snapshot.my_idx, Some(1));
    assert_eq!(snapshot.is_owner, Some(false));
    assert!(matches!(
        snapshot.chat_log.last(),
        Some(LogEntry::Notice { message }) if message == "b joined the room"
    ));

    client.shutdown().await;
}

#[tokio::test]
async fn join_rejection_navigates_to_root_and_resets() {
    let (mut client, mut state, _signals, server, _board, nav) = start_client();

    client.join("room-1", "b").unwrap();
    wait_for_sent(&server, 1).await;
    server.push_frame(&join_failure("room is full"));

    // The rejection runs the full leave effect: navigate, reset, notify.
    let sent = wait_for_sent(&server, 2).await;
    assert!(matches!(sent[0], ClientMessage::JoinRoom { .. }));
    assert!(matches!(sent[1], ClientMessage::LeaveRoom));
    wait_until(|| (nav.root_navigations() == 1).then_some(())).await;

    let snapshot = wait_for_state(&mut state, |s| s.room_id.is_none()).await;
    assert_eq!(snapshot, SessionState::default());

    client.shutdown().await;
}

#[tokio::test]
async fn second_join_while_joined_is_ignored() {
    let (mut client, mut state, _signals, server, _board, _nav) = start_client();

    join_as(&client, &mut state, &server, "b").await;
    client.join("room-2", "b").unwrap();
    settle().await;

    // No second joinRoom went out; the room membership is untouched.
    let sent = server.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(client.state().room_id.as_deref(), Some("room-1"));

    client.shutdown().await;
}

// ── Forced disconnect ───────────────────────────────────────────────

#[tokio::test]
async fn session_takeover_leaves_without_notifying_server() {
    let (mut client, mut state, _signals, server, _board, nav) = start_client();

    join_as(&client, &mut state, &server, "b").await;
    // The takeover event arrives with no payload at all.
    server.push_raw(r#"{"channel":"session","event":{"type":"ANOTHER_CONNECTION"}}"#);

    wait_until(|| (nav.root_navigations() == 1).then_some(())).await;
    settle().await;

    // The server already dropped this session, so no leaveRoom goes out.
    let sent = server.sent_messages();
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0], ClientMessage::JoinRoom { .. }));
    assert!(!client.state().is_joined);

    client.shutdown().await;
}

// ── Game flow ───────────────────────────────────────────────────────

#[tokio::test]
async fn full_game_flow_from_lobby_to_end() {
    let (mut client, mut state, _signals, server, board, _nav) = start_client();
    board.script_turns([Some(1)]);

    join_as(&client, &mut state, &server, "a").await;

    // Opponent readies up.
    server.push_frame(&session_frame(SessionEvent::ToggleReady {
        username: "b".into(),
    }));
    wait_for_state(&mut state, |s| s.players[1].is_ready).await;

    // Owner starts; server confirms with the opening seat.
    client.request_start().unwrap();
    let sent = wait_for_sent(&server, 2).await;
    assert!(matches!(sent[1], ClientMessage::StartGame));

    server.push_frame(&session_frame(SessionEvent::Start { turn_idx: 0 }));
    let started = wait_for_state(&mut state, |s| s.is_started).await;
    assert!(started.is_my_turn);
    assert_eq!(started.remain_time, 30);
    assert!(board.calls().contains(&BoardCall::InitGame(Some(3))));

    // Countdown ticks replace the remaining time.
    settle().await;
    server.push_frame(&timer_frame(25));
    wait_for_state(&mut state, |s| s.remain_time == 25).await;

    // A validated move passes the turn to the opponent.
    server.push_frame(&game_frame(json!({ "position": 5 })));
    let after_move = wait_for_state(&mut state, |s| s.turn_idx == Some(1)).await;
    assert!(!after_move.is_my_turn);

    // Game over; ready flags reset to ownership, first-mover alternates.
    server.push_frame(&session_frame(SessionEvent::End { winner_idx: 0 }));
    let ended = wait_for_state(&mut state, |s| !s.is_started).await;
    assert!(matches!(
        ended.chat_log.last(),
        Some(LogEntry::Notice { message }) if message == "you won the game"
    ));
    assert!(ended.players[0].is_ready);
    assert!(!ended.players[1].is_ready);
    assert!(!ended.players[0].is_first);
    assert!(ended.players[1].is_first);

    // The timer channel closed with the game: late ticks change nothing.
    settle().await;
    server.push_frame(&timer_frame(7));
    settle().await;
    assert_eq!(client.state().remain_time, 25);

    client.shutdown().await;
}

#[tokio::test]
async fn mid_game_join_resumes_with_history() {
    let (mut client, mut state, _signals, server, board, _nav) = start_client();

    client.join("room-1", "b").unwrap();
    wait_for_sent(&server, 1).await;
    let history = json!([{ "position": 3 }, { "position": 17 }]);
    server.push_frame(&join_success_mid_game(two_players(), 1, history.clone()));

    let snapshot = wait_for_state(&mut state, |s| s.is_joined).await;
    assert!(snapshot.is_started);
    assert!(snapshot.is_my_turn);

    // The board got the history; no fresh game was initialized.
    let calls = board.calls();
    assert!(calls.contains(&BoardCall::LoadHistory(history)));
    assert!(!calls.iter().any(|c| matches!(c, BoardCall::InitGame(_))));

    // The timer channel is live immediately on resume.
    settle().await;
    server.push_frame(&timer_frame(12));
    wait_for_state(&mut state, |s| s.remain_time == 12).await;

    client.shutdown().await;
}

#[tokio::test]
async fn surrender_carries_own_seat_index() {
    let (mut client, mut state, _signals, server, _board, _nav) = start_client();

    join_as(&client, &mut state, &server, "b").await;
    server.push_frame(&session_frame(SessionEvent::Start { turn_idx: 0 }));
    wait_for_state(&mut state, |s| s.is_started).await;

    client.request_surrender().unwrap();
    let sent = wait_for_sent(&server, 2).await;
    assert!(matches!(sent[1], ClientMessage::Surrender { my_idx: 1 }));

    client.shutdown().await;
}

#[tokio::test]
async fn surrender_outside_game_is_ignored() {
    let (mut client, mut state, _signals, server, _board, _nav) = start_client();

    join_as(&client, &mut state, &server, "b").await;
    client.request_surrender().unwrap();
    settle().await;

    assert_eq!(server.sent_messages().len(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn start_rejection_is_a_signal_not_a_state_change() {
    let (mut client, mut state, mut signals, server, _board, _nav) = start_client();

    join_as(&client, &mut state, &server, "a").await;
    server.push_frame(&session_frame(SessionEvent::StartError {
        message: "every player must be ready".into(),
    }));

    let signal = signals.recv().await.unwrap();
    assert_eq!(
        signal,
        RoomSignal::StartRejected {
            message: "every player must be ready".into()
        }
    );
    assert!(!client.state().is_started);

    client.shutdown().await;
}

#[tokio::test]
async fn non_owner_start_request_is_dropped() {
    let (mut client, mut state, _signals, server, _board, _nav) = start_client();

    join_as(&client, &mut state, &server, "b").await;
    client.request_start().unwrap();
    settle().await;

    assert_eq!(server.sent_messages().len(), 1);

    client.shutdown().await;
}

// ── Chat and ready ──────────────────────────────────────────────────

#[tokio::test]
async fn own_chat_is_applied_optimistically() {
    let (mut client, mut state, _signals, server, _board, _nav) = start_client();

    join_as(&client, &mut state, &server, "b").await;
    client.change_chat_input("hi there").unwrap();
    client.send_chat().unwrap();

    let sent = wait_for_sent(&server, 2).await;
    assert!(matches!(
        &sent[1],
        ClientMessage::SendMessage { content } if content == "hi there"
    ));

    let snapshot = wait_for_state(&mut state, |s| s.chat_input.is_empty()).await;
    assert!(matches!(
        snapshot.chat_log.last(),
        Some(LogEntry::Chat { is_self: true, content, .. }) if content == "hi there"
    ));

    client.shutdown().await;
}

#[tokio::test]
async fn peer_chat_arrives_with_is_self_cleared() {
    let (mut client, mut state, _signals, server, _board, _nav) = start_client();

    join_as(&client, &mut state, &server, "b").await;
    server.push_frame(&session_frame(SessionEvent::Message {
        username: "a".into(),
        content: "hello".into(),
    }));

    let snapshot = wait_for_state(&mut state, |s| {
        matches!(s.chat_log.last(), Some(LogEntry::Chat { .. }))
    })
    .await;
    assert!(matches!(
        snapshot.chat_log.last(),
        Some(LogEntry::Chat { is_self: false, username, .. }) if username == "a"
    ));

    client.shutdown().await;
}

#[tokio::test]
async fn ready_toggle_is_applied_optimistically() {
    let (mut client, mut state, _signals, server, _board, _nav) = start_client();

    join_as(&client, &mut state, &server, "b").await;
    client.toggle_ready().unwrap();

    let sent = wait_for_sent(&server, 2).await;
    assert!(matches!(sent[1], ClientMessage::ToggleReady));
    wait_for_state(&mut state, |s| s.players[1].is_ready).await;

    client.shutdown().await;
}

// ── Settings ────────────────────────────────────────────────────────

#[tokio::test]
async fn setting_update_round_trip() {
    let (mut client, mut state, _signals, server, board, _nav) = start_client();

    join_as(&client, &mut state, &server, "a").await;
    client.open_setting().unwrap();
    wait_for_state(&mut state, |s| s.setting.is_open).await;

    client.confirm_setting(60, 4).unwrap();
    let sent = wait_for_sent(&server, 2).await;
    assert!(matches!(
        sent[1],
        ClientMessage::UpdateSetting {
            total_time: 60,
            num_of_section: 4
        }
    ));

    // The local copy only changes when the server echoes the setting.
    server.push_frame(&session_frame(SessionEvent::Setting {
        total_time: 60,
        num_of_section: Some(4),
    }));
    let snapshot = wait_for_state(&mut state, |s| s.setting.total_time == 60).await;
    assert!(!snapshot.setting.is_open);
    assert_eq!(snapshot.setting.num_of_section, Some(4));
    assert_eq!(snapshot.remain_time, 60);
    assert!(board.calls().contains(&BoardCall::ResetHistory));

    client.shutdown().await;
}

#[tokio::test]
async fn confirm_setting_requires_open_panel() {
    let (mut client, mut state, _signals, server, _board, _nav) = start_client();

    join_as(&client, &mut state, &server, "a").await;
    client.confirm_setting(60, 4).unwrap();
    settle().await;

    assert_eq!(server.sent_messages().len(), 1);

    client.shutdown().await;
}

// ── Room membership ─────────────────────────────────────────────────

#[tokio::test]
async fn leave_notifies_server_and_resets() {
    let (mut client, mut state, _signals, server, _board, nav) = start_client();

    join_as(&client, &mut state, &server, "b").await;
    client.leave().unwrap();

    let sent = wait_for_sent(&server, 2).await;
    assert!(matches!(sent[1], ClientMessage::LeaveRoom));
    wait_until(|| (nav.root_navigations() == 1).then_some(())).await;
    let snapshot = wait_for_state(&mut state, |s| !s.is_joined).await;
    assert_eq!(snapshot, SessionState::default());

    client.shutdown().await;
}

#[tokio::test]
async fn exit_user_promotes_remaining_player() {
    let (mut client, mut state, _signals, server, _board, _nav) = start_client();

    join_as(&client, &mut state, &server, "b").await;
    server.push_frame(&session_frame(SessionEvent::ExitUser {
        players: vec![player("b", false)],
        exit_user: "a".into(),
    }));

    let snapshot = wait_for_state(&mut state, |s| s.players.len() == 1).await;
    assert_eq!(snapshot.my_idx, Some(0));
    assert_eq!(snapshot.is_owner, Some(true));
    assert!(matches!(
        snapshot.chat_log.last(),
        Some(LogEntry::Notice { message }) if message == "a left the room"
    ));

    client.shutdown().await;
}

#[tokio::test]
async fn new_user_appends_to_player_list() {
    let (mut client, mut state, _signals, server, _board, _nav) = start_client();

    join_as(&client, &mut state, &server, "a").await;
    server.push_frame(&session_frame(SessionEvent::NewUser {
        username: "c".into(),
    }));

    let snapshot = wait_for_state(&mut state, |s| s.players.len() == 3).await;
    assert_eq!(snapshot.players[2].username, "c");
    assert!(!snapshot.players[2].is_ready);

    client.shutdown().await;
}

// ── Faults ──────────────────────────────────────────────────────────

#[tokio::test]
async fn transport_error_surfaces_a_channel_fault() {
    let (mut client, mut state, mut signals, server, _board, _nav) = start_client();

    join_as(&client, &mut state, &server, "b").await;
    server.push_error(RoomError::TransportReceive("connection reset".into()));

    let signal = signals.recv().await.unwrap();
    assert!(matches!(
        signal,
        RoomSignal::ChannelFault { reason: Some(reason) } if reason.contains("connection reset")
    ));

    let snapshot = client.state();
    assert!(matches!(
        snapshot.chat_log.last(),
        Some(LogEntry::Notice { message }) if message == "connection to the server was lost"
    ));
    wait_until(|| (!client.is_connected()).then_some(())).await;

    client.shutdown().await;
}

#[tokio::test]
async fn commands_after_disconnect_return_not_connected() {
    let (mut client, mut state, mut signals, server, _board, _nav) = start_client();

    join_as(&client, &mut state, &server, "b").await;
    drop(server);
    signals.recv().await.unwrap();

    assert!(matches!(client.leave(), Err(RoomError::NotConnected)));
    assert!(matches!(
        client.send_chat(),
        Err(RoomError::NotConnected)
    ));

    client.shutdown().await;
}
