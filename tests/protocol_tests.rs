//! Wire-format tests: exact JSON shapes for outbound messages and the
//! server's channel-tagged frames.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use serde_json::json;

use omok_room_client::protocol::{ClientMessage, JoinResponse, Player, ServerFrame, SessionEvent};

fn to_json(msg: &ClientMessage) -> serde_json::Value {
    serde_json::to_value(msg).unwrap()
}

// ── Outbound messages ───────────────────────────────────────────────

#[test]
fn join_room_wire_shape() {
    let msg = ClientMessage::JoinRoom {
        room_id: "room-7".into(),
        username: "alice".into(),
    };
    assert_eq!(
        to_json(&msg),
        json!({
            "type": "joinRoom",
            "data": { "roomId": "room-7", "username": "alice" }
        })
    );
}

#[test]
fn leave_room_wire_shape() {
    assert_eq!(to_json(&ClientMessage::LeaveRoom), json!({ "type": "leaveRoom" }));
}

#[test]
fn send_message_wire_shape() {
    let msg = ClientMessage::SendMessage {
        content: "gl hf".into(),
    };
    assert_eq!(
        to_json(&msg),
        json!({ "type": "sendMessage", "data": { "content": "gl hf" } })
    );
}

#[test]
fn toggle_ready_wire_shape() {
    assert_eq!(
        to_json(&ClientMessage::ToggleReady),
        json!({ "type": "toggleReady" })
    );
}

#[test]
fn start_game_wire_shape() {
    assert_eq!(to_json(&ClientMessage::StartGame), json!({ "type": "startGame" }));
}

#[test]
fn update_setting_wire_shape() {
    let msg = ClientMessage::UpdateSetting {
        total_time: 60,
        num_of_section: 4,
    };
    assert_eq!(
        to_json(&msg),
        json!({
            "type": "updateSetting",
            "data": { "totalTime": 60, "numOfSection": 4 }
        })
    );
}

#[test]
fn surrender_wire_shape() {
    let msg = ClientMessage::Surrender { my_idx: 1 };
    assert_eq!(
        to_json(&msg),
        json!({ "type": "surrender", "data": { "myIdx": 1 } })
    );
}

// ── Inbound frames ──────────────────────────────────────────────────

fn parse_frame(value: serde_json::Value) -> ServerFrame {
    serde_json::from_value(value).unwrap()
}

#[test]
fn session_new_user_frame() {
    let frame = parse_frame(json!({
        "channel": "session",
        "event": { "type": "NEW_USER", "payload": { "username": "carol" } }
    }));
    assert_eq!(
        frame,
        ServerFrame::Session(SessionEvent::NewUser {
            username: "carol".into()
        })
    );
}

#[test]
fn session_exit_user_frame() {
    let frame = parse_frame(json!({
        "channel": "session",
        "event": {
            "type": "EXIT_USER",
            "payload": {
                "players": [
                    { "username": "a", "isReady": false, "isOwner": true, "isFirst": true }
                ],
                "exitUser": "b"
            }
        }
    }));
    let ServerFrame::Session(SessionEvent::ExitUser { players, exit_user }) = frame else {
        panic!("wrong variant: {frame:?}");
    };
    assert_eq!(exit_user, "b");
    assert_eq!(players.len(), 1);
    assert!(players[0].is_owner);
}

#[test]
fn session_message_frame() {
    let frame = parse_frame(json!({
        "channel": "session",
        "event": { "type": "MESSAGE", "payload": { "username": "a", "content": "hey" } }
    }));
    assert_eq!(
        frame,
        ServerFrame::Session(SessionEvent::Message {
            username: "a".into(),
            content: "hey".into()
        })
    );
}

#[test]
fn session_setting_frame() {
    let frame = parse_frame(json!({
        "channel": "session",
        "event": { "type": "SETTING", "payload": { "totalTime": 90, "numOfSection": 5 } }
    }));
    assert_eq!(
        frame,
        ServerFrame::Session(SessionEvent::Setting {
            total_time: 90,
            num_of_section: Some(5)
        })
    );
}

#[test]
fn session_start_and_end_frames() {
    assert_eq!(
        parse_frame(json!({
            "channel": "session",
            "event": { "type": "START", "payload": { "turnIdx": 1 } }
        })),
        ServerFrame::Session(SessionEvent::Start { turn_idx: 1 })
    );
    assert_eq!(
        parse_frame(json!({
            "channel": "session",
            "event": { "type": "END", "payload": { "winnerIdx": 0 } }
        })),
        ServerFrame::Session(SessionEvent::End { winner_idx: 0 })
    );
}

#[test]
fn session_another_connection_frame_with_message() {
    let frame = parse_frame(json!({
        "channel": "session",
        "event": {
            "type": "ANOTHER_CONNECTION",
            "payload": { "message": "connected from another device" }
        }
    }));
    assert!(matches!(
        frame,
        ServerFrame::Session(SessionEvent::AnotherConnection(Some(notice)))
            if notice.message.as_deref() == Some("connected from another device")
    ));
}

#[test]
fn session_another_connection_frame_without_payload() {
    // The server may send the takeover as a bare tag.
    let frame = parse_frame(json!({
        "channel": "session",
        "event": { "type": "ANOTHER_CONNECTION" }
    }));
    assert_eq!(
        frame,
        ServerFrame::Session(SessionEvent::AnotherConnection(None))
    );
}

#[test]
fn session_another_connection_frame_with_empty_payload() {
    let frame = parse_frame(json!({
        "channel": "session",
        "event": { "type": "ANOTHER_CONNECTION", "payload": {} }
    }));
    assert!(matches!(
        frame,
        ServerFrame::Session(SessionEvent::AnotherConnection(Some(notice)))
            if notice.message.is_none()
    ));
}

#[test]
fn timer_frame_is_bare_seconds() {
    assert_eq!(
        parse_frame(json!({ "channel": "timer", "event": 17 })),
        ServerFrame::Timer(17)
    );
}

#[test]
fn game_frame_stays_opaque() {
    let frame = parse_frame(json!({
        "channel": "game",
        "event": { "position": 112, "extra": { "depth": 3 } }
    }));
    let ServerFrame::Game(event) = frame else {
        panic!("wrong variant: {frame:?}");
    };
    assert_eq!(event["position"], 112);
    assert_eq!(event["extra"]["depth"], 3);
}

#[test]
fn join_response_success_frame() {
    let frame = parse_frame(json!({
        "channel": "responseJoinRoom",
        "event": {
            "success": true,
            "data": {
                "players": [
                    { "username": "a", "isReady": true, "isOwner": true, "isFirst": true },
                    { "username": "b", "isReady": false, "isOwner": false, "isFirst": false }
                ],
                "isStarted": true,
                "turnIdx": 1,
                "totalTime": 60,
                "numOfSection": 3,
                "history": [ { "position": 40 } ]
            }
        }
    }));
    let ServerFrame::ResponseJoinRoom(JoinResponse {
        success,
        data: Some(data),
        ..
    }) = frame
    else {
        panic!("wrong variant: {frame:?}");
    };
    assert!(success);
    assert!(data.is_started);
    assert_eq!(data.turn_idx, Some(1));
    assert_eq!(data.total_time, 60);
    assert_eq!(data.history[0]["position"], 40);
}

#[test]
fn join_response_failure_frame() {
    let frame = parse_frame(json!({
        "channel": "responseJoinRoom",
        "event": { "success": false, "message": "room is full" }
    }));
    assert_eq!(
        frame,
        ServerFrame::ResponseJoinRoom(JoinResponse {
            success: false,
            data: None,
            message: Some("room is full".into()),
        })
    );
}

#[test]
fn player_flags_default_to_false() {
    let player: Player = serde_json::from_value(json!({ "username": "d" })).unwrap();
    assert!(!player.is_ready);
    assert!(!player.is_owner);
    assert!(!player.is_first);
}

#[test]
fn unknown_session_event_type_fails_to_parse() {
    let result: Result<ServerFrame, _> = serde_json::from_value(json!({
        "channel": "session",
        "event": { "type": "SOMETHING_NEW", "payload": {} }
    }));
    assert!(result.is_err());
}

#[test]
fn unknown_channel_fails_to_parse() {
    let result: Result<ServerFrame, _> = serde_json::from_value(json!({
        "channel": "spectator",
        "event": {}
    }));
    assert!(result.is_err());
}
