//! Wire types for the omok room session protocol.
//!
//! Every message on the wire is one JSON text frame. Outbound intents are
//! [`ClientMessage`]s; inbound frames are [`ServerFrame`]s, an envelope that
//! names the logical channel (`session`, `timer`, `game`) or the one-shot
//! `responseJoinRoom` the payload belongs to. The physical connection is a
//! single ordered stream; the channel name is what the [`ChannelRouter`]
//! demultiplexes on.
//!
//! [`ChannelRouter`]: crate::channel::ChannelRouter

use serde::{Deserialize, Serialize};

// ── Players ─────────────────────────────────────────────────────────

/// Information about a player in a room.
///
/// `username` is unique within a room (a server guarantee, not locally
/// enforced). The three flags default to `false` because `NEW_USER` events
/// carry only a username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub username: String,
    #[serde(default)]
    pub is_ready: bool,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default)]
    pub is_first: bool,
}

impl Player {
    /// A player as first seen through a `NEW_USER` event: name only, all
    /// flags cleared.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            is_ready: false,
            is_owner: false,
            is_first: false,
        }
    }
}

// ── Outbound messages ───────────────────────────────────────────────

/// Message types sent from client to server.
///
/// All messages are fire-and-forget except [`JoinRoom`](ClientMessage::JoinRoom),
/// which is answered by a single `responseJoinRoom` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Join the given room under the given display name.
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String, username: String },
    /// Leave the current room.
    LeaveRoom,
    /// Send a chat message to the room.
    SendMessage { content: String },
    /// Flip this player's ready flag.
    ToggleReady,
    /// Ask the server to start the game (owner only).
    StartGame,
    /// Propose new game settings (owner only).
    #[serde(rename_all = "camelCase")]
    UpdateSetting {
        total_time: u64,
        num_of_section: u32,
    },
    /// Concede the running game.
    #[serde(rename_all = "camelCase")]
    Surrender { my_idx: usize },
}

// ── Inbound frames ──────────────────────────────────────────────────

/// Envelope for every server-pushed frame, tagged with the logical channel
/// it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "event", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Room-level event on the `session` channel.
    Session(SessionEvent),
    /// Per-turn countdown tick: bare remaining seconds.
    Timer(u64),
    /// Board move on the `game` channel. Opaque to this crate; forwarded
    /// whole to the board engine collaborator.
    Game(serde_json::Value),
    /// Single response to an outstanding `joinRoom`.
    ResponseJoinRoom(JoinResponse),
}

/// Events delivered on the `session` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SessionEvent {
    /// A new player entered the room.
    #[serde(rename = "NEW_USER")]
    NewUser { username: String },
    /// A player left; `players` is the server's authoritative replacement
    /// list for the whole room.
    #[serde(rename = "EXIT_USER", rename_all = "camelCase")]
    ExitUser {
        players: Vec<Player>,
        exit_user: String,
    },
    /// Chat message from another player.
    #[serde(rename = "MESSAGE")]
    Message { username: String, content: String },
    /// A player's ready flag flipped.
    #[serde(rename = "TOGGLE_READY")]
    ToggleReady { username: String },
    /// The room settings changed.
    #[serde(rename = "SETTING", rename_all = "camelCase")]
    Setting {
        total_time: u64,
        num_of_section: Option<u32>,
    },
    /// The game started; `turn_idx` is the opening seat.
    #[serde(rename = "START", rename_all = "camelCase")]
    Start { turn_idx: usize },
    /// The server rejected a start request.
    #[serde(rename = "START_ERROR")]
    StartError { message: String },
    /// The game ended; `winner_idx` is the winning seat.
    #[serde(rename = "END", rename_all = "camelCase")]
    End { winner_idx: usize },
    /// Another device took over this session; the server has already
    /// dropped this connection's membership.
    ///
    /// The payload is optional on the wire: a bare tag, an empty payload and
    /// a payload with a message all parse. The controller falls back to a
    /// local message when none is supplied.
    #[serde(rename = "ANOTHER_CONNECTION")]
    AnotherConnection(Option<TakeoverNotice>),
}

/// Optional payload of an `ANOTHER_CONNECTION` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeoverNotice {
    #[serde(default)]
    pub message: Option<String>,
}

// ── Join response ───────────────────────────────────────────────────

/// Response to `joinRoom`. On success `data` is present; on failure
/// `message` carries the server's reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JoinData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Successful join payload: the room as it currently stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinData {
    pub players: Vec<Player>,
    pub is_started: bool,
    #[serde(default)]
    pub turn_idx: Option<usize>,
    pub total_time: u64,
    #[serde(default)]
    pub num_of_section: Option<u32>,
    /// Move history for a mid-game resume. Opaque to this crate; delivered
    /// whole to the board engine when `is_started` is set.
    #[serde(default)]
    pub history: serde_json::Value,
}
