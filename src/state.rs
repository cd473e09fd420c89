//! Session state and its transition table.
//!
//! [`SessionState`] is a single owned record describing one room membership:
//! who is in the room, the chat log, the game envelope (started flag, turn
//! ownership, countdown) and the negotiated settings. It is mutated only by
//! replacement through [`SessionState::apply`], a pure transition function —
//! every field of the result is fully determined by the input state and the
//! [`Action`], so no stale sub-object can leak across a transition.
//!
//! The controller in [`client`](crate::client) is the only caller of
//! `apply`; collaborators observe snapshots through a `watch` channel.

use serde::{Deserialize, Serialize};

use crate::protocol::Player;

// ── Chat log ────────────────────────────────────────────────────────

/// One entry in the room chat log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LogEntry {
    /// System notice (joins, leaves, game start/end, faults).
    Notice { message: String },
    /// Chat message. `is_self` distinguishes the optimistic local append
    /// from messages received over the session channel.
    #[serde(rename_all = "camelCase")]
    Chat {
        username: String,
        is_self: bool,
        content: String,
    },
}

// ── Settings ────────────────────────────────────────────────────────

/// Negotiated game settings plus the local settings-panel flag.
///
/// `is_open` is controller-local UI state; it never travels on the wire and
/// never survives a leave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSetting {
    pub is_open: bool,
    pub total_time: u64,
    pub num_of_section: Option<u32>,
}

impl Default for GameSetting {
    fn default() -> Self {
        Self {
            is_open: false,
            total_time: 30,
            num_of_section: None,
        }
    }
}

// ── Join errors ─────────────────────────────────────────────────────

/// Why a join attempt (or a whole session) ended in error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinErrorKind {
    /// The server rejected the join request.
    Rejected,
    /// Another device took over this session.
    AnotherConnection,
}

/// A join failure surfaced in state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinError {
    pub kind: JoinErrorKind,
    pub message: String,
}

// ── Session state ───────────────────────────────────────────────────

/// The full client-side view of one room membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub is_joined: bool,
    pub room_id: Option<String>,
    /// Seat order is authoritative turn order.
    pub players: Vec<Player>,
    /// This client's index into `players`.
    pub my_idx: Option<usize>,
    pub is_owner: Option<bool>,
    pub chat_log: Vec<LogEntry>,
    /// Pending compose buffer.
    pub chat_input: String,
    pub is_started: bool,
    pub turn_idx: Option<usize>,
    /// Always `turn_idx == my_idx` (both present); recomputed on every
    /// transition that changes either, never lazily.
    pub is_my_turn: bool,
    pub join_error: Option<JoinError>,
    pub remain_time: u64,
    pub setting: GameSetting,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            is_joined: false,
            room_id: None,
            players: Vec::new(),
            my_idx: None,
            is_owner: None,
            chat_log: Vec::new(),
            chat_input: String::new(),
            is_started: false,
            turn_idx: None,
            is_my_turn: false,
            join_error: None,
            remain_time: 30,
            setting: GameSetting::default(),
        }
    }
}

// ── Actions ─────────────────────────────────────────────────────────

/// Inputs to the transition table. One action, one transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Reset everything to defaults (leave, or room entry before a join).
    Initialize,
    /// Record the room id ahead of the join round-trip.
    SetRoomId(String),
    /// Successful `responseJoinRoom`: adopt the server's room snapshot and
    /// derive this client's seat and ownership from `username`.
    JoinSucceeded {
        username: String,
        players: Vec<Player>,
        is_started: bool,
        turn_idx: Option<usize>,
        total_time: u64,
        num_of_section: Option<u32>,
    },
    /// The join attempt (or the whole session) failed.
    JoinFailed(JoinError),
    /// A new player entered the room.
    PlayerJoined { username: String },
    /// A player left; the server's replacement list is adopted wholesale.
    /// Seat and ownership are reassigned to the first slot — a deliberate
    /// two-participant simplification carried over from the original
    /// behavior.
    PlayerExited {
        players: Vec<Player>,
        exit_user: String,
    },
    /// Edit the compose buffer.
    ChatInputChanged(String),
    /// Clear the compose buffer (after a send).
    ChatInputCleared,
    /// Append a chat entry (own optimistic send or a received `MESSAGE`).
    ChatReceived {
        username: String,
        is_self: bool,
        content: String,
    },
    /// Append a system notice.
    NoticePosted(String),
    /// Flip one player's ready flag by username; a miss is a no-op.
    ReadyToggled { username: String },
    /// Open the settings panel (local only).
    SettingOpened,
    /// Close the settings panel (local only).
    SettingClosed,
    /// Adopt new settings from the server; closes the panel.
    SettingUpdated {
        total_time: u64,
        num_of_section: Option<u32>,
    },
    /// The game started with the given opening seat.
    GameStarted { turn_idx: usize },
    /// The game ended with the given winning seat.
    GameEnded { winner_idx: usize },
    /// Turn ownership moved to the given seat.
    TurnUpdated(usize),
    /// Reset the countdown to the configured total time.
    TimerReset,
    /// Replace the countdown with a server tick.
    TimerUpdated(u64),
}

/// `turn_idx == my_idx`, requiring both to be present.
fn my_turn(turn_idx: Option<usize>, my_idx: Option<usize>) -> bool {
    matches!((turn_idx, my_idx), (Some(t), Some(m)) if t == m)
}

impl SessionState {
    /// Apply one transition, consuming the current state and returning the
    /// next. Pure: no I/O, no channel side effects.
    #[must_use]
    pub fn apply(self, action: Action) -> SessionState {
        match action {
            Action::Initialize => SessionState::default(),

            Action::SetRoomId(room_id) => SessionState {
                room_id: Some(room_id),
                ..self
            },

            Action::JoinSucceeded {
                username,
                players,
                is_started,
                turn_idx,
                total_time,
                num_of_section,
            } => {
                let my_idx = players.iter().position(|p| p.username == username);
                let is_owner = my_idx
                    .and_then(|idx| players.get(idx))
                    .map(|p| p.is_owner);
                let mut next = self;
                next.is_joined = true;
                next.join_error = None;
                next.is_owner = is_owner;
                next.my_idx = my_idx;
                next.is_my_turn = my_turn(turn_idx, my_idx);
                next.players = players;
                next.is_started = is_started;
                next.turn_idx = turn_idx;
                next.chat_log.push(LogEntry::Notice {
                    message: format!("{username} joined the room"),
                });
                next.setting.total_time = total_time;
                next.setting.num_of_section = num_of_section;
                next
            }

            Action::JoinFailed(error) => SessionState {
                join_error: Some(error),
                ..self
            },

            Action::PlayerJoined { username } => {
                let mut next = self;
                next.players.push(Player::new(username.clone()));
                next.chat_log.push(LogEntry::Notice {
                    message: format!("{username} joined the room"),
                });
                next
            }

            Action::PlayerExited { players, exit_user } => {
                let mut next = self;
                next.players = players;
                next.chat_log.push(LogEntry::Notice {
                    message: format!("{exit_user} left the room"),
                });
                next.my_idx = Some(0);
                next.is_owner = Some(true);
                next.is_my_turn = my_turn(next.turn_idx, next.my_idx);
                next
            }

            Action::ChatInputChanged(text) => SessionState {
                chat_input: text,
                ..self
            },

            Action::ChatInputCleared => SessionState {
                chat_input: String::new(),
                ..self
            },

            Action::ChatReceived {
                username,
                is_self,
                content,
            } => {
                let mut next = self;
                next.chat_log.push(LogEntry::Chat {
                    username,
                    is_self,
                    content,
                });
                next
            }

            Action::NoticePosted(message) => {
                let mut next = self;
                next.chat_log.push(LogEntry::Notice { message });
                next
            }

            Action::ReadyToggled { username } => {
                let mut next = self;
                for p in next.players.iter_mut() {
                    if p.username == username {
                        p.is_ready = !p.is_ready;
                    }
                }
                next
            }

            Action::SettingOpened => {
                let mut next = self;
                next.setting.is_open = true;
                next
            }

            Action::SettingClosed => {
                let mut next = self;
                next.setting.is_open = false;
                next
            }

            Action::SettingUpdated {
                total_time,
                num_of_section,
            } => {
                let mut next = self;
                next.setting = GameSetting {
                    is_open: false,
                    total_time,
                    num_of_section,
                };
                next
            }

            Action::GameStarted { turn_idx } => {
                let mut next = self;
                next.is_started = true;
                next.turn_idx = Some(turn_idx);
                next.is_my_turn = my_turn(Some(turn_idx), next.my_idx);
                next.chat_log.push(LogEntry::Notice {
                    message: "game started".to_string(),
                });
                next
            }

            Action::GameEnded { winner_idx } => {
                let mut next = self;
                for p in next.players.iter_mut() {
                    p.is_first = !p.is_first;
                    // Next round's ready default: the owner is pre-ready.
                    p.is_ready = p.is_owner;
                }
                let message = if Some(winner_idx) == next.my_idx {
                    "you won the game".to_string()
                } else {
                    "you lost the game".to_string()
                };
                next.chat_log.push(LogEntry::Notice { message });
                next.is_started = false;
                next.turn_idx = None;
                next.is_my_turn = false;
                next
            }

            Action::TurnUpdated(turn_idx) => SessionState {
                turn_idx: Some(turn_idx),
                is_my_turn: my_turn(Some(turn_idx), self.my_idx),
                ..self
            },

            Action::TimerReset => SessionState {
                remain_time: self.setting.total_time,
                ..self
            },

            Action::TimerUpdated(remain_time) => SessionState {
                remain_time,
                ..self
            },
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn player(username: &str, is_owner: bool) -> Player {
        Player {
            username: username.into(),
            is_ready: false,
            is_owner,
            is_first: is_owner,
        }
    }

    fn two_player_room() -> Vec<Player> {
        vec![player("a", true), player("b", false)]
    }

    fn joined_as(username: &str) -> SessionState {
        SessionState::default().apply(Action::JoinSucceeded {
            username: username.into(),
            players: two_player_room(),
            is_started: false,
            turn_idx: None,
            total_time: 30,
            num_of_section: Some(3),
        })
    }

    fn assert_turn_invariant(state: &SessionState) {
        let expected =
            matches!((state.turn_idx, state.my_idx), (Some(t), Some(m)) if t == m);
        assert_eq!(
            state.is_my_turn, expected,
            "is_my_turn must equal (turn_idx == my_idx): {state:?}"
        );
    }

    #[test]
    fn defaults_match_documented_initial_state() {
        let state = SessionState::default();
        assert!(!state.is_joined);
        assert!(state.room_id.is_none());
        assert!(state.players.is_empty());
        assert!(state.my_idx.is_none());
        assert!(state.is_owner.is_none());
        assert!(state.chat_log.is_empty());
        assert_eq!(state.chat_input, "");
        assert!(!state.is_started);
        assert!(state.turn_idx.is_none());
        assert!(!state.is_my_turn);
        assert!(state.join_error.is_none());
        assert_eq!(state.remain_time, 30);
        assert_eq!(state.setting, GameSetting::default());
    }

    #[test]
    fn join_success_derives_seat_and_ownership() {
        let state = joined_as("b");
        assert!(state.is_joined);
        assert_eq!(state.my_idx, Some(1));
        assert_eq!(state.is_owner, Some(false));
        assert_eq!(state.setting.num_of_section, Some(3));
        assert!(matches!(
            state.chat_log.last(),
            Some(LogEntry::Notice { message }) if message.contains('b')
        ));
        assert_turn_invariant(&state);
    }

    #[test]
    fn join_success_as_owner() {
        let state = joined_as("a");
        assert_eq!(state.my_idx, Some(0));
        assert_eq!(state.is_owner, Some(true));
    }

    #[test]
    fn join_success_mid_game_computes_turn() {
        let state = SessionState::default().apply(Action::JoinSucceeded {
            username: "b".into(),
            players: two_player_room(),
            is_started: true,
            turn_idx: Some(1),
            total_time: 60,
            num_of_section: Some(3),
        });
        assert!(state.is_started);
        assert_eq!(state.turn_idx, Some(1));
        assert!(state.is_my_turn);
        assert_turn_invariant(&state);
    }

    #[test]
    fn initialize_resets_to_defaults_from_any_state() {
        let mut state = joined_as("b");
        state = state.apply(Action::GameStarted { turn_idx: 0 });
        state = state.apply(Action::ChatInputChanged("draft".into()));
        state = state.apply(Action::TimerUpdated(7));
        state = state.apply(Action::SettingOpened);

        let reset = state.apply(Action::Initialize);
        assert_eq!(reset, SessionState::default());
    }

    #[test]
    fn exit_user_reassigns_first_seat_and_ownership() {
        let state = joined_as("b").apply(Action::PlayerExited {
            players: vec![player("a", true)],
            exit_user: "b".into(),
        });
        assert_eq!(state.my_idx, Some(0));
        assert_eq!(state.is_owner, Some(true));
        assert_eq!(state.players.len(), 1);
        assert!(matches!(
            state.chat_log.last(),
            Some(LogEntry::Notice { message }) if message.contains("left")
        ));
        assert_turn_invariant(&state);
    }

    #[test]
    fn exit_user_recomputes_turn_ownership() {
        // Seat is forced to 0 while a game is running: the invariant must
        // hold against the unchanged turn_idx.
        let mut state = joined_as("b").apply(Action::GameStarted { turn_idx: 0 });
        assert!(!state.is_my_turn);
        state = state.apply(Action::PlayerExited {
            players: vec![player("b", false)],
            exit_user: "a".into(),
        });
        assert_eq!(state.my_idx, Some(0));
        assert!(state.is_my_turn);
        assert_turn_invariant(&state);
    }

    #[test]
    fn new_player_appends_unready() {
        let state = joined_as("a").apply(Action::PlayerJoined {
            username: "c".into(),
        });
        let last = state.players.last().unwrap();
        assert_eq!(last.username, "c");
        assert!(!last.is_ready);
        assert!(!last.is_owner);
    }

    #[test]
    fn setting_update_closes_panel_and_timer_reset_adopts_total() {
        let mut state = joined_as("a").apply(Action::SettingOpened);
        assert!(state.setting.is_open);
        state = state.apply(Action::SettingUpdated {
            total_time: 60,
            num_of_section: Some(3),
        });
        state = state.apply(Action::TimerReset);
        assert!(!state.setting.is_open);
        assert_eq!(state.setting.total_time, 60);
        assert_eq!(state.remain_time, 60);
    }

    #[test]
    fn ready_toggle_flips_by_username() {
        let mut state = joined_as("b");
        state = state.apply(Action::ReadyToggled {
            username: "b".into(),
        });
        assert!(state.players[1].is_ready);
        assert!(!state.players[0].is_ready);
        // Flipping again restores.
        state = state.apply(Action::ReadyToggled {
            username: "b".into(),
        });
        assert!(!state.players[1].is_ready);
    }

    #[test]
    fn ready_toggle_for_unknown_username_is_noop() {
        let before = joined_as("b");
        let after = before.clone().apply(Action::ReadyToggled {
            username: "ghost".into(),
        });
        assert_eq!(before, after);
    }

    #[test]
    fn game_end_as_winner() {
        let state = joined_as("a")
            .apply(Action::GameStarted { turn_idx: 0 })
            .apply(Action::GameEnded { winner_idx: 0 });
        assert!(!state.is_started);
        assert!(state.turn_idx.is_none());
        assert!(!state.is_my_turn);
        assert!(matches!(
            state.chat_log.last(),
            Some(LogEntry::Notice { message }) if message == "you won the game"
        ));
        assert_turn_invariant(&state);
    }

    #[test]
    fn game_end_as_loser_toggles_first_and_resets_ready() {
        let state = joined_as("b")
            .apply(Action::ReadyToggled {
                username: "b".into(),
            })
            .apply(Action::GameStarted { turn_idx: 0 })
            .apply(Action::GameEnded { winner_idx: 0 });
        assert!(matches!(
            state.chat_log.last(),
            Some(LogEntry::Notice { message }) if message == "you lost the game"
        ));
        // "a" was first before the game, so the flag toggles off; ready
        // resets to ownership.
        assert!(!state.players[0].is_first);
        assert!(state.players[1].is_first);
        assert!(state.players[0].is_ready);
        assert!(!state.players[1].is_ready);
    }

    #[test]
    fn optimistic_chat_appends_once_and_clears_input() {
        let mut state = joined_as("b").apply(Action::ChatInputChanged("hi".into()));
        let before = state.chat_log.len();
        let content = state.chat_input.clone();
        state = state
            .apply(Action::ChatReceived {
                username: "b".into(),
                is_self: true,
                content,
            })
            .apply(Action::ChatInputCleared);
        assert_eq!(state.chat_log.len(), before + 1);
        assert_eq!(state.chat_input, "");
        assert!(matches!(
            state.chat_log.last(),
            Some(LogEntry::Chat { is_self: true, content, .. }) if content == "hi"
        ));
    }

    #[test]
    fn incoming_chat_is_distinct_from_optimistic_send() {
        let state = joined_as("b")
            .apply(Action::ChatReceived {
                username: "b".into(),
                is_self: true,
                content: "hi".into(),
            })
            .apply(Action::ChatReceived {
                username: "a".into(),
                is_self: false,
                content: "hello".into(),
            });
        let chats: Vec<_> = state
            .chat_log
            .iter()
            .filter(|e| matches!(e, LogEntry::Chat { .. }))
            .collect();
        assert_eq!(chats.len(), 2);
    }

    #[test]
    fn turn_invariant_holds_across_event_sequences() {
        let sequences: Vec<Vec<Action>> = vec![
            vec![
                Action::GameStarted { turn_idx: 1 },
                Action::TurnUpdated(0),
                Action::TurnUpdated(1),
                Action::GameEnded { winner_idx: 1 },
            ],
            vec![
                Action::GameStarted { turn_idx: 0 },
                Action::PlayerExited {
                    players: vec![player("b", false)],
                    exit_user: "a".into(),
                },
                Action::TurnUpdated(1),
            ],
            vec![
                Action::TimerUpdated(5),
                Action::GameStarted { turn_idx: 1 },
                Action::TimerReset,
                Action::GameEnded { winner_idx: 0 },
                Action::GameStarted { turn_idx: 0 },
            ],
        ];
        for actions in sequences {
            let mut state = joined_as("b");
            assert_turn_invariant(&state);
            for action in actions {
                state = state.apply(action);
                assert_turn_invariant(&state);
            }
        }
    }

    #[test]
    fn timer_tick_replaces_remaining_time() {
        let state = joined_as("a").apply(Action::TimerUpdated(12));
        assert_eq!(state.remain_time, 12);
    }

    #[test]
    fn join_failure_records_error() {
        let state = SessionState::default().apply(Action::JoinFailed(JoinError {
            kind: JoinErrorKind::Rejected,
            message: "room is full".into(),
        }));
        let err = state.join_error.unwrap();
        assert_eq!(err.kind, JoinErrorKind::Rejected);
        assert_eq!(err.message, "room is full");
    }
}
