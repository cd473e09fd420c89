//! Seams for the external collaborators the session controller drives.
//!
//! The controller never interprets board moves or performs navigation
//! itself; it calls into these traits at the points the session lifecycle
//! dictates. Implementations are owned by the controller task, so plain
//! `&mut self` methods are enough — no internal locking required.

/// The board/move state machine, out of scope for this crate.
///
/// The controller calls the lifecycle methods around game start/end and
/// forwards every `game`-channel event whole; the engine reports turn
/// changes back through [`on_game_event`](BoardEngine::on_game_event)'s
/// return value, which the controller applies as a turn-update transition.
pub trait BoardEngine: Send + 'static {
    /// Set up a fresh game of `num_of_section` sections.
    fn init_game(&mut self, num_of_section: Option<u32>);

    /// Load the move history of a game already in progress (mid-game join).
    fn load_history(&mut self, history: serde_json::Value);

    /// Discard any accumulated game history.
    fn reset_history(&mut self);

    /// Handle one raw `game`-channel event. Returning `Some(idx)` means a
    /// validated move passed the turn to seat `idx`.
    fn on_game_event(&mut self, event: serde_json::Value) -> Option<usize>;
}

/// Navigation capability, used only on leave.
pub trait Navigator: Send + 'static {
    /// Navigate back to the application root (the lobby list).
    fn go_to_root(&mut self);
}

/// A board engine that ignores everything. Useful for lobby-only clients
/// and tests that never start a game.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBoardEngine;

impl BoardEngine for NullBoardEngine {
    fn init_game(&mut self, _num_of_section: Option<u32>) {}
    fn load_history(&mut self, _history: serde_json::Value) {}
    fn reset_history(&mut self) {}
    fn on_game_event(&mut self, _event: serde_json::Value) -> Option<usize> {
        None
    }
}

/// A navigator that goes nowhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNavigator;

impl Navigator for NullNavigator {
    fn go_to_root(&mut self) {}
}
