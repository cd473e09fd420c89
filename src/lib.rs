//! # Omok Room Client
//!
//! Transport-agnostic Rust client for the omok room session protocol.
//!
//! The crate drives one room membership over a single persistent JSON text
//! connection: joining and leaving, chat, ready negotiation, settings, and
//! the game envelope (start, per-turn countdown, turn ownership, end,
//! surrender). Server pushes arrive on three logical channels — `session`,
//! `timer`, `game` — multiplexed over that one connection and demultiplexed
//! locally.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] trait for any backend
//! - **WebSocket built-in** — default `transport-websocket` feature provides [`WebSocketTransport`]
//! - **Pure state transitions** — [`SessionState::apply`] is a side-effect-free
//!   transition function; snapshots are published on a `watch` channel
//! - **Pluggable collaborators** — board interpretation and navigation stay
//!   behind the [`BoardEngine`] and [`Navigator`] seams
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use omok_room_client::{
//!     NullBoardEngine, NullNavigator, RoomClient, RoomConfig, WebSocketTransport,
//! };
//!
//! # async fn example() -> Result<(), omok_room_client::RoomError> {
//! let transport = WebSocketTransport::connect("ws://localhost:4000/ws").await?;
//! let (client, mut state, _signals) =
//!     RoomClient::start(transport, NullBoardEngine, NullNavigator, RoomConfig::new());
//!
//! client.join("room-7", "alice")?;
//! state.changed().await.ok();
//! println!("joined: {}", state.borrow().is_joined);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod collaborators;
pub mod error;
pub mod protocol;
pub mod state;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use channel::ChannelName;
pub use client::{RoomClient, RoomConfig, RoomSignal};
pub use collaborators::{BoardEngine, Navigator, NullBoardEngine, NullNavigator};
pub use error::RoomError;
pub use protocol::{ClientMessage, Player, ServerFrame, SessionEvent};
pub use state::{Action, LogEntry, SessionState};
pub use transport::Transport;

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
