//! # Lobby Example
//!
//! Demonstrates a complete room client lifecycle:
//!
//! 1. Connect to a room server via WebSocket
//! 2. Join a room and mark ready
//! 3. React to state snapshots (players, chat, game envelope)
//! 4. Shut down gracefully on Ctrl+C or disconnect
//!
//! ## Running
//!
//! ```sh
//! # Start a room server on localhost:4000, then:
//! cargo run --example lobby
//!
//! # Override the server URL:
//! OMOK_ROOM_URL=ws://my-server:4000/ws cargo run --example lobby
//! ```

use omok_room_client::{
    NullBoardEngine, NullNavigator, RoomClient, RoomConfig, RoomSignal, WebSocketTransport,
};

/// Default server URL when `OMOK_ROOM_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:4000/ws";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Initialize tracing. Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("OMOK_ROOM_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    tracing::info!("Connecting to {url}");

    // ── Connect ─────────────────────────────────────────────────────
    let transport = WebSocketTransport::connect(&url).await?;

    // Start the client. This spawns background tasks that drive the
    // transport and publish state snapshots on `state_rx`.
    let (mut client, mut state_rx, mut signal_rx) = RoomClient::start(
        transport,
        NullBoardEngine,
        NullNavigator,
        RoomConfig::new(),
    );

    client.join("example-room", "RustPlayer")?;
    tracing::info!("Join request sent");

    let mut was_joined = false;
    let mut chat_entries = 0;

    // ── Event loop ──────────────────────────────────────────────────
    // Use `tokio::select!` to watch state snapshots, signals and Ctrl+C.
    loop {
        tokio::select! {
            // Branch 1: a new state snapshot was published.
            changed = state_rx.changed() => {
                if changed.is_err() {
                    tracing::info!("State channel closed, exiting");
                    break;
                }
                let state = state_rx.borrow_and_update().clone();

                if state.is_joined && !was_joined {
                    tracing::info!(
                        "Joined room {} ({} player(s) present)",
                        state.room_id.as_deref().unwrap_or("?"),
                        state.players.len()
                    );
                    // Mark ourselves as ready.
                    client.toggle_ready()?;
                    tracing::info!("Set ready");
                }
                was_joined = state.is_joined;

                // Print chat log entries as they arrive.
                for entry in state.chat_log.iter().skip(chat_entries) {
                    match entry {
                        omok_room_client::LogEntry::Notice { message } => {
                            tracing::info!("* {message}");
                        }
                        omok_room_client::LogEntry::Chat { username, content, .. } => {
                            tracing::info!("<{username}> {content}");
                        }
                    }
                }
                chat_entries = state.chat_log.len();

                if state.is_started {
                    tracing::info!(
                        "Game running — turn seat {:?}, {}s remaining{}",
                        state.turn_idx,
                        state.remain_time,
                        if state.is_my_turn { " (your move)" } else { "" }
                    );
                }
            }

            // Branch 2: out-of-band signal from the controller.
            signal = signal_rx.recv() => {
                match signal {
                    Some(RoomSignal::StartRejected { message }) => {
                        tracing::warn!("Start rejected: {message}");
                    }
                    Some(RoomSignal::ChannelFault { reason }) => {
                        tracing::warn!(
                            "Disconnected: {}",
                            reason.as_deref().unwrap_or("unknown")
                        );
                        break;
                    }
                    None => {
                        tracing::info!("Signal channel closed, exiting");
                        break;
                    }
                }
            }

            // Branch 3: Ctrl+C — shut down gracefully.
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    client.shutdown().await;
    tracing::info!("Client shut down. Goodbye!");
    Ok(())
}
