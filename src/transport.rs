//! Transport abstraction for the room session protocol.
//!
//! The [`Transport`] trait is one reliable, ordered, bidirectional text
//! connection. The three logical channels (`session`, `timer`, `game`) and
//! the one-shot join response are all multiplexed over this single
//! connection as JSON frames; demultiplexing happens above the transport,
//! in [`ChannelRouter`](crate::channel::ChannelRouter). Implementations only
//! shuttle complete text messages and handle framing internally (WebSocket
//! frames, length-prefixed TCP, and so on).
//!
//! Connection setup is intentionally NOT part of this trait — parameters
//! differ per backend (URL, host:port, …). Construct a connected transport
//! externally, then hand it to `RoomClient::start`.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use omok_room_client::error::RoomError;
//! use omok_room_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), RoomError> {
//!         // Send one complete JSON text message
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, RoomError>> {
//!         // Receive the next JSON text message;
//!         // return None when the connection closes cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), RoomError> {
//!         // Gracefully shut down the connection
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::RoomError;

/// A bidirectional text message transport carrying the room protocol.
///
/// Each [`send`](Transport::send) transmits one complete JSON message; each
/// [`recv`](Transport::recv) yields one. The connection is assumed to stay
/// open until an explicit close or process teardown — there is no timeout on
/// any wait.
///
/// # Object Safety
///
/// The trait is object-safe, so `Box<dyn Transport>` works; `RoomClient`
/// takes `impl Transport` for the common monomorphized case.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the client's
/// transport loop polls it inside `tokio::select!`. If the future is dropped
/// before completion, calling `recv` again must not lose a message.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::TransportSend`] if the message could not be
    /// sent (connection broken, write buffer full, …).
    async fn send(&mut self, message: String) -> Result<(), RoomError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait docs](Transport)).
    async fn recv(&mut self) -> Option<Result<String, RoomError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), RoomError>;
}
