//! Error types for the omok room client.

use thiserror::Error;

use crate::channel::ChannelName;

/// Errors that can occur when using the room client.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active connection, but the client is not connected.
    #[error("not connected to server")]
    NotConnected,

    /// Attempted to open a channel that already has a live reader.
    ///
    /// At most one adapter per channel name may be open at a time; the first
    /// instance must be closed before a second can be opened.
    #[error("channel `{0}` is already open")]
    ChannelAlreadyOpen(ChannelName),

    /// A `joinRoom` request is already awaiting its `responseJoinRoom`.
    #[error("a join response is already pending")]
    JoinPending,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for room client operations.
pub type Result<T> = std::result::Result<T, RoomError>;
