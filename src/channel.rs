//! Channel adapter: named, single-reader event streams multiplexed over the
//! one physical connection.
//!
//! The transport loop parses every inbound frame and hands it to a
//! [`ChannelRouter`], which forwards it into the queue of the matching open
//! channel. Frames for a channel that is not open are dropped (logged at
//! debug level) — this is what makes "timer ticks are processed strictly
//! after `START` and strictly before `END`" hold: the session loop opens and
//! closes those channels around exactly those transitions.
//!
//! Opening a channel yields a fresh single-reader pull source
//! ([`SessionChannel`], [`TimerChannel`], [`GameChannel`]); closing it drops
//! the sender, which unblocks the reader with a terminal `None`. A channel
//! name can be reopened after closing, but each instance is consumed once.
//! Opening a second instance for a name that is still open is a caller error
//! ([`RoomError::ChannelAlreadyOpen`]).
//!
//! The timer and game channels can only be opened through a live
//! [`SessionChannel`] — the session channel is the capability that guards
//! them, so they can never be open while the session channel is not.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use crate::error::{Result, RoomError};
use crate::protocol::{JoinResponse, ServerFrame, SessionEvent};

/// Names of the logical channels multiplexed over the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelName {
    Session,
    Timer,
    Game,
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelName::Session => "session",
            ChannelName::Timer => "timer",
            ChannelName::Game => "game",
        };
        f.write_str(name)
    }
}

/// Open senders, one slot per channel name, plus the one-shot join response.
#[derive(Default)]
struct Slots {
    session: Option<mpsc::UnboundedSender<SessionEvent>>,
    timer: Option<mpsc::UnboundedSender<u64>>,
    game: Option<mpsc::UnboundedSender<serde_json::Value>>,
    join: Option<oneshot::Sender<JoinResponse>>,
}

/// Demultiplexer for inbound [`ServerFrame`]s.
///
/// Cheap to clone; the transport loop routes into it while the controller
/// and the session loop open and close slots.
#[derive(Clone, Default)]
pub struct ChannelRouter {
    slots: Arc<Mutex<Slots>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward one parsed frame into its channel's queue.
    ///
    /// Frames for closed channels are dropped. A send failure means the
    /// reader is gone; the slot is cleared so later frames drop quietly.
    pub async fn route(&self, frame: ServerFrame) {
        let mut slots = self.slots.lock().await;
        match frame {
            ServerFrame::Session(event) => {
                let delivered = matches!(&slots.session, Some(tx) if tx.send(event).is_ok());
                if !delivered {
                    slots.session = None;
                    debug!("dropping session event: channel not open");
                }
            }
            ServerFrame::Timer(remain_time) => {
                let delivered = matches!(&slots.timer, Some(tx) if tx.send(remain_time).is_ok());
                if !delivered {
                    slots.timer = None;
                    debug!("dropping timer tick: channel not open");
                }
            }
            ServerFrame::Game(event) => {
                let delivered = matches!(&slots.game, Some(tx) if tx.send(event).is_ok());
                if !delivered {
                    slots.game = None;
                    debug!("dropping game event: channel not open");
                }
            }
            ServerFrame::ResponseJoinRoom(response) => match slots.join.take() {
                Some(tx) => {
                    if tx.send(response).is_err() {
                        debug!("join response receiver dropped");
                    }
                }
                None => debug!("dropping join response: no join pending"),
            },
        }
    }

    /// Open the `session` channel and return its reader, the capability that
    /// also opens and closes `timer` and `game`.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::ChannelAlreadyOpen`] if a session reader is
    /// still live.
    pub async fn open_session(&self) -> Result<SessionChannel> {
        let mut slots = self.slots.lock().await;
        if slots.session.is_some() {
            return Err(RoomError::ChannelAlreadyOpen(ChannelName::Session));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        slots.session = Some(tx);
        debug!("session channel opened");
        Ok(SessionChannel {
            rx,
            router: self.clone(),
        })
    }

    /// Register the one-shot `responseJoinRoom` slot for an outgoing join.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::JoinPending`] if a previous join is still
    /// awaiting its response.
    pub async fn expect_join_response(&self) -> Result<oneshot::Receiver<JoinResponse>> {
        let mut slots = self.slots.lock().await;
        if slots.join.is_some() {
            return Err(RoomError::JoinPending);
        }
        let (tx, rx) = oneshot::channel();
        slots.join = Some(tx);
        Ok(rx)
    }

    /// Close every channel (and any pending join slot). Readers observe a
    /// terminal `None`. Used on leave and teardown.
    pub async fn close_all(&self) {
        let mut slots = self.slots.lock().await;
        slots.session = None;
        slots.timer = None;
        slots.game = None;
        slots.join = None;
        debug!("all channels closed");
    }

    /// Whether the named channel currently has a live reader.
    pub async fn is_open(&self, name: ChannelName) -> bool {
        let slots = self.slots.lock().await;
        match name {
            ChannelName::Session => slots.session.is_some(),
            ChannelName::Timer => slots.timer.is_some(),
            ChannelName::Game => slots.game.is_some(),
        }
    }
}

impl fmt::Debug for ChannelRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRouter").finish_non_exhaustive()
    }
}

// ── Channel readers ─────────────────────────────────────────────────

/// Single reader for the `session` channel.
///
/// Also the only value that can open or close the `timer` and `game`
/// channels, which ties their lifetime to the session channel by
/// construction.
#[derive(Debug)]
pub struct SessionChannel {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    router: ChannelRouter,
}

impl SessionChannel {
    /// Pull the next session event; `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Open the `timer` channel.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::ChannelAlreadyOpen`] if a timer reader is
    /// still live.
    pub async fn open_timer(&self) -> Result<TimerChannel> {
        let mut slots = self.router.slots.lock().await;
        if slots.timer.is_some() {
            return Err(RoomError::ChannelAlreadyOpen(ChannelName::Timer));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        slots.timer = Some(tx);
        debug!("timer channel opened");
        Ok(TimerChannel { rx })
    }

    /// Open the `game` channel.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::ChannelAlreadyOpen`] if a game reader is
    /// still live.
    pub async fn open_game(&self) -> Result<GameChannel> {
        let mut slots = self.router.slots.lock().await;
        if slots.game.is_some() {
            return Err(RoomError::ChannelAlreadyOpen(ChannelName::Game));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        slots.game = Some(tx);
        debug!("game channel opened");
        Ok(GameChannel { rx })
    }

    /// Close the `timer` channel; its reader unblocks with `None`.
    pub async fn close_timer(&self) {
        self.router.slots.lock().await.timer = None;
        debug!("timer channel closed");
    }

    /// Close the `game` channel; its reader unblocks with `None`.
    pub async fn close_game(&self) {
        self.router.slots.lock().await.game = None;
        debug!("game channel closed");
    }
}

/// Single reader for the `timer` channel: bare remaining-seconds ticks.
#[derive(Debug)]
pub struct TimerChannel {
    rx: mpsc::UnboundedReceiver<u64>,
}

impl TimerChannel {
    pub async fn recv(&mut self) -> Option<u64> {
        self.rx.recv().await
    }
}

/// Single reader for the `game` channel: opaque board events.
#[derive(Debug)]
pub struct GameChannel {
    rx: mpsc::UnboundedReceiver<serde_json::Value>,
}

impl GameChannel {
    pub async fn recv(&mut self) -> Option<serde_json::Value> {
        self.rx.recv().await
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
    use crate::protocol::JoinData;

    fn new_user(username: &str) -> ServerFrame {
        ServerFrame::Session(SessionEvent::NewUser {
            username: username.into(),
        })
    }

    #[tokio::test]
    async fn routes_session_events_to_open_reader() {
        let router = ChannelRouter::new();
        let mut session = router.open_session().await.unwrap();

        router.route(new_user("a")).await;
        let event = session.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::NewUser { username } if username == "a"));
    }

    #[tokio::test]
    async fn drops_frames_for_closed_channels() {
        let router = ChannelRouter::new();
        // Nothing open: both routes are silent drops.
        router.route(new_user("a")).await;
        router.route(ServerFrame::Timer(9)).await;

        let mut session = router.open_session().await.unwrap();
        router.route(new_user("b")).await;
        let event = session.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::NewUser { username } if username == "b"));
    }

    #[tokio::test]
    async fn double_open_is_a_caller_error() {
        let router = ChannelRouter::new();
        let session = router.open_session().await.unwrap();
        let err = router.open_session().await.unwrap_err();
        assert!(matches!(
            err,
            RoomError::ChannelAlreadyOpen(ChannelName::Session)
        ));

        let _timer = session.open_timer().await.unwrap();
        let err = session.open_timer().await.unwrap_err();
        assert!(matches!(
            err,
            RoomError::ChannelAlreadyOpen(ChannelName::Timer)
        ));
    }

    #[tokio::test]
    async fn timer_and_game_open_only_through_session() {
        let router = ChannelRouter::new();
        let session = router.open_session().await.unwrap();
        let mut timer = session.open_timer().await.unwrap();
        let mut game = session.open_game().await.unwrap();

        assert!(router.is_open(ChannelName::Timer).await);
        assert!(router.is_open(ChannelName::Game).await);

        router.route(ServerFrame::Timer(25)).await;
        router
            .route(ServerFrame::Game(serde_json::json!({ "position": 42 })))
            .await;
        assert_eq!(timer.recv().await, Some(25));
        assert_eq!(game.recv().await.unwrap()["position"], 42);
    }

    #[tokio::test]
    async fn close_unblocks_reader_with_terminal_none() {
        let router = ChannelRouter::new();
        let session = router.open_session().await.unwrap();
        let mut timer = session.open_timer().await.unwrap();

        session.close_timer().await;
        assert_eq!(timer.recv().await, None);
        assert!(!router.is_open(ChannelName::Timer).await);
    }

    #[tokio::test]
    async fn channel_is_reopenable_after_close() {
        let router = ChannelRouter::new();
        let session = router.open_session().await.unwrap();

        let _first = session.open_timer().await.unwrap();
        session.close_timer().await;
        let mut second = session.open_timer().await.unwrap();

        router.route(ServerFrame::Timer(3)).await;
        assert_eq!(second.recv().await, Some(3));
    }

    #[tokio::test]
    async fn close_all_terminates_every_reader() {
        let router = ChannelRouter::new();
        let mut session = router.open_session().await.unwrap();
        let mut timer = session.open_timer().await.unwrap();
        let mut game = session.open_game().await.unwrap();

        router.close_all().await;
        assert_eq!(session.recv().await, None);
        assert_eq!(timer.recv().await, None);
        assert!(game.recv().await.is_none());
    }

    #[tokio::test]
    async fn join_response_is_one_shot() {
        let router = ChannelRouter::new();
        let rx = router.expect_join_response().await.unwrap();

        // A second registration while pending is an error.
        assert!(matches!(
            router.expect_join_response().await,
            Err(RoomError::JoinPending)
        ));

        let response = JoinResponse {
            success: true,
            data: Some(JoinData {
                players: vec![],
                is_started: false,
                turn_idx: None,
                total_time: 30,
                num_of_section: None,
                history: serde_json::Value::Null,
            }),
            message: None,
        };
        router
            .route(ServerFrame::ResponseJoinRoom(response.clone()))
            .await;
        assert_eq!(rx.await.unwrap(), response);

        // The slot is consumed; a new join can register again.
        let _rx = router.expect_join_response().await.unwrap();
    }

    #[tokio::test]
    async fn join_response_without_pending_join_is_dropped() {
        let router = ChannelRouter::new();
        router
            .route(ServerFrame::ResponseJoinRoom(JoinResponse {
                success: false,
                data: None,
                message: Some("nope".into()),
            }))
            .await;
        // Nothing to assert beyond "no panic": the frame is discarded.
    }
}
