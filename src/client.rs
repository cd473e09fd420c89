//! Async session controller for the omok room protocol.
//!
//! [`RoomClient`] is a thin handle that feeds user intents to a controller
//! task over an unbounded MPSC queue. The controller is the exclusive owner
//! of the [`SessionState`]: every server push and every intent becomes a
//! [`Dispatch`] on one FIFO queue, and each resulting transition runs to
//! completion before the next event — from anywhere — is processed. State
//! snapshots are published on a `watch` channel after every transition;
//! out-of-band notifications (start rejections, channel faults) arrive on a
//! bounded [`RoomSignal`] channel.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = WebSocketTransport::connect("ws://localhost:4000/ws").await?;
//! let (client, mut state, mut signals) =
//!     RoomClient::start(transport, MyBoard::new(), MyRouter::new(), RoomConfig::new());
//!
//! client.join("room-7", "alice")?;
//! state.changed().await?;
//! assert!(state.borrow().is_joined);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, warn};

use crate::channel::{ChannelRouter, GameChannel, SessionChannel, TimerChannel};
use crate::collaborators::{BoardEngine, Navigator};
use crate::error::{Result, RoomError};
use crate::protocol::{ClientMessage, JoinResponse, ServerFrame, SessionEvent};
use crate::state::{Action, JoinError, JoinErrorKind, SessionState};
use crate::transport::Transport;

/// Default capacity of the bounded signal channel.
const DEFAULT_SIGNAL_CHANNEL_CAPACITY: usize = 64;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`RoomClient`].
///
/// All fields have sensible defaults.
///
/// # Example
///
/// ```
/// use omok_room_client::client::RoomConfig;
/// use std::time::Duration;
///
/// let config = RoomConfig::new()
///     .with_signal_channel_capacity(16)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.signal_channel_capacity, 16);
/// ```
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Capacity of the bounded [`RoomSignal`] channel.
    ///
    /// When the consumer cannot keep up, signals are dropped with a warning
    /// rather than blocking the controller. Defaults to **64**; values below
    /// 1 are clamped to 1.
    pub signal_channel_capacity: usize,
    /// Timeout for the graceful shutdown.
    ///
    /// When [`RoomClient::shutdown`] is called, the background tasks are
    /// given this much time to close the transport and drain; after that
    /// they are aborted. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl RoomConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            signal_channel_capacity: DEFAULT_SIGNAL_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the capacity of the bounded signal channel (clamped to ≥ 1).
    #[must_use]
    pub fn with_signal_channel_capacity(mut self, capacity: usize) -> Self {
        self.signal_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Signals ─────────────────────────────────────────────────────────

/// Out-of-band notifications that are not part of [`SessionState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomSignal {
    /// The server rejected a start request. No state changed; the room
    /// stays in the lobby.
    StartRejected { message: String },
    /// The connection (or the session channel) died under the room. All
    /// channels are closed; there is no automatic reconnection.
    ChannelFault { reason: Option<String> },
}

// ── Internal messages ───────────────────────────────────────────────

/// User intents, queued from the handle to the controller.
#[derive(Debug)]
enum Command {
    Join { room_id: String, username: String },
    Leave,
    ChangeChatInput(String),
    SendChat,
    ToggleReady,
    RequestStart,
    OpenSetting,
    CloseSetting,
    ConfirmSetting { total_time: u64, num_of_section: u32 },
    RequestSurrender,
    UpdateTurn(usize),
}

/// Everything the controller can receive, in one FIFO queue: intents from
/// the handle, the join response, and one entry per channel loop.
#[derive(Debug)]
enum Dispatch {
    Command(Command),
    JoinResponse {
        username: String,
        response: JoinResponse,
    },
    Session(SessionEvent),
    Timer(u64),
    Game(serde_json::Value),
    /// The session channel loop terminated.
    SessionClosed,
    /// The transport died (error, server close, or shutdown).
    Disconnected { reason: Option<String> },
}

/// State shared between the handle and the transport loop.
struct Shared {
    connected: AtomicBool,
}

// ── Client handle ───────────────────────────────────────────────────

/// Handle to a running room session controller.
///
/// Created via [`RoomClient::start`]. All intent methods queue a command to
/// the controller and return immediately; preconditions (own the room, game
/// started, …) are checked by the controller against current state, and a
/// command whose precondition fails is dropped with a debug log — mirroring
/// the server, which would reject it anyway.
pub struct RoomClient {
    /// Sender half of the dispatch queue.
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    /// Shared state updated by the transport loop.
    shared: Arc<Shared>,
    /// Latest published state snapshot.
    state_rx: watch::Receiver<SessionState>,
    /// Background transport loop task.
    transport_task: Option<tokio::task::JoinHandle<()>>,
    /// Background controller task.
    controller_task: Option<tokio::task::JoinHandle<()>>,
    /// Oneshot to ask the transport loop for a graceful shutdown.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Timeout for the graceful shutdown.
    shutdown_timeout: Duration,
}

impl RoomClient {
    /// Start the controller and return a handle, a state snapshot receiver,
    /// and a signal receiver.
    ///
    /// # Arguments
    ///
    /// * `transport` — a connected [`Transport`].
    /// * `board` — the board engine collaborator; receives every
    ///   `game`-channel event and the game lifecycle calls.
    /// * `navigator` — navigation capability, invoked on leave.
    /// * `config` — tuning knobs.
    #[must_use = "the state and signal receivers must be used to observe the session"]
    pub fn start(
        transport: impl Transport,
        board: impl BoardEngine,
        navigator: impl Navigator,
        config: RoomConfig,
    ) -> (
        Self,
        watch::Receiver<SessionState>,
        mpsc::Receiver<RoomSignal>,
    ) {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel::<Dispatch>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.signal_channel_capacity.max(1);
        let (signal_tx, signal_rx) = mpsc::channel::<RoomSignal>(capacity);
        let (watch_tx, watch_rx) = watch::channel(SessionState::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let router = ChannelRouter::new();
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
        });

        let transport_task = tokio::spawn(transport_loop(
            transport,
            out_rx,
            router.clone(),
            dispatch_tx.clone(),
            Arc::clone(&shared),
            shutdown_rx,
        ));

        let controller = Controller {
            state: SessionState::default(),
            username: None,
            joining: false,
            board,
            navigator,
            router,
            out_tx,
            dispatch_tx: dispatch_tx.clone(),
            watch_tx,
            signal_tx,
        };
        let controller_task = tokio::spawn(controller.run(dispatch_rx));

        let client = Self {
            dispatch_tx,
            shared,
            state_rx: watch_rx.clone(),
            transport_task: Some(transport_task),
            controller_task: Some(controller_task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        (client, watch_rx, signal_rx)
    }

    // ── Intents ─────────────────────────────────────────────────────

    /// Join `room_id` under the display name `username`.
    ///
    /// Valid only while not in a room; answered by a single join response.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotConnected`] if the transport has closed.
    pub fn join(&self, room_id: impl Into<String>, username: impl Into<String>) -> Result<()> {
        self.queue(Command::Join {
            room_id: room_id.into(),
            username: username.into(),
        })
    }

    /// Leave the room: navigate to root, reset all session state and notify
    /// the server (unless the server already dropped this session).
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotConnected`] if the transport has closed.
    pub fn leave(&self) -> Result<()> {
        self.queue(Command::Leave)
    }

    /// Replace the chat compose buffer.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotConnected`] if the transport has closed.
    pub fn change_chat_input(&self, text: impl Into<String>) -> Result<()> {
        self.queue(Command::ChangeChatInput(text.into()))
    }

    /// Send the compose buffer as a chat message. The own message is
    /// appended locally right away (`is_self = true`) and the buffer is
    /// cleared.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotConnected`] if the transport has closed.
    pub fn send_chat(&self) -> Result<()> {
        self.queue(Command::SendChat)
    }

    /// Flip this player's ready flag (optimistically applied locally).
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotConnected`] if the transport has closed.
    pub fn toggle_ready(&self) -> Result<()> {
        self.queue(Command::ToggleReady)
    }

    /// Ask the server to start the game (owner only).
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotConnected`] if the transport has closed.
    pub fn request_start(&self) -> Result<()> {
        self.queue(Command::RequestStart)
    }

    /// Open the settings panel (local state only).
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotConnected`] if the transport has closed.
    pub fn open_setting(&self) -> Result<()> {
        self.queue(Command::OpenSetting)
    }

    /// Close the settings panel (local state only).
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotConnected`] if the transport has closed.
    pub fn close_setting(&self) -> Result<()> {
        self.queue(Command::CloseSetting)
    }

    /// Propose new game settings (owner only, settings panel open). The
    /// local copy updates when the server echoes the `SETTING` event.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotConnected`] if the transport has closed.
    pub fn confirm_setting(&self, total_time: u64, num_of_section: u32) -> Result<()> {
        self.queue(Command::ConfirmSetting {
            total_time,
            num_of_section,
        })
    }

    /// Concede the running game.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotConnected`] if the transport has closed.
    pub fn request_surrender(&self) -> Result<()> {
        self.queue(Command::RequestSurrender)
    }

    /// Move turn ownership to seat `idx`. Normally driven by the board
    /// engine after a validated move.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotConnected`] if the transport has closed.
    pub fn update_turn(&self, idx: usize) -> Result<()> {
        self.queue(Command::UpdateTurn(idx))
    }

    /// Shut down the client, closing the transport and stopping the
    /// background tasks. The state receiver keeps its last snapshot; the
    /// signal receiver yields a final [`RoomSignal::ChannelFault`].
    pub async fn shutdown(&mut self) {
        debug!("RoomClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await each background task with a timeout; abort stragglers so a
        // task can never detach and run indefinitely.
        for task in [self.transport_task.take(), self.controller_task.take()]
            .into_iter()
            .flatten()
        {
            let mut task = task;
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("background task terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("background task did not exit within timeout; aborting");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("background task aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.connected.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` if the transport is believed to be connected.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Latest published [`SessionState`] snapshot.
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Queue a command to the controller.
    fn queue(&self, command: Command) -> Result<()> {
        if !self.shared.connected.load(Ordering::Acquire) {
            return Err(RoomError::NotConnected);
        }
        self.dispatch_tx
            .send(Dispatch::Command(command))
            .map_err(|_| RoomError::NotConnected)
    }
}

impl std::fmt::Debug for RoomClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomClient")
            .field("connected", &self.is_connected())
            .field("has_transport_task", &self.transport_task.is_some())
            .field("has_controller_task", &self.controller_task.is_some())
            .finish()
    }
}

impl Drop for RoomClient {
    fn drop(&mut self) {
        // `Drop` is synchronous, so a graceful shutdown (which awaits
        // `transport.close()`) is not possible here. Aborting the tasks
        // drops their futures immediately.
        if let Some(task) = self.transport_task.take() {
            task.abort();
        }
        if let Some(task) = self.controller_task.take() {
            task.abort();
        }
    }
}

// ── Transport loop ──────────────────────────────────────────────────

/// Background loop that multiplexes send/receive via `tokio::select!`.
///
/// Incoming text parses as a [`ServerFrame`] and is routed into the channel
/// router; parse failures are logged and skipped, which is also how frames
/// with unrecognized tags are ignored. Exits when:
/// - The outbound queue closes (controller gone)
/// - The shutdown signal fires
/// - The transport errors or is closed by the server
async fn transport_loop(
    mut transport: impl Transport,
    mut out_rx: mpsc::UnboundedReceiver<ClientMessage>,
    router: ChannelRouter,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    shared: Arc<Shared>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("transport loop started");

    loop {
        tokio::select! {
            // Branch 1: outbound message from the controller
            msg = out_rx.recv() => {
                match msg {
                    Some(msg) => {
                        debug!("sending client message: {:?}", std::mem::discriminant(&msg));
                        match serde_json::to_string(&msg) {
                            Ok(json) => {
                                if let Err(e) = transport.send(json).await {
                                    error!("transport send error: {e}");
                                    disconnect(
                                        &shared,
                                        &dispatch_tx,
                                        Some(format!("transport send error: {e}")),
                                    );
                                    break;
                                }
                            }
                            Err(e) => {
                                error!("failed to serialize ClientMessage: {e}");
                                // Serialization errors are programming bugs; don't kill the loop.
                            }
                        }
                    }
                    // Outbound queue closed — controller gone.
                    None => {
                        debug!("outbound queue closed, shutting down transport loop");
                        let _ = transport.close().await;
                        disconnect(&shared, &dispatch_tx, Some("client shut down".into()));
                        break;
                    }
                }
            }

            // Branch 2: shutdown signal
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                disconnect(&shared, &dispatch_tx, Some("client shut down".into()));
                break;
            }

            // Branch 3: incoming frame from the server
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        match serde_json::from_str::<ServerFrame>(&text) {
                            Ok(frame) => router.route(frame).await,
                            Err(e) => {
                                warn!("failed to parse server frame: {e} — raw: {text}");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        disconnect(
                            &shared,
                            &dispatch_tx,
                            Some(format!("transport receive error: {e}")),
                        );
                        break;
                    }
                    // Transport closed cleanly.
                    None => {
                        debug!("transport closed by server");
                        disconnect(&shared, &dispatch_tx, None);
                        break;
                    }
                }
            }
        }
    }

    debug!("transport loop exited");
}

/// Mark the connection dead and tell the controller.
fn disconnect(
    shared: &Shared,
    dispatch_tx: &mpsc::UnboundedSender<Dispatch>,
    reason: Option<String>,
) {
    shared.connected.store(false, Ordering::Release);
    if dispatch_tx.send(Dispatch::Disconnected { reason }).is_err() {
        debug!("controller gone, dropping disconnect notification");
    }
}

// ── Channel dispatch loops ──────────────────────────────────────────

/// Main session-channel loop. The only place the `timer` and `game`
/// channels are opened (on `START`) and closed (on `END`): opening happens
/// after the event is forwarded, so everything those channels deliver lands
/// behind the `START` transition in the dispatcher's FIFO queue.
async fn session_loop(mut channel: SessionChannel, dispatch_tx: mpsc::UnboundedSender<Dispatch>) {
    debug!("session channel loop started");

    while let Some(event) = channel.recv().await {
        let starts_game = matches!(event, SessionEvent::Start { .. });
        let ends_game = matches!(event, SessionEvent::End { .. });

        if dispatch_tx.send(Dispatch::Session(event)).is_err() {
            break;
        }

        if starts_game {
            match channel.open_timer().await {
                Ok(timer) => {
                    tokio::spawn(timer_loop(timer, dispatch_tx.clone()));
                }
                Err(e) => warn!("cannot open timer channel: {e}"),
            }
            match channel.open_game().await {
                Ok(game) => {
                    tokio::spawn(game_loop(game, dispatch_tx.clone()));
                }
                Err(e) => warn!("cannot open game channel: {e}"),
            }
        }
        if ends_game {
            channel.close_timer().await;
            channel.close_game().await;
        }
    }

    if dispatch_tx.send(Dispatch::SessionClosed).is_err() {
        debug!("controller gone at session channel termination");
    }
    debug!("session channel loop exited");
}

/// Timer-channel loop: each tick replaces the remaining time, nothing else.
/// Terminates silently when the channel closes.
async fn timer_loop(mut channel: TimerChannel, dispatch_tx: mpsc::UnboundedSender<Dispatch>) {
    while let Some(remain_time) = channel.recv().await {
        if dispatch_tx.send(Dispatch::Timer(remain_time)).is_err() {
            break;
        }
    }
    debug!("timer channel loop exited");
}

/// Game-channel loop: forwards opaque board events to the dispatcher, which
/// hands them to the board engine. Terminates silently when the channel
/// closes.
async fn game_loop(mut channel: GameChannel, dispatch_tx: mpsc::UnboundedSender<Dispatch>) {
    while let Some(event) = channel.recv().await {
        if dispatch_tx.send(Dispatch::Game(event)).is_err() {
            break;
        }
    }
    debug!("game channel loop exited");
}

// ── Controller ──────────────────────────────────────────────────────

/// Exclusive owner of the session state and the collaborators.
struct Controller<B, N> {
    state: SessionState,
    /// Own display name, recorded at join time; used for the optimistic
    /// chat append and ready toggle.
    username: Option<String>,
    /// A join response is outstanding.
    joining: bool,
    board: B,
    navigator: N,
    router: ChannelRouter,
    out_tx: mpsc::UnboundedSender<ClientMessage>,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    watch_tx: watch::Sender<SessionState>,
    signal_tx: mpsc::Sender<RoomSignal>,
}

impl<B: BoardEngine, N: Navigator> Controller<B, N> {
    async fn run(mut self, mut dispatch_rx: mpsc::UnboundedReceiver<Dispatch>) {
        debug!("controller loop started");

        while let Some(dispatch) = dispatch_rx.recv().await {
            match dispatch {
                Dispatch::Command(command) => self.handle_command(command).await,
                Dispatch::JoinResponse { username, response } => {
                    self.handle_join_response(username, response).await;
                }
                Dispatch::Session(event) => self.handle_session_event(event).await,
                Dispatch::Timer(remain_time) => self.apply(Action::TimerUpdated(remain_time)),
                Dispatch::Game(event) => {
                    if let Some(idx) = self.board.on_game_event(event) {
                        self.apply(Action::TurnUpdated(idx));
                    }
                }
                Dispatch::SessionClosed => self.handle_session_closed().await,
                Dispatch::Disconnected { reason } => {
                    self.handle_disconnected(reason).await;
                    break;
                }
            }
        }

        debug!("controller loop exited");
    }

    /// Apply one transition and publish the new snapshot.
    fn apply(&mut self, action: Action) {
        let state = std::mem::take(&mut self.state);
        self.state = state.apply(action);
        let _ = self.watch_tx.send(self.state.clone());
    }

    /// Queue an outbound message to the transport loop.
    fn send(&self, msg: ClientMessage) {
        if self.out_tx.send(msg).is_err() {
            debug!("transport loop gone, dropping outbound message");
        }
    }

    /// Emit a signal without blocking the controller; drop it (with a
    /// warning) if the consumer is not keeping up.
    fn emit(&self, signal: RoomSignal) {
        match self.signal_tx.try_send(signal) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("signal channel full, dropping signal: {dropped:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("signal channel closed, receiver dropped");
            }
        }
    }

    /// Emit a fault signal with a blocking send: it is the terminal signal
    /// for the session and must not be silently dropped.
    async fn emit_fault(&mut self, reason: Option<String>) {
        if self
            .signal_tx
            .send(RoomSignal::ChannelFault { reason })
            .await
            .is_err()
        {
            debug!("signal channel closed, receiver dropped");
        }
    }

    // ── Intents ─────────────────────────────────────────────────────

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join { room_id, username } => self.handle_join(room_id, username).await,
            Command::Leave => self.run_leave().await,
            Command::ChangeChatInput(text) => self.apply(Action::ChatInputChanged(text)),
            Command::SendChat => {
                let Some(username) = self.username.clone() else {
                    debug!("ignoring SendChat: no username recorded");
                    return;
                };
                let content = self.state.chat_input.clone();
                self.send(ClientMessage::SendMessage {
                    content: content.clone(),
                });
                self.apply(Action::ChatReceived {
                    username,
                    is_self: true,
                    content,
                });
                self.apply(Action::ChatInputCleared);
            }
            Command::ToggleReady => {
                if !self.state.is_joined || self.state.is_started {
                    debug!("ignoring ToggleReady: not in lobby");
                    return;
                }
                let Some(username) = self.username.clone() else {
                    return;
                };
                self.send(ClientMessage::ToggleReady);
                // Optimistic: flipped locally before the server confirms.
                self.apply(Action::ReadyToggled { username });
            }
            Command::RequestStart => {
                if self.state.is_owner != Some(true) {
                    debug!("ignoring RequestStart: not the owner");
                    return;
                }
                self.send(ClientMessage::StartGame);
            }
            Command::OpenSetting => self.apply(Action::SettingOpened),
            Command::CloseSetting => self.apply(Action::SettingClosed),
            Command::ConfirmSetting {
                total_time,
                num_of_section,
            } => {
                if self.state.is_owner != Some(true) || !self.state.setting.is_open {
                    debug!("ignoring ConfirmSetting: not the owner or panel closed");
                    return;
                }
                self.send(ClientMessage::UpdateSetting {
                    total_time,
                    num_of_section,
                });
            }
            Command::RequestSurrender => {
                if !self.state.is_started {
                    debug!("ignoring RequestSurrender: game not started");
                    return;
                }
                let Some(my_idx) = self.state.my_idx else {
                    return;
                };
                self.send(ClientMessage::Surrender { my_idx });
            }
            Command::UpdateTurn(idx) => self.apply(Action::TurnUpdated(idx)),
        }
    }

    async fn handle_join(&mut self, room_id: String, username: String) {
        if self.state.is_joined || self.joining {
            debug!("ignoring Join: already joined or joining");
            return;
        }

        self.username = Some(username.clone());
        self.joining = true;
        // Fresh session: reset, then record the room ahead of the response.
        self.apply(Action::Initialize);
        self.apply(Action::SetRoomId(room_id.clone()));

        match self.router.expect_join_response().await {
            Ok(response_rx) => {
                self.send(ClientMessage::JoinRoom { room_id, username: username.clone() });
                let dispatch_tx = self.dispatch_tx.clone();
                tokio::spawn(async move {
                    match response_rx.await {
                        Ok(response) => {
                            let _ = dispatch_tx.send(Dispatch::JoinResponse { username, response });
                        }
                        Err(_) => debug!("join response slot dropped before a response arrived"),
                    }
                });
            }
            Err(e) => {
                warn!("cannot await join response: {e}");
                self.joining = false;
            }
        }
    }

    async fn handle_join_response(&mut self, username: String, response: JoinResponse) {
        self.joining = false;

        let data = match response {
            JoinResponse {
                success: true,
                data: Some(data),
                ..
            } => data,
            JoinResponse { message, .. } => {
                let message = message.unwrap_or_else(|| "join rejected".to_string());
                self.apply(Action::JoinFailed(JoinError {
                    kind: JoinErrorKind::Rejected,
                    message,
                }));
                self.run_leave().await;
                return;
            }
        };

        // Usernames are unique per room; a payload that does not list the
        // joining player is malformed and treated as a rejection.
        if !data.players.iter().any(|p| p.username == username) {
            warn!("join response does not list player {username:?}");
            self.apply(Action::JoinFailed(JoinError {
                kind: JoinErrorKind::Rejected,
                message: "join response did not include this player".to_string(),
            }));
            self.run_leave().await;
            return;
        }

        self.apply(Action::JoinSucceeded {
            username,
            players: data.players,
            is_started: data.is_started,
            turn_idx: data.turn_idx,
            total_time: data.total_time,
            num_of_section: data.num_of_section,
        });

        match self.router.open_session().await {
            Ok(session) => {
                if data.is_started {
                    // Resuming mid-game: hand the history to the board and
                    // bring up the timer/game channels immediately.
                    self.board.load_history(data.history);
                    match session.open_timer().await {
                        Ok(timer) => {
                            tokio::spawn(timer_loop(timer, self.dispatch_tx.clone()));
                        }
                        Err(e) => warn!("cannot open timer channel on resume: {e}"),
                    }
                    match session.open_game().await {
                        Ok(game) => {
                            tokio::spawn(game_loop(game, self.dispatch_tx.clone()));
                        }
                        Err(e) => warn!("cannot open game channel on resume: {e}"),
                    }
                }
                tokio::spawn(session_loop(session, self.dispatch_tx.clone()));
            }
            Err(e) => error!("failed to open session channel: {e}"),
        }
    }

    // ── Session events ──────────────────────────────────────────────

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::NewUser { username } => {
                self.apply(Action::PlayerJoined { username });
            }
            SessionEvent::ExitUser { players, exit_user } => {
                self.apply(Action::PlayerExited { players, exit_user });
            }
            SessionEvent::Message { username, content } => {
                self.apply(Action::ChatReceived {
                    username,
                    is_self: false,
                    content,
                });
            }
            SessionEvent::ToggleReady { username } => {
                self.apply(Action::ReadyToggled { username });
            }
            SessionEvent::Setting {
                total_time,
                num_of_section,
            } => {
                self.apply(Action::SettingUpdated {
                    total_time,
                    num_of_section,
                });
                self.board.reset_history();
                self.apply(Action::TimerReset);
            }
            SessionEvent::Start { turn_idx } => {
                // The session loop has already opened timer/game; everything
                // they deliver is queued behind this transition.
                self.board.init_game(self.state.setting.num_of_section);
                self.apply(Action::TimerReset);
                self.apply(Action::GameStarted { turn_idx });
            }
            SessionEvent::StartError { message } => {
                self.emit(RoomSignal::StartRejected { message });
            }
            SessionEvent::End { winner_idx } => {
                self.apply(Action::GameEnded { winner_idx });
            }
            SessionEvent::AnotherConnection(notice) => {
                // The server already dropped this session; leave without
                // the outbound leaveRoom. The payload is optional on the
                // wire, so the message falls back to a local one.
                let message = notice
                    .and_then(|n| n.message)
                    .unwrap_or_else(|| "connected from another device".to_string());
                self.apply(Action::JoinFailed(JoinError {
                    kind: JoinErrorKind::AnotherConnection,
                    message,
                }));
                self.run_leave().await;
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// The leave effect: navigate to root, reset everything, and notify the
    /// server — unless the session was already dropped remotely, in which
    /// case the outbound `leaveRoom` is skipped.
    async fn run_leave(&mut self) {
        self.navigator.go_to_root();

        // The skip decision reads the join error *before* the reset wipes it.
        let skip_leave_message = matches!(
            &self.state.join_error,
            Some(e) if e.kind == JoinErrorKind::AnotherConnection
        );

        self.router.close_all().await;
        self.apply(Action::Initialize);
        self.board.reset_history();
        self.joining = false;

        if skip_leave_message {
            debug!("session taken over remotely; skipping outbound leaveRoom");
        } else {
            self.send(ClientMessage::LeaveRoom);
        }
    }

    /// The session channel loop ended. After a leave this is routine; while
    /// joined it means the room lost its event stream, which must not pass
    /// silently.
    async fn handle_session_closed(&mut self) {
        if !self.state.is_joined {
            debug!("session channel loop ended after leave");
            return;
        }
        warn!("session channel terminated while joined");
        self.router.close_all().await;
        self.apply(Action::NoticePosted("connection to the room was lost".to_string()));
        self.emit_fault(None).await;
    }

    /// The transport died. Close every channel, surface the fault, and let
    /// the controller wind down — there is no reconnection protocol.
    async fn handle_disconnected(&mut self, reason: Option<String>) {
        self.router.close_all().await;
        if self.state.is_joined {
            self.apply(Action::NoticePosted("connection to the server was lost".to_string()));
        }
        self.emit_fault(reason).await;
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
    use crate::collaborators::{NullBoardEngine, NullNavigator};
    use crate::protocol::{JoinData, Player};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    /// A driveable mock transport: the test pushes frames through a handle
    /// while all outgoing messages are recorded.
    struct MockTransport {
        incoming: mpsc::UnboundedReceiver<std::result::Result<String, RoomError>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[derive(Clone)]
    struct ServerHandle {
        tx: mpsc::UnboundedSender<std::result::Result<String, RoomError>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    impl ServerHandle {
        fn push_frame(&self, frame: &ServerFrame) {
            self.tx
                .send(Ok(serde_json::to_string(frame).unwrap()))
                .unwrap();
        }

        fn sent_messages(&self) -> Vec<ClientMessage> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|json| serde_json::from_str(json).unwrap())
                .collect()
        }
    }

    fn mock_transport() -> (MockTransport, ServerHandle, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = MockTransport {
            incoming: rx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, ServerHandle { tx, sent }, closed)
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), RoomError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, RoomError>> {
            // A dropped handle reads as a clean server-side close.
            self.incoming.recv().await
        }

        async fn close(&mut self) -> std::result::Result<(), RoomError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn join_response_frame(players: Vec<Player>) -> ServerFrame {
        ServerFrame::ResponseJoinRoom(JoinResponse {
            success: true,
            data: Some(JoinData {
                players,
                is_started: false,
                turn_idx: None,
                total_time: 30,
                num_of_section: Some(3),
                history: serde_json::Value::Null,
            }),
            message: None,
        })
    }

    fn two_players() -> Vec<Player> {
        vec![
            Player {
                username: "a".into(),
                is_ready: false,
                is_owner: true,
                is_first: true,
            },
            Player {
                username: "b".into(),
                is_ready: false,
                is_owner: false,
                is_first: false,
            },
        ]
    }

    async fn wait_for_state(
        rx: &mut watch::Receiver<SessionState>,
        mut pred: impl FnMut(&SessionState) -> bool,
    ) -> SessionState {
        let deadline = Duration::from_secs(2);
        let result = tokio::time::timeout(deadline, async {
            loop {
                if pred(&rx.borrow()) {
                    return rx.borrow().clone();
                }
                if rx.changed().await.is_err() {
                    panic!("state publisher dropped before the predicate matched");
                }
            }
        })
        .await;
        match result {
            Ok(state) => state,
            Err(_) => panic!("timed out waiting for state"),
        }
    }

    async fn wait_for_sent(server: &ServerHandle, count: usize) -> Vec<ClientMessage> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let sent = server.sent_messages();
            if sent.len() >= count {
                return sent;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {count} sent messages, got {sent:?}");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn config_defaults() {
        let config = RoomConfig::new();
        assert_eq!(config.signal_channel_capacity, 64);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn signal_channel_capacity_is_clamped_to_one() {
        let config = RoomConfig::new().with_signal_channel_capacity(0);
        assert_eq!(config.signal_channel_capacity, 1);
    }

    #[tokio::test]
    async fn join_sends_join_room_first() {
        let (transport, server, _closed) = mock_transport();
        let (mut client, _state, _signals) = RoomClient::start(
            transport,
            NullBoardEngine,
            NullNavigator,
            RoomConfig::new(),
        );

        client.join("room-1", "b").unwrap();
        let sent = wait_for_sent(&server, 1).await;
        assert!(matches!(
            sent.first(),
            Some(ClientMessage::JoinRoom { room_id, username })
                if room_id == "room-1" && username == "b"
        ));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn join_success_publishes_joined_state() {
        let (transport, server, _closed) = mock_transport();
        let (mut client, mut state, _signals) = RoomClient::start(
            transport,
            NullBoardEngine,
            NullNavigator,
            RoomConfig::new(),
        );

        client.join("room-1", "b").unwrap();
        wait_for_sent(&server, 1).await;
        server.push_frame(&join_response_frame(two_players()));

        let joined = wait_for_state(&mut state, |s| s.is_joined).await;
        assert_eq!(joined.my_idx, Some(1));
        assert_eq!(joined.is_owner, Some(false));
        assert_eq!(joined.room_id.as_deref(), Some("room-1"));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn commands_fail_after_shutdown() {
        let (transport, _server, _closed) = mock_transport();
        let (mut client, _state, _signals) = RoomClient::start(
            transport,
            NullBoardEngine,
            NullNavigator,
            RoomConfig::new(),
        );

        client.shutdown().await;

        assert!(matches!(
            client.join("room-1", "b"),
            Err(RoomError::NotConnected)
        ));
        assert!(matches!(client.leave(), Err(RoomError::NotConnected)));
    }

    #[tokio::test]
    async fn shutdown_closes_transport_and_emits_fault() {
        let (transport, _server, closed) = mock_transport();
        let (mut client, _state, mut signals) = RoomClient::start(
            transport,
            NullBoardEngine,
            NullNavigator,
            RoomConfig::new(),
        );

        client.shutdown().await;

        assert!(closed.load(Ordering::Relaxed));
        let signal = signals.recv().await.unwrap();
        assert!(matches!(
            signal,
            RoomSignal::ChannelFault { reason: Some(reason) } if reason == "client shut down"
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn double_shutdown_does_not_panic() {
        let (transport, _server, _closed) = mock_transport();
        let (mut client, _state, _signals) = RoomClient::start(
            transport,
            NullBoardEngine,
            NullNavigator,
            RoomConfig::new(),
        );

        client.shutdown().await;
        client.shutdown().await;
    }

    #[tokio::test]
    async fn drop_without_explicit_shutdown() {
        let (transport, _server, _closed) = mock_transport();
        let (client, _state, mut signals) = RoomClient::start(
            transport,
            NullBoardEngine,
            NullNavigator,
            RoomConfig::new(),
        );

        drop(client);

        // The tasks are aborted; the signal channel closes without hanging.
        while signals.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn server_close_emits_channel_fault() {
        let (transport, server, _closed) = mock_transport();
        let (mut client, _state, mut signals) = RoomClient::start(
            transport,
            NullBoardEngine,
            NullNavigator,
            RoomConfig::new(),
        );

        // Dropping the push handle ends the incoming stream: a clean close.
        drop(server);

        let signal = signals.recv().await.unwrap();
        assert!(matches!(signal, RoomSignal::ChannelFault { reason: None }));
        assert!(!client.is_connected());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let (transport, server, _closed) = mock_transport();
        let (mut client, mut state, _signals) = RoomClient::start(
            transport,
            NullBoardEngine,
            NullNavigator,
            RoomConfig::new(),
        );

        server.tx.send(Ok("not json at all".into())).unwrap();
        server
            .tx
            .send(Ok(r#"{"channel":"mystery","event":{}}"#.into()))
            .unwrap();

        // The loop survives: a join still works afterwards.
        client.join("room-1", "b").unwrap();
        wait_for_sent(&server, 1).await;
        server.push_frame(&join_response_frame(two_players()));
        wait_for_state(&mut state, |s| s.is_joined).await;

        client.shutdown().await;
    }

    #[tokio::test]
    async fn debug_impl_for_client() {
        let (transport, _server, _closed) = mock_transport();
        let (mut client, _state, _signals) = RoomClient::start(
            transport,
            NullBoardEngine,
            NullNavigator,
            RoomConfig::new(),
        );

        let debug_str = format!("{client:?}");
        assert!(debug_str.contains("RoomClient"));
        assert!(debug_str.contains("connected"));

        client.shutdown().await;
    }
}
