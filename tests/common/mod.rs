//! Shared test infrastructure: a driveable mock transport, recording
//! collaborators, and frame builders for the room protocol.

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use omok_room_client::collaborators::{BoardEngine, Navigator};
use omok_room_client::protocol::{
    ClientMessage, JoinData, JoinResponse, Player, ServerFrame, SessionEvent,
};
use omok_room_client::{RoomError, SessionState, Transport};

// ── Mock transport ──────────────────────────────────────────────────

/// A [`Transport`] the test drives from the outside: frames pushed through
/// the [`ServerHandle`] come out of `recv`, and everything the client sends
/// is recorded.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Result<String, RoomError>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// The server side of a [`MockTransport`].
#[derive(Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<Result<String, RoomError>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

pub fn mock_transport() -> (MockTransport, ServerHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let transport = MockTransport {
        incoming: rx,
        sent: Arc::clone(&sent),
        closed: Arc::clone(&closed),
    };
    (transport, ServerHandle { tx, sent, closed })
}

impl ServerHandle {
    /// Deliver one frame to the client.
    pub fn push_frame(&self, frame: &ServerFrame) {
        self.push_raw(serde_json::to_string(frame).unwrap());
    }

    /// Deliver raw text (for malformed-input tests).
    pub fn push_raw(&self, text: impl Into<String>) {
        self.tx.send(Ok(text.into())).unwrap();
    }

    /// Fail the next receive with a transport error.
    pub fn push_error(&self, error: RoomError) {
        self.tx.send(Err(error)).unwrap();
    }

    /// Everything the client sent so far, parsed back into messages.
    pub fn sent_messages(&self) -> Vec<ClientMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|json| serde_json::from_str(json).unwrap())
            .collect()
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), RoomError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, RoomError>> {
        // A dropped handle reads as a clean server-side close.
        self.incoming.recv().await
    }

    async fn close(&mut self) -> Result<(), RoomError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── Recording collaborators ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum BoardCall {
    InitGame(Option<u32>),
    LoadHistory(serde_json::Value),
    ResetHistory,
    GameEvent(serde_json::Value),
}

/// A board engine that records every call and answers `on_game_event` from
/// a scripted queue of turn updates.
#[derive(Clone, Default)]
pub struct RecordingBoard {
    calls: Arc<Mutex<Vec<BoardCall>>>,
    turn_script: Arc<Mutex<VecDeque<Option<usize>>>>,
}

impl RecordingBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the turn updates returned by successive `on_game_event` calls.
    pub fn script_turns(&self, turns: impl IntoIterator<Item = Option<usize>>) {
        self.turn_script.lock().unwrap().extend(turns);
    }

    pub fn calls(&self) -> Vec<BoardCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl BoardEngine for RecordingBoard {
    fn init_game(&mut self, num_of_section: Option<u32>) {
        self.calls
            .lock()
            .unwrap()
            .push(BoardCall::InitGame(num_of_section));
    }

    fn load_history(&mut self, history: serde_json::Value) {
        self.calls
            .lock()
            .unwrap()
            .push(BoardCall::LoadHistory(history));
    }

    fn reset_history(&mut self) {
        self.calls.lock().unwrap().push(BoardCall::ResetHistory);
    }

    fn on_game_event(&mut self, event: serde_json::Value) -> Option<usize> {
        self.calls.lock().unwrap().push(BoardCall::GameEvent(event));
        self.turn_script.lock().unwrap().pop_front().flatten()
    }
}

/// A navigator that counts root navigations.
#[derive(Clone, Default)]
pub struct RecordingNavigator {
    count: Arc<AtomicUsize>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_navigations(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl Navigator for RecordingNavigator {
    fn go_to_root(&mut self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

// ── Frame builders ──────────────────────────────────────────────────

pub fn player(username: &str, is_owner: bool) -> Player {
    Player {
        username: username.into(),
        is_ready: false,
        is_owner,
        is_first: is_owner,
    }
}

pub fn two_players() -> Vec<Player> {
    vec![player("a", true), player("b", false)]
}

pub fn session_frame(event: SessionEvent) -> ServerFrame {
    ServerFrame::Session(event)
}

pub fn timer_frame(remain_time: u64) -> ServerFrame {
    ServerFrame::Timer(remain_time)
}

pub fn game_frame(event: serde_json::Value) -> ServerFrame {
    ServerFrame::Game(event)
}

pub fn join_success(players: Vec<Player>) -> ServerFrame {
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

pub fn join_success_mid_game(
    players: Vec<Player>,
    turn_idx: usize,
    history: serde_json::Value,
) -> ServerFrame {
    ServerFrame::ResponseJoinRoom(JoinResponse {
        success: true,
        data: Some(JoinData {
            players,
            is_started: true,
            turn_idx: Some(turn_idx),
            total_time: 30,
            num_of_section: Some(3),
            history,
        }),
        message: None,
    })
}

pub fn join_failure(message: &str) -> ServerFrame {
    ServerFrame::ResponseJoinRoom(JoinResponse {
        success: false,
        data: None,
        message: Some(message.into()),
    })
}

// ── Wait helpers ────────────────────────────────────────────────────

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Wait until the published state satisfies `pred`, returning the matching
/// snapshot. Panics after [`WAIT_TIMEOUT`].
pub async fn wait_for_state(
    rx: &mut watch::Receiver<SessionState>,
    mut pred: impl FnMut(&SessionState) -> bool,
) -> SessionState {
    let result = tokio::time::timeout(WAIT_TIMEOUT, async {
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
        Err(_) => panic!("timed out waiting for state: {:?}", rx.borrow()),
    }
}

/// Wait until the client has sent at least `count` messages.
pub async fn wait_for_sent(server: &ServerHandle, count: usize) -> Vec<ClientMessage> {
    wait_until(|| {
        let sent = server.sent_messages();
        (sent.len() >= count).then_some(sent)
    })
    .await
}

/// Poll `probe` until it yields a value. Panics after [`WAIT_TIMEOUT`].
pub async fn wait_until<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(value) = probe() {
            return value;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out polling for a condition");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Let in-flight background work (channel opens, spawned loops) settle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
