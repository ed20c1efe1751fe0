//! Room Channel
//!
//! One logical connection to one room. A background task owns the
//! WebSocket; the [`RoomHandle`] it returns carries the outbound command
//! sender plus watched copies of the connection status and the latest
//! reassembled [`RoomState`].
//!
//! The server sends the full room state as the first message after every
//! (re)connect, then RFC-6902 JSON Patches against the previous message.
//! Reconnection is automatic with exponential backoff until the caller
//! explicitly closes the channel.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::command::Command;
use super::state::RoomState;

/// First reconnect delay; doubles up to [`MAX_BACKOFF`] on repeated failures
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Length of a generated session id
const SESSION_ID_LENGTH: usize = 16;

/// Channel-level errors surfaced to callers. Transport-level trouble is
/// handled internally by reconnecting and only shows up as status changes.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is not open")]
    NotConnected,

    #[error("channel has been closed")]
    Closed,

    #[error("invalid room URL: {0}")]
    BadUrl(String),
}

/// Errors while reassembling room state from one incoming message. The
/// offending message is dropped; the channel and the previous state stay up.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unparsable message: {0}")]
    Parse(serde_json::Error),

    #[error("patch did not apply: {0}")]
    Patch(#[from] json_patch::PatchError),

    #[error("state has unexpected shape: {0}")]
    Shape(serde_json::Error),
}

/// Where the channel is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Dialing (first attempt or reconnect); no state held.
    Connecting,
    /// Socket is up, waiting for the initial snapshot.
    Open,
    /// Socket is up and a room state has been established.
    Synced,
    /// Torn down on request; no further reconnects.
    Closed,
}

/// Lifecycle notifications, for the surrounding UI's connectivity banner.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Connected,
    /// Transport lost; `errors` is the cumulative error counter that also
    /// rides the reconnect URL so the server can tell attempts apart.
    Disconnected { errors: u32 },
    Closed,
}

/// Everything needed to open a channel to one room.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// HTTP(S) base of the server, e.g. `http://localhost:2001`
    pub base_url: String,
    pub room: String,
    pub user: String,
    /// Session id distinguishing this connection from the same user's other
    /// tabs. Generated randomly by [`ChannelConfig::new`].
    pub session: String,
}

impl ChannelConfig {
    pub fn new(
        base_url: impl Into<String>,
        room: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        let session: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_LENGTH)
            .map(char::from)
            .collect();
        Self {
            base_url: base_url.into(),
            room: room.into(),
            user: user.into(),
            session,
        }
    }

    /// Build the socket URL for the next connection attempt.
    fn socket_url(&self, errors: u32) -> Result<reqwest::Url, ChannelError> {
        let base = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ChannelError::BadUrl(e.to_string()))?;
        let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
        let host = base
            .host_str()
            .ok_or_else(|| ChannelError::BadUrl("missing host".to_string()))?;
        let authority = match base.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        reqwest::Url::parse_with_params(
            &format!("{scheme}://{authority}/api/room"),
            &[
                ("room", self.room.as_str()),
                ("user", self.user.as_str()),
                ("sess", self.session.as_str()),
                ("errors", &errors.to_string()),
            ],
        )
        .map_err(|e| ChannelError::BadUrl(e.to_string()))
    }
}

/// Reassembles room state from the snapshot-then-patches feed.
///
/// Holds the raw JSON baseline rather than the typed state so that patch
/// paths resolve against exactly what the server serialized.
#[derive(Debug, Default)]
pub struct StateAssembler {
    baseline: Option<Value>,
}

impl StateAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one incoming message. With no baseline the message is adopted
    /// as a full snapshot; otherwise it is a patch against the baseline.
    /// On error the baseline is left untouched.
    pub fn apply(&mut self, text: &str) -> Result<RoomState, ProtocolError> {
        let next = match &self.baseline {
            None => serde_json::from_str(text).map_err(ProtocolError::Parse)?,
            Some(base) => {
                let patch: json_patch::Patch =
                    serde_json::from_str(text).map_err(ProtocolError::Parse)?;
                let mut next = base.clone();
                json_patch::patch(&mut next, &patch)?;
                next
            }
        };
        let state: RoomState =
            serde_json::from_value(next.clone()).map_err(ProtocolError::Shape)?;
        self.baseline = Some(next);
        Ok(state)
    }

    /// Drop the baseline. The next message will be treated as a snapshot.
    /// Must be called on every (re)connect: patches computed against a
    /// pre-disconnect baseline would corrupt state.
    pub fn reset(&mut self) {
        self.baseline = None;
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }
}

/// Requests from handles to the channel task.
#[derive(Debug)]
enum ChannelRequest {
    Send(Command),
    Shutdown,
}

/// Handle to a running room channel. Cheap to clone; all clones talk to the
/// same connection.
#[derive(Clone)]
pub struct RoomHandle {
    request_tx: mpsc::UnboundedSender<ChannelRequest>,
    status_rx: watch::Receiver<ChannelStatus>,
    state_rx: watch::Receiver<Option<RoomState>>,
}

impl RoomHandle {
    /// Send a command to the server. Fails fast when the socket is not up:
    /// commands are never queued across a disconnect, because a stale
    /// "pause at X" delivered minutes later would be worse than an error.
    pub fn send(&self, command: Command) -> Result<(), ChannelError> {
        match *self.status_rx.borrow() {
            ChannelStatus::Open | ChannelStatus::Synced => self
                .request_tx
                .send(ChannelRequest::Send(command))
                .map_err(|_| ChannelError::Closed),
            ChannelStatus::Connecting => Err(ChannelError::NotConnected),
            ChannelStatus::Closed => Err(ChannelError::Closed),
        }
    }

    /// Tear the channel down. Suppresses any further reconnect attempts.
    pub fn close(&self) {
        let _ = self.request_tx.send(ChannelRequest::Shutdown);
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status_rx.borrow()
    }

    /// Latest reassembled room state, if the channel is synced.
    pub fn state(&self) -> Option<RoomState> {
        self.state_rx.borrow().clone()
    }

    /// A watchable copy of the state feed, for convergence loops and other
    /// readers that want change notifications.
    pub fn watch_state(&self) -> watch::Receiver<Option<RoomState>> {
        self.state_rx.clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_rx.clone()
    }
}

/// The channel itself; owns nothing after `connect` hands the socket to the
/// background task.
pub struct RoomChannel;

impl RoomChannel {
    /// Open a channel and return a handle plus the lifecycle event stream.
    pub fn connect(config: ChannelConfig) -> (RoomHandle, mpsc::UnboundedReceiver<RoomEvent>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Connecting);
        let (state_tx, state_rx) = watch::channel(None);

        tokio::spawn(run_channel(config, request_rx, status_tx, state_tx, event_tx));

        (
            RoomHandle {
                request_tx,
                status_rx,
                state_rx,
            },
            event_rx,
        )
    }
}

/// Why one socket's read/write loop ended.
enum SocketEnd {
    Shutdown,
    Lost(String),
}

async fn run_channel(
    config: ChannelConfig,
    mut request_rx: mpsc::UnboundedReceiver<ChannelRequest>,
    status_tx: watch::Sender<ChannelStatus>,
    state_tx: watch::Sender<Option<RoomState>>,
    event_tx: mpsc::UnboundedSender<RoomEvent>,
) {
    let mut errors: u32 = 0;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        status_tx.send_replace(ChannelStatus::Connecting);
        state_tx.send_replace(None);

        let url = match config.socket_url(errors) {
            Ok(url) => url,
            Err(e) => {
                // Nothing to retry: the config itself is bad.
                warn!("Cannot build room URL: {}", e);
                status_tx.send_replace(ChannelStatus::Closed);
                let _ = event_tx.send(RoomEvent::Closed);
                return;
            }
        };

        debug!("Connecting to {}", url);
        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                info!(room = %config.room, "Room channel connected");
                backoff = INITIAL_BACKOFF;
                status_tx.send_replace(ChannelStatus::Open);
                let _ = event_tx.send(RoomEvent::Connected);

                // Fresh baseline per connection: the first message after a
                // reconnect is always a snapshot.
                let mut assembler = StateAssembler::new();
                match drive_socket(socket, &mut request_rx, &mut assembler, &status_tx, &state_tx)
                    .await
                {
                    SocketEnd::Shutdown => {
                        info!(room = %config.room, "Room channel closed");
                        status_tx.send_replace(ChannelStatus::Closed);
                        state_tx.send_replace(None);
                        let _ = event_tx.send(RoomEvent::Closed);
                        return;
                    }
                    SocketEnd::Lost(reason) => {
                        errors += 1;
                        warn!(errors, "Room connection lost: {}", reason);
                        let _ = event_tx.send(RoomEvent::Disconnected { errors });
                    }
                }
            }
            Err(e) => {
                errors += 1;
                warn!(errors, "Room connect failed: {}", e);
                let _ = event_tx.send(RoomEvent::Disconnected { errors });
            }
        }

        status_tx.send_replace(ChannelStatus::Connecting);
        state_tx.send_replace(None);

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            request = request_rx.recv() => {
                match request {
                    Some(ChannelRequest::Send(command)) => {
                        // Deliberately dropped, not queued; see RoomHandle::send.
                        warn!("Dropping command sent while disconnected: {:?}", command);
                    }
                    Some(ChannelRequest::Shutdown) | None => {
                        status_tx.send_replace(ChannelStatus::Closed);
                        let _ = event_tx.send(RoomEvent::Closed);
                        return;
                    }
                }
            }
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn drive_socket(
    socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    request_rx: &mut mpsc::UnboundedReceiver<ChannelRequest>,
    assembler: &mut StateAssembler,
    status_tx: &watch::Sender<ChannelStatus>,
    state_tx: &watch::Sender<Option<RoomState>>,
) -> SocketEnd {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            request = request_rx.recv() => {
                match request {
                    Some(ChannelRequest::Send(command)) => {
                        let text = match serde_json::to_string(&command) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Unserializable command dropped: {}", e);
                                continue;
                            }
                        };
                        debug!("Sending command: {}", text);
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            return SocketEnd::Lost(format!("send failed: {e}"));
                        }
                    }
                    Some(ChannelRequest::Shutdown) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SocketEnd::Shutdown;
                    }
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        // A single bad message is dropped, not fatal; the
                        // next reconnect snapshot self-heals anything worse.
                        match assembler.apply(&text) {
                            Ok(state) => {
                                status_tx.send_replace(ChannelStatus::Synced);
                                state_tx.send_replace(Some(state));
                            }
                            Err(e) => warn!("Dropping bad room message: {}", e),
                        }
                    }
                    // Keepalive pings are answered by tungstenite itself.
                    Some(Ok(Message::Close(_))) => {
                        return SocketEnd::Lost("server closed the connection".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SocketEnd::Lost(e.to_string()),
                    None => return SocketEnd::Lost("stream ended".to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::state::{PlayingState, VideoState};

    fn snapshot() -> serde_json::Value {
        serde_json::json!({
            "public": true,
            "name": "ABCD",
            "title": "shish's Room",
            "video_state": {"novideo": null},
            "admins": ["shish"],
            "viewers": [{"name": "shish"}],
            "chat": []
        })
    }

    #[test]
    fn test_first_message_is_a_snapshot() {
        let mut assembler = StateAssembler::new();
        let state = assembler.apply(&snapshot().to_string()).unwrap();
        assert_eq!(state.name, "ABCD");
        assert!(assembler.has_baseline());
    }

    #[test]
    fn test_patch_applies_to_baseline() {
        let mut assembler = StateAssembler::new();
        assembler.apply(&snapshot().to_string()).unwrap();

        let patch = serde_json::json!([
            {"op": "replace", "path": "/video_state",
             "value": {"video": ["mov1", {"paused": 30.0}]}},
            {"op": "add", "path": "/viewers/-", "value": {"name": "guest"}}
        ]);
        let state = assembler.apply(&patch.to_string()).unwrap();
        assert_eq!(
            state.video_state,
            VideoState::Video("mov1".to_string(), PlayingState::Paused(30.0))
        );
        assert_eq!(state.viewers.len(), 2);
    }

    /// Applying a server-generated patch sequence must land on the same
    /// state as adopting the final snapshot directly.
    #[test]
    fn test_patch_round_trip_matches_snapshot() {
        let base = snapshot();
        let mut step1 = base.clone();
        step1["title"] = serde_json::json!("Movie Night");
        let mut step2 = step1.clone();
        step2["video_state"] = serde_json::json!({"video": ["mov1", {"playing": 1000.0}]});

        let mut patched = StateAssembler::new();
        patched.apply(&base.to_string()).unwrap();
        patched
            .apply(&serde_json::to_string(&json_patch::diff(&base, &step1)).unwrap())
            .unwrap();
        let from_patches = patched
            .apply(&serde_json::to_string(&json_patch::diff(&step1, &step2)).unwrap())
            .unwrap();

        let mut snapshotted = StateAssembler::new();
        let from_snapshot = snapshotted.apply(&step2.to_string()).unwrap();

        assert_eq!(from_patches, from_snapshot);
    }

    /// After a reset (i.e. a reconnect) the next message must be treated as
    /// a full snapshot, never as a patch against pre-disconnect state.
    #[test]
    fn test_reset_makes_next_message_a_snapshot() {
        let mut assembler = StateAssembler::new();
        assembler.apply(&snapshot().to_string()).unwrap();
        assembler.reset();
        assert!(!assembler.has_baseline());

        // A full snapshot would not parse as a patch; this only succeeds if
        // it is adopted as a snapshot.
        let mut resync = snapshot();
        resync["title"] = serde_json::json!("After Reconnect");
        let state = assembler.apply(&resync.to_string()).unwrap();
        assert_eq!(state.title, "After Reconnect");
    }

    #[test]
    fn test_bad_message_leaves_state_unchanged() {
        let mut assembler = StateAssembler::new();
        assembler.apply(&snapshot().to_string()).unwrap();

        assert!(assembler.apply("not json at all").is_err());
        // Patch against a path that does not exist.
        let bad_patch = r#"[{"op": "replace", "path": "/no/such/path", "value": 1}]"#;
        assert!(assembler.apply(bad_patch).is_err());

        // Baseline survives; a valid patch still applies cleanly.
        let patch = r#"[{"op": "replace", "path": "/title", "value": "Still Fine"}]"#;
        let state = assembler.apply(patch).unwrap();
        assert_eq!(state.title, "Still Fine");
    }

    #[test]
    fn test_socket_url_carries_login_and_error_counter() {
        let mut config = ChannelConfig::new("http://localhost:2001", "ABCD", "shish");
        config.session = "sess123".to_string();
        let url = config.socket_url(2).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:2001/api/room?room=ABCD&user=shish&sess=sess123&errors=2"
        );

        config.base_url = "https://cinema.example.com".to_string();
        let url = config.socket_url(0).unwrap();
        assert!(url.as_str().starts_with("wss://cinema.example.com/api/room?"));
    }

    #[test]
    fn test_generated_session_ids_differ() {
        let a = ChannelConfig::new("http://localhost:2001", "ABCD", "shish");
        let b = ChannelConfig::new("http://localhost:2001", "ABCD", "shish");
        assert_eq!(a.session.len(), SESSION_ID_LENGTH);
        assert_ne!(a.session, b.session);
    }

    #[tokio::test]
    async fn test_send_fails_fast_while_connecting() {
        // Nothing is listening on this port; the channel stays in
        // Connecting and send must fail rather than queue.
        let config = ChannelConfig::new("http://127.0.0.1:1", "ABCD", "shish");
        let (handle, _events) = RoomChannel::connect(config);

        assert!(matches!(
            handle.send(Command::Chat("hello".to_string())),
            Err(ChannelError::NotConnected)
        ));
        assert_eq!(handle.status(), ChannelStatus::Connecting);
        assert!(handle.state().is_none());
        handle.close();
    }
}
