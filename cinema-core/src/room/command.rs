//! Outbound Commands
//!
//! Everything a client can ask the server to do. Each command serializes as
//! a single-key JSON object, e.g. `{"pause": ["mov1", 30.0]}`. The server
//! answers with room-state updates, never with per-command replies: the
//! round trip through the state feed is the acknowledgement.

use serde::{Deserialize, Serialize};

/// A command sent over the room channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Unpin the current video.
    Stop(()),
    /// Freeze the video at the given media position (seconds). Seeking is
    /// expressed as a pause at the target position.
    Pause(String, f64),
    /// Play the video such that it logically started when the server clock
    /// read the given value (`server_now - position`, not a raw "play now").
    Play(String, f64),
    /// Say something in the room chat.
    Chat(String),
    /// Grant control privileges to a user.
    Admin(String),
    /// Revoke control privileges from a user.
    Unadmin(String),
    /// Rename the room.
    Title(String),
    /// Toggle room visibility in the public room list.
    Public(bool),
}

impl Command {
    /// Whether the server will only honour this from an admin session.
    /// The channel sends regardless; the server enforces.
    pub fn requires_admin(&self) -> bool {
        !matches!(self, Command::Chat(_))
    }
}
