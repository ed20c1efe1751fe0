//! Room State
//!
//! The client-side mirror of a room. The server owns this structure; the
//! client only ever replaces it wholesale with what the channel reassembles
//! from snapshots and patches. Nothing on this side mutates it.

use serde::{Deserialize, Serialize};

/// Play/pause descriptor for the pinned video.
///
/// Exactly two variants by construction. "No video at all" is represented
/// one level up by [`VideoState::NoVideo`], never by a third variant here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayingState {
    /// Frozen at this many seconds of media time.
    Paused(f64),
    /// Started playing when the server clock read this value; the implied
    /// position at any instant is `server_now - started_at`.
    Playing(f64),
}

impl PlayingState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlayingState::Playing(_))
    }
}

/// Which video (if any) the room is gathered around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoState {
    /// No video selected.
    NoVideo(()),
    /// A video id plus its play/pause descriptor.
    Video(String, PlayingState),
}

impl VideoState {
    /// The pinned video id and descriptor, if one is pinned.
    pub fn video(&self) -> Option<(&str, &PlayingState)> {
        match self {
            VideoState::NoVideo(()) => None,
            VideoState::Video(id, playing) => Some((id, playing)),
        }
    }
}

impl Default for VideoState {
    fn default() -> Self {
        VideoState::NoVideo(())
    }
}

/// A connected viewer. The server may report the same name several times
/// (one entry per open session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewer {
    pub name: String,
}

/// One chat entry. `absolute_timestamp` is server wall-clock seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub absolute_timestamp: f64,
    pub user: String,
    pub message: String,
}

/// Full server-authoritative room state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    pub public: bool,
    pub name: String,
    pub title: String,
    pub video_state: VideoState,
    pub admins: Vec<String>,
    pub viewers: Vec<Viewer>,
    pub chat: Vec<ChatMessage>,
}

impl RoomState {
    /// The pinned video id and descriptor, if one is pinned.
    pub fn current_video(&self) -> Option<(&str, &PlayingState)> {
        self.video_state.video()
    }

    /// Whether the given user may issue control commands.
    pub fn is_admin(&self, user: &str) -> bool {
        self.admins.iter().any(|a| a == user)
    }

    /// Viewer names de-duplicated for presentation, first occurrence order.
    /// The same person connected twice shows up once.
    pub fn roster(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::with_capacity(self.viewers.len());
        for viewer in &self.viewers {
            if !names.contains(&viewer.name.as_str()) {
                names.push(&viewer.name);
            }
        }
        names
    }
}
