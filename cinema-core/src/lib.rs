//! Cinema Watch Together - Core Library
//!
//! This library keeps any number of independently-clocked, independently-
//! buffering video players converged on a single room timeline owned by
//! the server: state arrives as a snapshot plus JSON Patch deltas over a
//! WebSocket, goals are derived against an estimated server clock, and a
//! per-player control loop corrects position and play state (including the
//! browser autoplay fallback) a few times a second.

pub mod catalog;
pub mod clock;
pub mod playback;
pub mod room;
pub mod session;

// Re-exports for convenience
pub use catalog::{Movie, MovieCatalog};
pub use clock::{ServerClock, ServerTimeSource, SharedServerClock};
pub use playback::{
    Controls, ConvergenceLoop, ConvergenceSession, Goal, MediaPlayer, PlayRejected, SyncPhase,
};
pub use room::{
    ChannelConfig, ChannelStatus, Command, PlayingState, RoomChannel, RoomEvent, RoomHandle,
    RoomState, VideoState,
};
pub use session::WatchSession;
