//! Playback convergence
//!
//! Goal resolution, the media-player boundary, and the per-player control
//! loop that drags real players onto the room's logical timeline.

mod convergence;
mod goal;
mod player;

pub use convergence::{
    Controls, ConvergenceHandle, ConvergenceLoop, ConvergenceSession, LoopExit, SyncPhase,
    HINT_TAP_TO_PLAY, HINT_TAP_TO_UNMUTE,
};
pub use goal::{resolve as resolve_goal, Goal};
pub use player::{MediaPlayer, PlayRejected};
