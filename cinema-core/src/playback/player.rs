//! Media Player Boundary
//!
//! The convergence loop drives a player through this trait instead of
//! touching a platform video element directly. A wrapper that owns the
//! concrete element (and, where relevant, its adaptive-streaming engine)
//! implements this and exposes only the primitives the loop needs.

use std::future::Future;

use thiserror::Error;

/// The player refused to start playback. In a browser host this is the
/// autoplay policy saying no; the convergence loop absorbs it and falls
/// back to muted playback, never propagating it upward.
#[derive(Debug, Clone, Error)]
#[error("playback rejected: {reason}")]
pub struct PlayRejected {
    pub reason: String,
}

impl PlayRejected {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// One concrete media player, exclusively owned by its convergence session.
///
/// `play` is asynchronous and rejectable because that is what the platform
/// gives us; everything else is a plain readout or fire-and-forget call.
pub trait MediaPlayer {
    /// Current media position in seconds.
    fn position(&self) -> f64;

    /// Known duration in seconds, or 0.0 before metadata has loaded.
    fn duration(&self) -> f64;

    fn is_paused(&self) -> bool;

    fn is_muted(&self) -> bool;

    fn set_muted(&mut self, muted: bool);

    /// Show or hide the player's native transport controls. Shown while an
    /// autoplay hint is up so the viewer can intervene by hand.
    fn set_native_controls(&mut self, shown: bool);

    fn seek(&mut self, position: f64);

    fn pause(&mut self);

    /// Attempt to start playback at the current position and mute flag.
    fn play(&mut self) -> impl Future<Output = Result<(), PlayRejected>> + Send;
}
