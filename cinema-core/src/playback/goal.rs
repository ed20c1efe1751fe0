//! Goal Resolution
//!
//! Turns the room's play/pause descriptor plus the server clock into the
//! position and play state every client should converge on. Pure; called on
//! every convergence tick.

use crate::room::PlayingState;

/// The logical target for a player: where it should be and whether it
/// should be running. Recomputed every tick, never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Goal {
    /// Media-relative position in seconds.
    pub position: f64,
    pub should_play: bool,
}

/// Resolve the goal for one tick.
///
/// `duration` of zero (or less) means "metadata not loaded yet" and
/// disables the upper clamp. Returns `None` when no video is pinned; the
/// convergence loop is inert in that case.
///
/// The clamps make every future `Playing` timestamp safe: a start time a
/// few seconds ahead, or a not-yet-loaded duration, degrades to "paused at
/// the boundary" instead of a negative seek or an overrun.
pub fn resolve(playing: Option<&PlayingState>, server_now: f64, duration: f64) -> Option<Goal> {
    let (mut position, mut should_play) = match playing? {
        PlayingState::Paused(at) => (*at, false),
        PlayingState::Playing(started_at) => (server_now - started_at, true),
    };

    if position < 0.0 {
        position = 0.0;
        should_play = false;
    }
    if duration > 0.0 && position > duration {
        position = duration;
        should_play = false;
    }

    Some(Goal {
        position,
        should_play,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: f64 = 1_700_000_000.0;

    #[test]
    fn test_no_video_no_goal() {
        assert_eq!(resolve(None, NOW, 600.0), None);
    }

    #[test]
    fn test_playing_position_is_clock_relative() {
        // Started 60 seconds ago on the server's clock.
        let goal = resolve(Some(&PlayingState::Playing(NOW - 60.0)), NOW, 600.0).unwrap();
        assert_eq!(goal.position, 60.0);
        assert!(goal.should_play);
    }

    #[test]
    fn test_paused_ignores_clock() {
        let goal = resolve(Some(&PlayingState::Paused(30.0)), NOW, 600.0).unwrap();
        assert_eq!(goal.position, 30.0);
        assert!(!goal.should_play);

        let later = resolve(Some(&PlayingState::Paused(30.0)), NOW + 9999.0, 600.0).unwrap();
        assert_eq!(goal, later);
    }

    #[test]
    fn test_future_start_clamps_to_paused_at_zero() {
        // Play scheduled 5 seconds in the future: don't play negative time.
        let goal = resolve(Some(&PlayingState::Playing(NOW + 5.0)), NOW, 600.0).unwrap();
        assert_eq!(goal.position, 0.0);
        assert!(!goal.should_play);
    }

    #[test]
    fn test_past_end_clamps_to_paused_at_duration() {
        let goal = resolve(Some(&PlayingState::Playing(NOW - 700.0)), NOW, 600.0).unwrap();
        assert_eq!(goal.position, 600.0);
        assert!(!goal.should_play);
    }

    #[test]
    fn test_unknown_duration_skips_upper_clamp() {
        // Metadata not loaded yet: trust the clock, keep playing.
        let goal = resolve(Some(&PlayingState::Playing(NOW - 700.0)), NOW, 0.0).unwrap();
        assert_eq!(goal.position, 700.0);
        assert!(goal.should_play);
    }

    #[test]
    fn test_paused_past_end_also_clamps() {
        let goal = resolve(Some(&PlayingState::Paused(999.0)), NOW, 600.0).unwrap();
        assert_eq!(goal.position, 600.0);
        assert!(!goal.should_play);
    }
}
