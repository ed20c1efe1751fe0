//! Playback Convergence
//!
//! One [`ConvergenceSession`] per mounted player: every tick it compares
//! the player against the goal derived from the room state and the server
//! clock, and corrects position, play state and the autoplay fallback.
//! [`ConvergenceLoop`] drives a session from the channel's state feed plus
//! a coarse timer, and exits when the pinned video changes so the owner can
//! tear it down and start fresh.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::goal::{self, Goal};
use super::player::MediaPlayer;
use crate::clock::SharedServerClock;
use crate::room::{ChannelError, Command, PlayingState, RoomHandle, RoomState};

/// How far the player may drift from the goal while playing before we seek.
/// Seeking on every tick would stutter; this band absorbs decode jitter
/// while still correcting gross desync (e.g. a backgrounded tab).
const SYNC_TOLERANCE_SECS: f64 = 3.0;

/// Ticks also fire on a timer so a silently stalled player gets corrected
/// even when nothing changes server-side.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub const HINT_TAP_TO_UNMUTE: &str =
    "Auto-play failed, you will need to tap the video and then un-mute it manually";
pub const HINT_TAP_TO_PLAY: &str =
    "Auto-play failed, you will need to tap the video and then push the play button manually";

/// Where a session is in the autoplay fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Initial state, nothing attempted yet.
    Settling,
    /// Goal met, no hint shown.
    Converged,
    /// Only managed to play while muted; "tap to un-mute" hint is up.
    /// Playing-while-muted is classified this way regardless of how the
    /// mute arose (fallback or the player starting out muted): either way
    /// the viewer hears nothing until they act.
    AutoplayBlockedMuted,
    /// Could not play at all; player left paused with native controls
    /// exposed and the "tap to play" hint up.
    AutoplayBlockedSilent,
}

/// Drives one player toward the goal. Owns the player exclusively; nothing
/// else may touch it while the session lives.
pub struct ConvergenceSession<P: MediaPlayer> {
    player: P,
    phase: SyncPhase,
    hint: Option<&'static str>,
}

impl<P: MediaPlayer> ConvergenceSession<P> {
    pub fn new(player: P) -> Self {
        Self {
            player,
            phase: SyncPhase::Settling,
            hint: None,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// The actionable hint the surrounding UI should show, if any.
    pub fn hint(&self) -> Option<&'static str> {
        self.hint
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    /// Tear the session down, returning the player to its owner.
    pub fn into_player(self) -> P {
        self.player
    }

    /// One convergence step. Runs whenever the room state changes and on
    /// the periodic timer. With no video pinned the session is inert.
    pub async fn tick(&mut self, playing: Option<&PlayingState>, server_now: f64) {
        let Some(goal) = goal::resolve(playing, server_now, self.player.duration()) else {
            return;
        };
        self.converge(goal).await;
    }

    async fn converge(&mut self, goal: Goal) {
        // While paused, always snap. While playing, only correct drift that
        // escaped the tolerance band.
        if self.player.is_paused()
            || (self.player.position() - goal.position).abs() > SYNC_TOLERANCE_SECS
        {
            if !self.player.is_paused() {
                debug!(
                    "Position is {:.1} and should be {:.1}",
                    self.player.position(),
                    goal.position
                );
            }
            self.player.seek(goal.position);
        }

        if !goal.should_play {
            if !self.player.is_paused() {
                self.player.pause();
            }
            self.phase = SyncPhase::Converged;
            self.set_hint(None);
            return;
        }

        if self.player.is_paused() {
            self.attempt_play().await;
        } else if !self.player.is_muted() {
            // Already playing with sound, possibly because the viewer
            // unmuted by hand after a blocked-muted fallback.
            self.phase = SyncPhase::Converged;
            self.set_hint(None);
        }
    }

    /// The autoplay fallback: unmuted, then muted, then give up and ask the
    /// viewer. Player-side rejections are absorbed here, never propagated.
    async fn attempt_play(&mut self) {
        match self.player.play().await {
            Ok(()) => {
                if self.player.is_muted() {
                    self.phase = SyncPhase::AutoplayBlockedMuted;
                    self.set_hint(Some(HINT_TAP_TO_UNMUTE));
                } else {
                    self.phase = SyncPhase::Converged;
                    self.set_hint(None);
                }
            }
            Err(e) => {
                debug!("Unmuted auto-play failed ({}), trying muted", e);
                self.player.set_muted(true);
                match self.player.play().await {
                    Ok(()) => {
                        info!("Muted auto-play succeeded");
                        self.phase = SyncPhase::AutoplayBlockedMuted;
                        self.set_hint(Some(HINT_TAP_TO_UNMUTE));
                    }
                    Err(e) => {
                        info!("Auto-play while muted also failed: {}", e);
                        self.player.set_muted(false);
                        self.phase = SyncPhase::AutoplayBlockedSilent;
                        self.set_hint(Some(HINT_TAP_TO_PLAY));
                    }
                }
            }
        }
    }

    fn set_hint(&mut self, hint: Option<&'static str>) {
        if self.hint != hint {
            self.hint = hint;
            // While a hint is up, the native controls are the viewer's way
            // out; hide them again once we're healthy.
            self.player.set_native_controls(hint.is_some());
        }
    }
}

/// Why a convergence loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The room pinned a different video (or none). The session is dead;
    /// mount a fresh one for the new video.
    VideoChanged,
    /// Cancelled through the handle (player unmounting).
    Cancelled,
    /// The room channel was torn down entirely.
    ChannelClosed,
}

/// Control handle for a running loop. Cancelling is graceful: the loop
/// finishes its current tick and never touches the player again.
pub struct ConvergenceHandle {
    cancel: Mutex<Option<oneshot::Sender<()>>>,
    hint_rx: watch::Receiver<Option<String>>,
}

impl ConvergenceHandle {
    pub fn cancel(&self) {
        if let Some(tx) = self.cancel.lock().take() {
            let _ = tx.send(());
        }
    }

    pub fn hint(&self) -> Option<String> {
        self.hint_rx.borrow().clone()
    }

    /// Watchable hint feed for the surrounding UI's banner.
    pub fn watch_hint(&self) -> watch::Receiver<Option<String>> {
        self.hint_rx.clone()
    }
}

/// Ties a session to the channel's state feed and the shared clock.
pub struct ConvergenceLoop<P: MediaPlayer> {
    session: ConvergenceSession<P>,
    video_id: String,
    clock: SharedServerClock,
    state_rx: watch::Receiver<Option<RoomState>>,
    hint_tx: watch::Sender<Option<String>>,
    cancel_rx: oneshot::Receiver<()>,
}

impl<P: MediaPlayer> ConvergenceLoop<P> {
    pub fn new(
        player: P,
        video_id: impl Into<String>,
        clock: SharedServerClock,
        state_rx: watch::Receiver<Option<RoomState>>,
    ) -> (Self, ConvergenceHandle) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (hint_tx, hint_rx) = watch::channel(None);
        (
            Self {
                session: ConvergenceSession::new(player),
                video_id: video_id.into(),
                clock,
                state_rx,
                hint_tx,
                cancel_rx,
            },
            ConvergenceHandle {
                cancel: Mutex::new(Some(cancel_tx)),
                hint_rx,
            },
        )
    }

    /// Run until the video changes, the handle cancels, or the channel
    /// closes. Returns the player so the owner can reuse or drop it.
    pub async fn run(mut self) -> (LoopExit, P) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(video = %self.video_id, "Convergence loop started");

        let exit = loop {
            let playing = {
                let state = self.state_rx.borrow();
                match state.as_ref() {
                    // Channel is between connections; hold steady until
                    // state comes back or the channel dies for good.
                    None => None,
                    Some(room) => match room.current_video() {
                        Some((id, playing)) if id == self.video_id => Some(playing.clone()),
                        _ => break LoopExit::VideoChanged,
                    },
                }
            };

            let server_now = self.clock.read().now();
            self.session.tick(playing.as_ref(), server_now).await;

            let hint = self.session.hint().map(str::to_string);
            self.hint_tx.send_if_modified(|current| {
                if *current != hint {
                    *current = hint;
                    true
                } else {
                    false
                }
            });

            tokio::select! {
                _ = &mut self.cancel_rx => break LoopExit::Cancelled,
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        break LoopExit::ChannelClosed;
                    }
                }
                _ = ticker.tick() => {}
            }
        };

        debug!(video = %self.video_id, ?exit, "Convergence loop finished");
        (exit, self.session.into_player())
    }
}

/// Translates local viewer intent into room commands carrying
/// server-clock-relative timestamps. Privilege-agnostic: the server decides
/// whether to honour them.
#[derive(Clone)]
pub struct Controls {
    handle: RoomHandle,
    clock: SharedServerClock,
}

impl Controls {
    pub fn new(handle: RoomHandle, clock: SharedServerClock) -> Self {
        Self { handle, clock }
    }

    /// Start playing such that the video is at `position` right now. The
    /// command carries `server_now - position` so every client derives the
    /// same timeline independently.
    pub fn play(&self, video_id: &str, position: f64) -> Result<(), ChannelError> {
        let started_at = self.clock.read().now() - position;
        self.handle
            .send(Command::Play(video_id.to_string(), started_at))
    }

    pub fn pause(&self, video_id: &str, position: f64) -> Result<(), ChannelError> {
        self.handle
            .send(Command::Pause(video_id.to_string(), position))
    }

    /// Seeking is an implicit pause-and-reposition on the wire.
    pub fn seek(&self, video_id: &str, position: f64) -> Result<(), ChannelError> {
        self.pause(video_id, position)
    }

    /// Unpin the current video for the whole room.
    pub fn stop(&self) -> Result<(), ChannelError> {
        self.handle.send(Command::Stop(()))
    }
}
