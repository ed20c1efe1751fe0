//! Watch Session
//!
//! The top-level object an application host holds: one room channel, one
//! server time source, at most one convergence loop for the currently
//! mounted player, and the outbound control surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::clock::{ClockError, ServerTimeSource};
use crate::playback::{Controls, ConvergenceHandle, ConvergenceLoop, MediaPlayer};
use crate::room::{
    ChannelConfig, ChannelError, ChannelStatus, Command, RoomChannel, RoomEvent, RoomHandle,
    RoomState,
};

/// The running convergence loop for the mounted player, if any. The `id`
/// distinguishes this attachment from any later one occupying the slot, so
/// a finished loop only ever clears its own entry.
struct PlayerAttachment {
    convergence: ConvergenceHandle,
    video_id: String,
    id: u64,
}

/// One viewer's session in one room.
///
/// The channel task keeps reconnecting on its own; `close` tears everything
/// down for good. Dropping the session (and every handle cloned from it)
/// has the same effect.
pub struct WatchSession {
    time: ServerTimeSource,
    handle: RoomHandle,
    attachment: Arc<Mutex<Option<PlayerAttachment>>>,
    attachment_seq: AtomicU64,
}

impl WatchSession {
    /// Connect to a room. Returns the session plus the lifecycle event
    /// stream the surrounding UI renders as its connectivity banner.
    pub fn connect(
        config: ChannelConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RoomEvent>), ClockError> {
        info!(room = %config.room, user = %config.user, "Starting watch session");
        let time = ServerTimeSource::start(&config.base_url)?;
        let (handle, events) = RoomChannel::connect(config);
        Ok((
            Self {
                time,
                handle,
                attachment: Arc::new(Mutex::new(None)),
                attachment_seq: AtomicU64::new(0),
            },
            events,
        ))
    }

    /// Latest room state, if the channel is synced.
    pub fn room(&self) -> Option<RoomState> {
        self.handle.state()
    }

    pub fn status(&self) -> ChannelStatus {
        self.handle.status()
    }

    /// Watchable state feed for chat, roster and catalog consumers.
    pub fn watch_room(&self) -> watch::Receiver<Option<RoomState>> {
        self.handle.watch_state()
    }

    /// Best estimate of "now" on the server's clock, unix seconds.
    pub fn server_now(&self) -> f64 {
        self.time.now()
    }

    /// The local control surface (play/pause/seek/stop with clock-relative
    /// timestamps).
    pub fn controls(&self) -> Controls {
        Controls::new(self.handle.clone(), self.time.clock())
    }

    /// Attach a player for the given video and start converging it.
    /// Replaces (and cancels) any previous attachment; a stale loop never
    /// touches a player it no longer owns. Returns the hint feed for the
    /// playback banner.
    pub fn attach_player<P>(
        &self,
        player: P,
        video_id: impl Into<String>,
    ) -> watch::Receiver<Option<String>>
    where
        P: MediaPlayer + Send + 'static,
    {
        let video_id = video_id.into();
        let (convergence, convergence_handle) = ConvergenceLoop::new(
            player,
            video_id.clone(),
            self.time.clock(),
            self.handle.watch_state(),
        );
        let hint_rx = convergence_handle.watch_hint();
        let id = self.attachment_seq.fetch_add(1, Ordering::Relaxed);

        let mut attachment = self.attachment.lock();
        if let Some(previous) = attachment.take() {
            debug!(video = %previous.video_id, "Replacing player attachment");
            previous.convergence.cancel();
        }
        *attachment = Some(PlayerAttachment {
            convergence: convergence_handle,
            video_id,
            id,
        });
        drop(attachment);

        let slot = Arc::clone(&self.attachment);
        tokio::spawn(async move {
            let (exit, _player) = convergence.run().await;
            debug!(?exit, "Convergence loop returned");
            // Vacate the slot unless a newer attachment has replaced us
            // (or a detach already emptied it).
            let mut slot = slot.lock();
            if slot.as_ref().map(|a| a.id) == Some(id) {
                *slot = None;
            }
        });

        hint_rx
    }

    /// Whether a convergence loop currently owns a player.
    pub fn player_attached(&self) -> bool {
        self.attachment.lock().is_some()
    }

    /// Detach the current player, cancelling its convergence loop.
    pub fn detach_player(&self) {
        if let Some(attachment) = self.attachment.lock().take() {
            debug!(video = %attachment.video_id, "Detaching player");
            attachment.convergence.cancel();
        }
    }

    pub fn send_chat(&self, message: impl Into<String>) -> Result<(), ChannelError> {
        self.handle.send(Command::Chat(message.into()))
    }

    pub fn grant_admin(&self, user: impl Into<String>) -> Result<(), ChannelError> {
        self.handle.send(Command::Admin(user.into()))
    }

    pub fn revoke_admin(&self, user: impl Into<String>) -> Result<(), ChannelError> {
        self.handle.send(Command::Unadmin(user.into()))
    }

    pub fn set_title(&self, title: impl Into<String>) -> Result<(), ChannelError> {
        self.handle.send(Command::Title(title.into()))
    }

    pub fn set_public(&self, public: bool) -> Result<(), ChannelError> {
        self.handle.send(Command::Public(public))
    }

    /// Leave the room: cancel playback convergence, close the channel, and
    /// suppress any further reconnects.
    pub fn close(&self) {
        info!("Closing watch session");
        self.detach_player();
        self.handle.close();
    }
}
