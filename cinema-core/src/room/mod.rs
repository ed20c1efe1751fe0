//! Room state synchronization
//!
//! Wire types and the channel that keeps a client's copy of the room in
//! step with the server.

mod channel;
mod command;
mod state;

pub use channel::{
    ChannelConfig, ChannelError, ChannelStatus, ProtocolError, RoomChannel, RoomEvent, RoomHandle,
    StateAssembler,
};
pub use command::Command;
pub use state::{ChatMessage, PlayingState, RoomState, VideoState, Viewer};
