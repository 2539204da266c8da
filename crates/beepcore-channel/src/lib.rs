//! BEEP channel core.
//!
//! A [`Channel`] owns one multiplexed conversation inside a session: its
//! lifecycle ([`ChannelState`]), the correlation of requests with replies,
//! strict sequence checking of inbound frames, reassembly into
//! [`InboundStream`](beepcore_frame::InboundStream)s and both flow-control
//! windows. The session that moves frames on the wire is abstracted as
//! [`Session`]; application code plugs in through [`MessageListener`] and
//! [`ReplyListener`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use beepcore_channel::{Channel, ChannelConfig, ChannelState, Message, Session};
//!
//! fn ping(session: Arc<dyn Session>) -> beepcore_channel::Result<()> {
//!     let profile = "http://example.org/beep/echo";
//!     let channel = Channel::new(1, profile, session, ChannelConfig::default())?;
//!     channel.set_state(ChannelState::Active)?;
//!     channel.send_msg("ping", Arc::new(|reply: Message| println!("{reply:?}")))?;
//!     Ok(())
//! }
//! ```

pub mod beep_error;
pub mod channel;
pub mod config;
mod dispatch;
pub mod error;
pub mod listener;
pub mod message;
pub mod session;
pub mod state;
pub mod status;
pub mod window;

#[cfg(test)]
mod testing;

pub use beep_error::BeepError;
pub use channel::{Channel, ENCODING_NONE};
pub use config::{ChannelConfig, DeliveryMode};
pub use error::{ChannelError, ListenerError, ProtocolViolation, Result, SessionError};
pub use listener::{MessageListener, ReplyListener};
pub use message::{Message, MessageMsg};
pub use session::Session;
pub use state::ChannelState;
pub use status::{DeliveryStatus, MessageStatus};
pub use window::{LocalWindow, PeerWindow, WindowUpdate};
