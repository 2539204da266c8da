//! The channel's view of the session that owns it.

use beepcore_frame::Frame;
use bytes::Bytes;

use crate::beep_error::BeepError;
use crate::error::SessionError;
use crate::window::WindowUpdate;

/// Transport and session services a channel depends on.
///
/// Implementations must be callable from several threads at once: frames are
/// sent from whichever thread drives the channel's send path, while inbound
/// processing and window advertisements may run concurrently.
pub trait Session: Send + Sync {
    /// Write one frame to the peer.
    ///
    /// Called with the channel's send section held: the implementation must
    /// not call back into the same channel's send path.
    fn send_frame(&self, frame: Frame) -> Result<(), SessionError>;

    /// Largest payload a single frame may carry.
    fn max_frame_size(&self) -> usize;

    /// Start the close handshake for `channel`.
    fn close_channel(&self, channel: u32, code: u16, reason: Option<&str>)
        -> Result<(), SessionError>;

    /// Advertise a new receive window to the peer.
    ///
    /// Returns `Ok(false)` when the session chose not to send the update; the
    /// channel will then offer it again later.
    fn update_receive_buffer_size(&self, update: &WindowUpdate) -> Result<bool, SessionError>;

    /// Stop reading from the transport; called when a tuning exchange finishes.
    fn disable_io(&self);

    /// Tear the session down after a fatal error.
    fn terminate(&self, reason: &str);

    /// Serialize a structured error into an ERR payload.
    fn serialize_error(&self, error: &BeepError) -> Bytes {
        Bytes::from(error.to_error_element())
    }
}
