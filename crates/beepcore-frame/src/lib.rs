//! Frame model and message data streams for BEEP channels.
//!
//! This is the leaf layer of beepcore. A [`Frame`] is the field-level view of
//! one wire frame (type, message/answer number, sequence number, completion
//! flag, payload segments); the header bytes themselves belong to the session
//! transport. Message bodies travel in [`InboundStream`] / [`OutboundStream`]
//! so a message never has to be held in memory as a whole.

pub mod channel;
pub mod error;
pub mod frame;
pub mod slicer;
pub mod stream;

pub use channel::{
    is_control, is_valid_channel, next_msgno, CONTROL, DEFAULT_WINDOW_SIZE, FIRST_MSGNO,
    GREETING_MSGNO, MAX_CHANNEL, MAX_MSGNO,
};
pub use error::{FrameError, Result};
pub use frame::{Frame, MessageType};
pub use slicer::{next_slice, FrameTemplate, Slice};
pub use stream::{InboundStream, OutboundStream, ReleaseHook, ResumeHook};
