use beepcore_frame::{FrameError, MessageType};

use crate::beep_error::BeepError;
use crate::state::ChannelState;

/// Violations of the channel protocol. All of them are fatal to the session.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolViolation {
    /// A frame's sequence number did not continue the channel's byte count.
    #[error("incorrect sequence number: was {actual}; expecting {expected}")]
    SequenceMismatch { expected: u64, actual: u64 },

    /// A new MSG reused a message number still queued for receipt.
    #[error("received a frame with a duplicate msgno ({0})")]
    DuplicateMsgno(u32),

    /// A continuation frame changed message type mid-message.
    #[error("incorrect message type: was {actual}; expecting {expected}")]
    MessageTypeMismatch {
        expected: MessageType,
        actual: MessageType,
    },

    /// A continuation MSG frame changed message number mid-message.
    #[error("incorrect message number: was {actual}; expecting {expected}")]
    MsgnoMismatch { expected: u32, actual: u32 },

    /// The peer sent more than the advertised receive window.
    #[error("channel window overflow ({used} bytes used, window {size})")]
    WindowOverflow { used: usize, size: usize },

    /// A reply arrived with no request outstanding.
    #[error("received unsolicited reply")]
    UnsolicitedReply,

    /// A reply did not answer the oldest outstanding request.
    #[error("received reply out of order: was {actual}; expecting {expected}")]
    ReplyOutOfOrder { expected: u32, actual: u32 },

    /// NUL arrived while answers were still being received.
    #[error("received NUL before last ANS ({0} answers open)")]
    NulWithOpenAnswers(usize),

    /// A window update acknowledged bytes that were never sent.
    #[error("window update acknowledges {ackno} but only {sent} bytes were sent")]
    AckBeyondSent { ackno: u64, sent: u64 },

    /// The frame's fields are inconsistent with its type.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] FrameError),
}

/// Failures reported by the session transport.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The transport failed to write.
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session is closed or terminating.
    #[error("session closed")]
    Closed,

    /// The peer or the session refused the request.
    #[error("session refused request: {0}")]
    Refused(String),
}

/// What a message listener asks the channel to do instead of continuing.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Answer the request with this ERR.
    #[error("reply with error: {0}")]
    Reply(#[from] BeepError),

    /// Close the channel.
    #[error("abort channel: {0}")]
    Abort(String),
}

/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Protocol violation; the channel has been aborted.
    #[error("protocol violation on channel {channel}: {violation}")]
    Protocol {
        channel: u32,
        violation: ProtocolViolation,
    },

    /// The operation is not permitted in the channel's current state.
    #[error("channel {channel} is {state}; {operation} not permitted")]
    InvalidState {
        channel: u32,
        state: ChannelState,
        operation: &'static str,
    },

    /// Illegal lifecycle transition.
    #[error("channel {channel}: illegal state transition {from} -> {to}")]
    InvalidTransition {
        channel: u32,
        from: ChannelState,
        to: ChannelState,
    },

    /// Receive buffer resize below the bytes currently buffered.
    #[error("receive buffer size {size} is smaller than the {used} bytes in use")]
    BufferSize { size: usize, used: usize },

    /// Reply not allowed for this request any more (or not yet).
    #[error("msgno {msgno}: cannot send {attempted}: {reason}")]
    ReplyState {
        msgno: u32,
        attempted: MessageType,
        reason: &'static str,
    },

    /// Every message number is held by an outstanding request.
    #[error("channel {0}: no free message number")]
    MsgnoExhausted(u32),

    /// Channel number outside the legal range.
    #[error("invalid channel number {0}")]
    InvalidChannel(u32),

    /// Session transport failure.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

impl ChannelError {
    /// True for errors that terminate the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChannelError::Protocol { .. })
    }

    /// The protocol violation, if this is one.
    pub fn violation(&self) -> Option<&ProtocolViolation> {
        match self {
            ChannelError::Protocol { violation, .. } => Some(violation),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
