use crate::frame::MessageType;

/// Errors that can occur while building frames or feeding data streams.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A message type keyword was not one of MSG, RPY, ERR, ANS or NUL.
    #[error("invalid message type '{0}'")]
    InvalidMessageType(String),

    /// An ANS frame was built without an answer number.
    #[error("ANS frame requires an answer number")]
    MissingAnsno,

    /// A frame other than ANS carried an answer number.
    #[error("{0} frame must not carry an answer number")]
    UnexpectedAnsno(MessageType),

    /// A NUL frame must be terminal and carry no payload.
    #[error("NUL frame must be terminal and empty ({size} bytes, last={last})")]
    MalformedNul { size: usize, last: bool },

    /// Data was appended to a stream that has already been marked complete.
    #[error("data stream already complete")]
    StreamComplete,

    /// An I/O error occurred while reading a data stream.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
