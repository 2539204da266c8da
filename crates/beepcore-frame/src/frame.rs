use std::fmt;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// The five BEEP message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Request.
    Msg,
    /// Positive reply.
    Rpy,
    /// Error reply.
    Err,
    /// One answer of a one-to-many reply.
    Ans,
    /// Terminates a one-to-many reply.
    Nul,
}

impl MessageType {
    /// The wire keyword for this type.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Msg => "MSG",
            MessageType::Rpy => "RPY",
            MessageType::Err => "ERR",
            MessageType::Ans => "ANS",
            MessageType::Nul => "NUL",
        }
    }

    /// True for every type that answers a MSG.
    pub fn is_reply(self) -> bool {
        !matches!(self, MessageType::Msg)
    }

    /// True for the types that close out a request once fully sent
    /// (RPY, ERR and NUL; ANS leaves the exchange open).
    pub fn completes_exchange(self) -> bool {
        matches!(self, MessageType::Rpy | MessageType::Err | MessageType::Nul)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MSG" => Ok(MessageType::Msg),
            "RPY" => Ok(MessageType::Rpy),
            "ERR" => Ok(MessageType::Err),
            "ANS" => Ok(MessageType::Ans),
            "NUL" => Ok(MessageType::Nul),
            other => Err(FrameError::InvalidMessageType(other.to_string())),
        }
    }
}

/// One segment of a message as exchanged with the session transport.
///
/// The header encoding is owned by the session; a frame here is only the
/// field-level view: type, numbering, sequencing, completion flag and the
/// ordered payload segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type carried by this frame.
    pub message_type: MessageType,
    /// Channel the frame belongs to.
    pub channel: u32,
    /// Message number.
    pub msgno: u32,
    /// Answer number, present on ANS frames only.
    pub ansno: Option<u32>,
    /// Sequence number of the first payload byte on this channel.
    pub seqno: u64,
    /// Set on the terminal frame of a message.
    pub last: bool,
    payload: Vec<Bytes>,
}

impl Frame {
    /// Create a frame with an empty payload.
    pub fn new(
        message_type: MessageType,
        channel: u32,
        msgno: u32,
        ansno: Option<u32>,
        seqno: u64,
        last: bool,
    ) -> Self {
        Self {
            message_type,
            channel,
            msgno,
            ansno,
            seqno,
            last,
            payload: Vec::new(),
        }
    }

    /// Builder-style payload setter for a single segment.
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload.clear();
        self.payload.push(payload.into());
        self
    }

    /// Append a payload segment.
    pub fn add_payload(&mut self, segment: Bytes) {
        self.payload.push(segment);
    }

    /// Payload segments in order.
    pub fn payload(&self) -> &[Bytes] {
        &self.payload
    }

    /// Take ownership of the payload segments.
    pub fn into_payload(self) -> Vec<Bytes> {
        self.payload
    }

    /// Payload size in bytes; this is what the frame consumes of a window.
    pub fn size(&self) -> usize {
        self.payload.iter().map(Bytes::len).sum()
    }

    /// Payload copied into one contiguous buffer.
    pub fn payload_bytes(&self) -> Bytes {
        match self.payload.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            segments => {
                let mut buf = BytesMut::with_capacity(self.size());
                for segment in segments {
                    buf.extend_from_slice(segment);
                }
                buf.freeze()
            }
        }
    }

    /// Check the field combinations the protocol forbids.
    pub fn check(&self) -> Result<()> {
        match (self.message_type, self.ansno) {
            (MessageType::Ans, None) => return Err(FrameError::MissingAnsno),
            (MessageType::Ans, Some(_)) | (_, None) => {}
            (other, Some(_)) => return Err(FrameError::UnexpectedAnsno(other)),
        }

        if self.message_type == MessageType::Nul && (!self.last || self.size() != 0) {
            return Err(FrameError::MalformedNul {
                size: self.size(),
                last: self.last,
            });
        }

        Ok(())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.message_type,
            self.channel,
            self.msgno,
            if self.last { '.' } else { '*' },
            self.seqno,
            self.size()
        )?;
        if let Some(ansno) = self.ansno {
            write!(f, " {ansno}")?;
        }
        Ok(())
    }
}
