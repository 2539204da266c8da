//! Cutting an outbound message into frames.

use bytes::Bytes;

use crate::frame::{Frame, MessageType};
use crate::stream::OutboundStream;

/// Result of asking an outbound stream for the next frame's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slice {
    /// A frame's worth of payload is ready.
    Ready {
        payload: Vec<Bytes>,
        size: usize,
        last: bool,
    },
    /// Nothing to send yet: the stream is open but holds no data.
    Stalled,
}

/// Take the payload for the next frame, at most `max` bytes.
///
/// A complete stream with nothing left yields one empty terminal slice, so
/// completion is always signaled on the wire. An open stream with no data
/// yields [`Slice::Stalled`] instead of an empty non-terminal frame.
pub fn next_slice(stream: &OutboundStream, max: usize) -> Slice {
    let (payload, size, exhausted) = stream.take_up_to(max);
    if size == 0 && !exhausted {
        return Slice::Stalled;
    }
    Slice::Ready {
        payload,
        size,
        last: exhausted,
    }
}

/// Header fields shared by every frame of one outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTemplate {
    pub message_type: MessageType,
    pub channel: u32,
    pub msgno: u32,
    pub ansno: Option<u32>,
}

impl FrameTemplate {
    /// Build the frame for a ready slice starting at `seqno`.
    pub fn frame(&self, seqno: u64, payload: Vec<Bytes>, last: bool) -> Frame {
        let mut frame = Frame::new(
            self.message_type,
            self.channel,
            self.msgno,
            self.ansno,
            seqno,
            last,
        );
        for segment in payload {
            frame.add_payload(segment);
        }
        frame
    }
}
