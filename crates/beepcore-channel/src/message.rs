//! Received messages and the handle used to answer a request.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use beepcore_frame::{InboundStream, MessageType, OutboundStream};
use parking_lot::Mutex;

use crate::beep_error::BeepError;
use crate::channel::Channel;
use crate::error::{ChannelError, Result};
use crate::status::MessageStatus;

/// A reply (RPY, ERR, ANS or NUL) received for a MSG this side sent.
#[derive(Clone)]
pub struct Message {
    channel: u32,
    message_type: MessageType,
    msgno: u32,
    ansno: Option<u32>,
    stream: Option<InboundStream>,
}

impl Message {
    pub(crate) fn new(
        channel: u32,
        message_type: MessageType,
        msgno: u32,
        ansno: Option<u32>,
        stream: Option<InboundStream>,
    ) -> Self {
        Self {
            channel,
            message_type,
            msgno,
            ansno,
            stream,
        }
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn msgno(&self) -> u32 {
        self.msgno
    }

    /// Answer number; set on ANS only.
    pub fn ansno(&self) -> Option<u32> {
        self.ansno
    }

    /// The body, which may still be arriving. NUL carries none.
    pub fn stream(&self) -> Option<&InboundStream> {
        self.stream.as_ref()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("channel", &self.channel)
            .field("message_type", &self.message_type)
            .field("msgno", &self.msgno)
            .field("ansno", &self.ansno)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyState {
    Pending,
    Answering { next_ansno: u32 },
    Done,
}

/// Entry in a channel's received-request queue.
pub(crate) struct ReceivedMsg {
    pub(crate) msgno: u32,
    pub(crate) stream: InboundStream,
    delivered: AtomicBool,
    retired: AtomicBool,
    reply: Mutex<ReplyState>,
}

impl ReceivedMsg {
    pub(crate) fn new(msgno: u32, stream: InboundStream) -> Self {
        Self {
            msgno,
            stream,
            delivered: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            reply: Mutex::new(ReplyState::Pending),
        }
    }

    /// Returns true for the caller that flips the flag.
    pub(crate) fn mark_delivered(&self) -> bool {
        !self.delivered.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }

    /// Answered while frames of the request were still arriving; the entry
    /// stays queued only to absorb them.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Claim the right to send a reply of `message_type`, returning the
    /// answer number for ANS.
    pub(crate) fn begin_reply(&self, message_type: MessageType) -> Result<Option<u32>> {
        let refuse = |reason| ChannelError::ReplyState {
            msgno: self.msgno,
            attempted: message_type,
            reason,
        };

        let mut reply = self.reply.lock();
        match (*reply, message_type) {
            (ReplyState::Done, _) => Err(refuse("request already answered")),
            (ReplyState::Pending, MessageType::Rpy | MessageType::Err) => {
                *reply = ReplyState::Done;
                Ok(None)
            }
            (ReplyState::Answering { .. }, MessageType::Rpy | MessageType::Err) => {
                Err(refuse("answers in progress; finish with NUL"))
            }
            (ReplyState::Pending, MessageType::Ans) => {
                *reply = ReplyState::Answering { next_ansno: 1 };
                Ok(Some(0))
            }
            (ReplyState::Answering { next_ansno }, MessageType::Ans) => {
                *reply = ReplyState::Answering {
                    next_ansno: next_ansno.wrapping_add(1),
                };
                Ok(Some(next_ansno))
            }
            (_, MessageType::Nul) => {
                *reply = ReplyState::Done;
                Ok(None)
            }
            (_, MessageType::Msg) => Err(refuse("MSG is not a reply")),
        }
    }
}

/// A request (MSG) received from the peer, with the operations to answer it.
///
/// Answer with exactly one RPY or ERR, or with any number of ANS followed by
/// one NUL. The next request on the channel is delivered once the answer has
/// been sent in full.
#[derive(Clone)]
pub struct MessageMsg {
    channel: Channel,
    entry: Arc<ReceivedMsg>,
}

impl MessageMsg {
    pub(crate) fn new(channel: Channel, entry: Arc<ReceivedMsg>) -> Self {
        Self { channel, entry }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn msgno(&self) -> u32 {
        self.entry.msgno
    }

    /// The request body, which may still be arriving.
    pub fn stream(&self) -> &InboundStream {
        &self.entry.stream
    }

    pub fn send_rpy(&self, stream: impl Into<OutboundStream>) -> Result<Arc<MessageStatus>> {
        self.send(MessageType::Rpy, stream.into())
    }

    /// Reply with a structured error, serialized by the session.
    pub fn send_err(&self, error: &BeepError) -> Result<Arc<MessageStatus>> {
        let body = self.channel.session().serialize_error(error);
        self.send(MessageType::Err, OutboundStream::from_bytes(body))
    }

    /// Reply with an ERR whose body the caller has already encoded.
    pub fn send_err_stream(&self, stream: impl Into<OutboundStream>) -> Result<Arc<MessageStatus>> {
        self.send(MessageType::Err, stream.into())
    }

    /// Send one answer; answer numbers count up from 0.
    pub fn send_ans(&self, stream: impl Into<OutboundStream>) -> Result<Arc<MessageStatus>> {
        self.send(MessageType::Ans, stream.into())
    }

    /// Finish a sequence of answers.
    pub fn send_nul(&self) -> Result<Arc<MessageStatus>> {
        self.send(MessageType::Nul, OutboundStream::empty())
    }

    fn send(
        &self,
        message_type: MessageType,
        stream: OutboundStream,
    ) -> Result<Arc<MessageStatus>> {
        self.channel.send_reply(&self.entry, message_type, stream)
    }
}

impl fmt::Debug for MessageMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageMsg")
            .field("channel", &self.channel.number())
            .field("msgno", &self.entry.msgno)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ReceivedMsg {
        ReceivedMsg::new(7, InboundStream::new())
    }

    #[test]
    fn delivered_once() {
        let msg = entry();
        assert!(msg.mark_delivered());
        assert!(!msg.mark_delivered());
    }

    #[test]
    fn single_reply() {
        let msg = entry();
        assert_eq!(msg.begin_reply(MessageType::Rpy).unwrap(), None);
        let err = msg.begin_reply(MessageType::Err).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::ReplyState {
                msgno: 7,
                attempted: MessageType::Err,
                ..
            }
        ));
    }

    #[test]
    fn answers_then_nul() {
        let msg = entry();
        assert_eq!(msg.begin_reply(MessageType::Ans).unwrap(), Some(0));
        assert_eq!(msg.begin_reply(MessageType::Ans).unwrap(), Some(1));
        assert!(msg.begin_reply(MessageType::Rpy).is_err());
        assert_eq!(msg.begin_reply(MessageType::Ans).unwrap(), Some(2));
        assert_eq!(msg.begin_reply(MessageType::Nul).unwrap(), None);
        assert!(msg.begin_reply(MessageType::Ans).is_err());
    }

    #[test]
    fn nul_without_answers() {
        let msg = entry();
        assert_eq!(msg.begin_reply(MessageType::Nul).unwrap(), None);
        assert!(msg.begin_reply(MessageType::Nul).is_err());
    }
}
