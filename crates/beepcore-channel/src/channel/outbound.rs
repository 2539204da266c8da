//! The send path: msgno allocation, pending queue and windowed framing.

use std::sync::Arc;

use beepcore_frame::{is_control, next_slice, FrameTemplate, MessageType, OutboundStream, Slice};
use tracing::{debug, trace, warn};

use super::{Channel, SendState};
use crate::error::{ChannelError, Result, SessionError};
use crate::listener::ReplyListener;
use crate::message::ReceivedMsg;
use crate::status::MessageStatus;

/// Requests whose answer went out during one send pass.
#[derive(Default)]
struct Answered {
    /// Next requests to hand to the listener.
    next: Vec<Arc<ReceivedMsg>>,
    /// Answered requests still receiving frames; their bodies are dropped.
    unfinished: Vec<Arc<ReceivedMsg>>,
}

impl Channel {
    /// Send a request. Replies go to `reply_listener`.
    ///
    /// Returns once as much of the message as the peer window allows has
    /// been handed to the session; the rest goes out as the window reopens
    /// or, for an open stream, as data is appended.
    pub fn send_msg(
        &self,
        stream: impl Into<OutboundStream>,
        reply_listener: Arc<dyn ReplyListener>,
    ) -> Result<Arc<MessageStatus>> {
        self.require_traffic("send MSG")?;

        let status = {
            let mut sent = self.inner.sent.lock();
            let msgno = sent
                .allocate(is_control(self.inner.number))
                .ok_or(ChannelError::MsgnoExhausted(self.inner.number))?;
            let status = Arc::new(MessageStatus::new(
                self.template(MessageType::Msg, msgno, None),
                stream.into(),
                Some(reply_listener),
            ));
            sent.queue.push_back(Arc::clone(&status));
            status
        };
        debug!(channel = self.inner.number, msgno = status.msgno(), "sending MSG");

        self.send_to_peer(&status)?;
        Ok(status)
    }

    /// Queue a reply to a received request.
    pub(crate) fn send_reply(
        &self,
        entry: &ReceivedMsg,
        message_type: MessageType,
        stream: OutboundStream,
    ) -> Result<Arc<MessageStatus>> {
        self.require_traffic("send reply")?;
        let ansno = entry.begin_reply(message_type)?;

        let status = Arc::new(MessageStatus::new(
            self.template(message_type, entry.msgno, ansno),
            stream,
            None,
        ));
        debug!(
            channel = self.inner.number,
            msgno = entry.msgno,
            ?ansno,
            %message_type,
            "sending reply"
        );

        self.send_to_peer(&status)?;
        Ok(status)
    }

    /// Apply the peer's window advertisement: `window` bytes starting at
    /// sequence number `ackno`. Queued messages resume when a closed window
    /// reopens.
    pub fn update_peer_receive_buffer_size(&self, ackno: u64, window: usize) -> Result<()> {
        let reopened = {
            let mut send = self.inner.send.lock();
            let sequence = send.sequence;
            match send.peer.update(ackno, window, sequence) {
                Ok(reopened) => {
                    debug!(
                        channel = self.inner.number,
                        ackno,
                        window,
                        peer_window = send.peer.size(),
                        "peer window updated"
                    );
                    reopened
                }
                Err(violation) => {
                    drop(send);
                    return Err(self.protocol_violation(violation));
                }
            }
        };

        if reopened {
            self.send_queued_messages()?;
        }
        Ok(())
    }

    fn send_to_peer(&self, status: &Arc<MessageStatus>) -> Result<()> {
        self.inner.pending.lock().push_back(Arc::clone(status));
        status.stream().attach(self.resume_hook());
        self.send_queued_messages()
    }

    /// Transmit pending messages in order until the queue empties, the
    /// peer window closes or the head message runs out of data.
    pub(crate) fn send_queued_messages(&self) -> Result<()> {
        let mut answered = Answered::default();
        let result = self.drain_pending(&mut answered);
        for entry in answered.unfinished {
            entry.stream.discard();
        }
        for entry in answered.next {
            self.deliver_request(entry);
        }
        result
    }

    fn drain_pending(&self, answered: &mut Answered) -> Result<()> {
        let mut send = self.inner.send.lock();
        loop {
            if self.state().is_terminal() {
                return Ok(());
            }
            let Some(status) = self.inner.pending.lock().front().cloned() else {
                return Ok(());
            };

            match self.send_frames(&mut send, &status) {
                Ok(true) => {
                    self.remove_pending(&status);
                    status.stream().detach();
                    status.mark_sent();
                    trace!(
                        channel = self.inner.number,
                        msgno = status.msgno(),
                        message_type = %status.message_type(),
                        "message sent"
                    );
                    if status.message_type().completes_exchange() {
                        self.finish_request(&status, answered);
                    }
                }
                Ok(false) => return Ok(()),
                Err(err) => {
                    self.remove_pending(&status);
                    status.stream().detach();
                    status.mark_not_sent();
                    if status.message_type() == MessageType::Msg {
                        self.inner
                            .sent
                            .lock()
                            .queue
                            .retain(|queued| !Arc::ptr_eq(queued, &status));
                    }
                    warn!(
                        channel = self.inner.number,
                        msgno = status.msgno(),
                        error = %err,
                        "message not sent"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Send frames of `status` while the peer window allows. Returns true
    /// once the terminal frame is out.
    fn send_frames(&self, send: &mut SendState, status: &MessageStatus) -> Result<bool> {
        let max_frame = self.inner.session.max_frame_size();
        if max_frame == 0 {
            return Err(ChannelError::Session(SessionError::Refused(
                "maximum frame size is zero".to_string(),
            )));
        }

        loop {
            if !send.peer.is_open() {
                trace!(
                    channel = self.inner.number,
                    msgno = status.msgno(),
                    "peer window closed"
                );
                return Ok(false);
            }

            let max = max_frame.min(send.peer.size());
            let (payload, size, last) = match next_slice(status.stream(), max) {
                Slice::Ready {
                    payload,
                    size,
                    last,
                } => (payload, size, last),
                Slice::Stalled => return Ok(false),
            };

            let frame = status.template().frame(send.sequence, payload, last);
            trace!(channel = self.inner.number, %frame, "sending frame");
            self.inner.session.send_frame(frame)?;

            send.sequence += size as u64;
            send.peer.consume(size);
            if last {
                return Ok(true);
            }
        }
    }

    /// A request has been answered in full: drop it and release the next one.
    ///
    /// A request whose last frame has not arrived yet stays queued, retired,
    /// so its remaining frames are absorbed instead of starting a new request.
    fn finish_request(&self, reply: &MessageStatus, answered: &mut Answered) {
        let mut received = self.inner.received.lock();
        match received.front() {
            Some(head) if head.msgno == reply.msgno() => {
                if !head.stream.is_complete() {
                    head.retire();
                    answered.unfinished.push(Arc::clone(head));
                    return;
                }
                received.pop_front();
            }
            _ => {
                warn!(
                    channel = self.inner.number,
                    msgno = reply.msgno(),
                    "answered request is not at the head of the queue"
                );
                return;
            }
        }
        if let Some(next) = received.front() {
            if next.mark_delivered() {
                answered.next.push(Arc::clone(next));
            }
        }
    }

    fn remove_pending(&self, status: &Arc<MessageStatus>) {
        self.inner
            .pending
            .lock()
            .retain(|queued| !Arc::ptr_eq(queued, status));
    }

    fn template(&self, message_type: MessageType, msgno: u32, ansno: Option<u32>) -> FrameTemplate {
        FrameTemplate {
            message_type,
            channel: self.inner.number,
            msgno,
            ansno,
        }
    }
}
