//! Frame validation, reassembly and reply correlation.

use std::sync::Arc;

use beepcore_frame::{Frame, InboundStream, MessageType};
use tracing::{debug, error, trace, warn};

use super::{Channel, Continuation, InboundReply, RecvState};
use crate::beep_error::{BeepError, CODE_SERVICE_NOT_AVAILABLE};
use crate::error::{ChannelError, ListenerError, ProtocolViolation, Result};
use crate::listener::{notify_reply, ReplyListener};
use crate::message::{Message, MessageMsg, ReceivedMsg};
use crate::state::ChannelState;
use crate::status::DeliveryStatus;

/// What an accepted frame asks to hand to the application.
enum Arrival {
    Nothing,
    Request(Arc<ReceivedMsg>),
    Reply(Arc<dyn ReplyListener>, Message),
}

impl Channel {
    /// Accept the next frame the session received for this channel.
    ///
    /// Frames must be posted one at a time, in transport order. A protocol
    /// violation aborts the channel, terminates the session and is returned
    /// as [`ChannelError::Protocol`].
    pub fn post_frame(&self, frame: Frame) -> Result<()> {
        self.require_traffic("receive frame")?;
        trace!(channel = self.inner.number, %frame, "frame received");

        let last = frame.last;
        let (arrival, dropped) = match self.ingest(frame) {
            Ok(ingested) => ingested,
            Err(violation) => return Err(self.protocol_violation(violation)),
        };
        if dropped > 0 {
            self.release_dropped(dropped);
        }

        if last && self.state() == ChannelState::Tuning {
            self.inner.session.disable_io();
        }

        match arrival {
            Arrival::Nothing => {}
            Arrival::Request(entry) => self.deliver_request(entry),
            Arrival::Reply(listener, message) => self.deliver_reply(listener, message),
        }
        Ok(())
    }

    /// Returns what to deliver and how many payload bytes went to a
    /// discarded body.
    fn ingest(&self, frame: Frame) -> std::result::Result<(Arrival, usize), ProtocolViolation> {
        let mut recv = self.inner.recv.lock();
        frame.check().map_err(ProtocolViolation::MalformedFrame)?;
        self.validate(&recv, &frame)?;

        let size = frame.size();
        recv.window.accept(size)?;
        recv.sequence += size as u64;
        recv.continuation = (!frame.last).then_some(Continuation {
            message_type: frame.message_type,
            msgno: frame.msgno,
        });
        let saturated = recv.window.is_saturated(recv.sequence);

        Ok(match frame.message_type {
            MessageType::Msg => self.route_request(frame),
            _ => self.route_reply(frame, saturated),
        })
    }

    fn validate(
        &self,
        recv: &RecvState,
        frame: &Frame,
    ) -> std::result::Result<(), ProtocolViolation> {
        match recv.continuation {
            None => {
                if frame.message_type == MessageType::Msg
                    && self
                        .inner
                        .received
                        .lock()
                        .iter()
                        .any(|entry| entry.msgno == frame.msgno)
                {
                    return Err(ProtocolViolation::DuplicateMsgno(frame.msgno));
                }
            }
            Some(previous) => {
                if previous.message_type != frame.message_type {
                    return Err(ProtocolViolation::MessageTypeMismatch {
                        expected: previous.message_type,
                        actual: frame.message_type,
                    });
                }
                if frame.message_type == MessageType::Msg && previous.msgno != frame.msgno {
                    return Err(ProtocolViolation::MsgnoMismatch {
                        expected: previous.msgno,
                        actual: frame.msgno,
                    });
                }
            }
        }

        if frame.seqno != recv.sequence {
            return Err(ProtocolViolation::SequenceMismatch {
                expected: recv.sequence,
                actual: frame.seqno,
            });
        }

        if frame.message_type != MessageType::Msg {
            let sent = self.inner.sent.lock();
            let head = sent
                .queue
                .front()
                .ok_or(ProtocolViolation::UnsolicitedReply)?;
            if head.msgno() != frame.msgno {
                return Err(ProtocolViolation::ReplyOutOfOrder {
                    expected: head.msgno(),
                    actual: frame.msgno,
                });
            }

            let replies = self.inner.replies.lock();
            if let Some(open) = replies.first() {
                if frame.message_type == MessageType::Nul {
                    return Err(ProtocolViolation::NulWithOpenAnswers(replies.len()));
                }
                if open.message_type != frame.message_type {
                    return Err(ProtocolViolation::MessageTypeMismatch {
                        expected: open.message_type,
                        actual: frame.message_type,
                    });
                }
            }
        }

        Ok(())
    }

    fn route_request(&self, frame: Frame) -> (Arrival, usize) {
        let mut received = self.inner.received.lock();
        let continuing = received
            .back()
            .filter(|tail| tail.msgno == frame.msgno)
            .cloned();
        let entry = match continuing {
            Some(entry) => entry,
            None => {
                let entry = Arc::new(ReceivedMsg::new(frame.msgno, self.inbound_stream()));
                received.push_back(Arc::clone(&entry));
                entry
            }
        };
        let last = frame.last;
        let dropped = append(&entry.stream, frame);

        if entry.is_retired() {
            if last {
                received.retain(|queued| !Arc::ptr_eq(queued, &entry));
                trace!(
                    channel = self.inner.number,
                    msgno = entry.msgno,
                    "answered request fully received"
                );
            }
            return (Arrival::Nothing, dropped);
        }

        let is_head = received
            .front()
            .is_some_and(|head| Arc::ptr_eq(head, &entry));
        if is_head && entry.mark_delivered() {
            (Arrival::Request(entry), dropped)
        } else {
            (Arrival::Nothing, dropped)
        }
    }

    fn route_reply(&self, frame: Frame, saturated: bool) -> (Arrival, usize) {
        let mut sent = self.inner.sent.lock();
        let Some(status) = sent.queue.front().cloned() else {
            return (Arrival::Nothing, 0);
        };

        let number = self.inner.number;
        let message_type = frame.message_type;
        let msgno = frame.msgno;
        let last = frame.last;

        let mut dropped = 0;
        let message = if message_type == MessageType::Nul {
            sent.queue.pop_front();
            status.set(DeliveryStatus::ReplyReceived);
            Some(Message::new(number, message_type, msgno, None, None))
        } else {
            let mut replies = self.inner.replies.lock();
            let found = match message_type {
                MessageType::Ans => replies.iter().position(|reply| reply.ansno == frame.ansno),
                _ => (!replies.is_empty()).then_some(0),
            };
            let index = match found {
                Some(index) => index,
                None => {
                    replies.push(InboundReply {
                        message_type,
                        ansno: frame.ansno,
                        stream: self.inbound_stream(),
                        notified: false,
                    });
                    replies.len() - 1
                }
            };

            let reply = &mut replies[index];
            let stream = reply.stream.clone();
            let ansno = reply.ansno;
            dropped = append(&stream, frame);

            let notify = !reply.notified
                && (self.inner.config.notify_on_first_frame || saturated || last);
            if notify {
                reply.notified = true;
            }

            if last {
                replies.remove(index);
                if message_type != MessageType::Ans {
                    sent.queue.pop_front();
                    status.set(if message_type == MessageType::Err {
                        DeliveryStatus::ErrorReceived
                    } else {
                        DeliveryStatus::ReplyReceived
                    });
                }
            }

            notify.then(|| Message::new(number, message_type, msgno, ansno, Some(stream)))
        };

        let Some(message) = message else {
            trace!(channel = number, msgno, "reply held until more frames arrive");
            return (Arrival::Nothing, dropped);
        };
        let arrival = match status.reply_listener() {
            Some(listener) => Arrival::Reply(Arc::clone(listener), message),
            None => {
                debug!(channel = number, msgno, "no reply listener; dropping reply");
                Arrival::Nothing
            }
        };
        (arrival, dropped)
    }

    /// Hand a request to the message listener on the request dispatcher.
    pub(super) fn deliver_request(&self, entry: Arc<ReceivedMsg>) {
        let message = MessageMsg::new(self.clone(), entry);
        let channel = self.clone();
        self.inner
            .requests
            .submit(Box::new(move || channel.run_message_listener(message)));
    }

    fn deliver_reply(&self, listener: Arc<dyn ReplyListener>, message: Message) {
        self.inner
            .answers
            .submit(Box::new(move || notify_reply(listener.as_ref(), message)));
    }

    fn run_message_listener(&self, message: MessageMsg) {
        let number = self.inner.number;
        let msgno = message.msgno();
        let Some(listener) = self.message_listener() else {
            debug!(channel = number, msgno, "no message listener; refusing request");
            message.stream().discard();
            let refusal =
                BeepError::with_diagnostic(CODE_SERVICE_NOT_AVAILABLE, "no message listener");
            if let Err(err) = message.send_err(&refusal) {
                error!(channel = number, msgno, error = %err, "failed to send ERR");
            }
            return;
        };

        match listener.receive_msg(message.clone()) {
            Ok(()) => {}
            Err(ListenerError::Reply(reply)) => {
                debug!(
                    channel = number,
                    msgno,
                    code = reply.code(),
                    "listener answered with ERR"
                );
                message.stream().discard();
                if let Err(err) = message.send_err(&reply) {
                    error!(channel = number, msgno, error = %err, "failed to send ERR");
                }
            }
            Err(ListenerError::Abort(reason)) => {
                warn!(channel = number, msgno, %reason, "listener aborted channel");
                message.stream().discard();
                if let Err(err) = self.close() {
                    error!(channel = number, error = %err, "failed to close channel");
                }
            }
        }
    }

    /// Give bytes of a discarded body back to the receive window.
    fn release_dropped(&self, bytes: usize) {
        trace!(channel = self.inner.number, bytes, "dropped payload of a discarded body");
        if let Err(err) = self.free_receive_buffer_bytes(bytes) {
            error!(channel = self.inner.number, error = %err, "failed to update receive window");
        }
    }

    /// Abort the channel and terminate the session.
    pub(super) fn protocol_violation(&self, violation: ProtocolViolation) -> ChannelError {
        let err = ChannelError::Protocol {
            channel: self.inner.number,
            violation,
        };
        error!(channel = self.inner.number, error = %err, "aborting channel");
        self.abort();
        self.inner.session.terminate(&err.to_string());
        err
    }
}

/// Feed a frame's payload to `stream`, returning the bytes it discarded.
fn append(stream: &InboundStream, frame: Frame) -> usize {
    let last = frame.last;
    let mut dropped = 0;
    for segment in frame.into_payload() {
        match stream.offer(segment) {
            Ok(bytes) => dropped += bytes,
            Err(err) => warn!(error = %err, "dropping payload for a finished message"),
        }
    }
    if last {
        stream.set_complete();
    }
    dropped
}
