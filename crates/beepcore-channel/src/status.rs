//! Delivery tracking for outbound messages.

use std::fmt;
use std::sync::Arc;

use beepcore_frame::{FrameTemplate, MessageType, OutboundStream};
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

use crate::listener::ReplyListener;

/// Where an outbound message is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Waiting for (more) peer window or more stream data.
    Queued,
    /// Every frame, including the terminal one, was handed to the session.
    Sent,
    /// The transport failed, or the channel closed before the message went out.
    NotSent,
    /// The RPY (or final NUL) for this MSG arrived.
    ReplyReceived,
    /// The ERR for this MSG arrived.
    ErrorReceived,
}

impl DeliveryStatus {
    pub fn is_final(self) -> bool {
        !matches!(self, DeliveryStatus::Queued | DeliveryStatus::Sent)
    }
}

/// Tracking record for one outbound MSG, RPY, ERR, ANS or NUL.
pub struct MessageStatus {
    template: FrameTemplate,
    stream: OutboundStream,
    reply_listener: Option<Arc<dyn ReplyListener>>,
    status: Mutex<DeliveryStatus>,
    changed: Condvar,
}

impl MessageStatus {
    pub(crate) fn new(
        template: FrameTemplate,
        stream: OutboundStream,
        reply_listener: Option<Arc<dyn ReplyListener>>,
    ) -> Self {
        Self {
            template,
            stream,
            reply_listener,
            status: Mutex::new(DeliveryStatus::Queued),
            changed: Condvar::new(),
        }
    }

    /// A MSG that already went out, used to seed the control channel.
    pub(crate) fn already_sent(
        template: FrameTemplate,
        reply_listener: Arc<dyn ReplyListener>,
    ) -> Self {
        let status = Self::new(template, OutboundStream::empty(), Some(reply_listener));
        *status.status.lock() = DeliveryStatus::Sent;
        status
    }

    pub fn channel(&self) -> u32 {
        self.template.channel
    }

    pub fn message_type(&self) -> MessageType {
        self.template.message_type
    }

    pub fn msgno(&self) -> u32 {
        self.template.msgno
    }

    pub fn ansno(&self) -> Option<u32> {
        self.template.ansno
    }

    /// The body being sent. Appending to an open stream resumes transmission.
    pub fn stream(&self) -> &OutboundStream {
        &self.stream
    }

    pub fn status(&self) -> DeliveryStatus {
        *self.status.lock()
    }

    /// Block until the status leaves `Queued` or `timeout` elapses.
    pub fn wait_sent(&self, timeout: Duration) -> DeliveryStatus {
        let mut status = self.status.lock();
        if *status == DeliveryStatus::Queued {
            let _ = self
                .changed
                .wait_while_for(&mut status, |s| *s == DeliveryStatus::Queued, timeout);
        }
        *status
    }

    /// Block until a reply outcome (or failure) is recorded or `timeout` elapses.
    pub fn wait_final(&self, timeout: Duration) -> DeliveryStatus {
        let mut status = self.status.lock();
        if !status.is_final() {
            let _ = self
                .changed
                .wait_while_for(&mut status, |s| !s.is_final(), timeout);
        }
        *status
    }

    pub(crate) fn template(&self) -> &FrameTemplate {
        &self.template
    }

    pub(crate) fn reply_listener(&self) -> Option<&Arc<dyn ReplyListener>> {
        self.reply_listener.as_ref()
    }

    /// Queued -> Sent. A reply may already have arrived for a MSG whose last
    /// frame was only just written; that outcome is kept.
    pub(crate) fn mark_sent(&self) {
        self.transition(|current| {
            (current == DeliveryStatus::Queued).then_some(DeliveryStatus::Sent)
        });
    }

    /// Record a failure unless an outcome is already known.
    pub(crate) fn mark_not_sent(&self) {
        self.transition(|current| (!current.is_final()).then_some(DeliveryStatus::NotSent));
    }

    pub(crate) fn set(&self, status: DeliveryStatus) {
        self.transition(|_| Some(status));
    }

    fn transition(&self, next: impl FnOnce(DeliveryStatus) -> Option<DeliveryStatus>) {
        let mut status = self.status.lock();
        if let Some(next) = next(*status) {
            *status = next;
            self.changed.notify_all();
        }
    }
}

impl fmt::Debug for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStatus")
            .field("message_type", &self.template.message_type)
            .field("channel", &self.template.channel)
            .field("msgno", &self.template.msgno)
            .field("ansno", &self.template.ansno)
            .field("status", &self.status())
            .finish()
    }
}
