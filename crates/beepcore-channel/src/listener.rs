//! Application callbacks.

use crate::error::ListenerError;
use crate::message::{Message, MessageMsg};
use beepcore_frame::MessageType;

/// Receives requests (MSG) arriving on a channel.
///
/// Requests are delivered one at a time, in arrival order: the next MSG is
/// handed over only after the previous one has been answered with RPY, ERR
/// or NUL. Returning [`ListenerError::Reply`] answers the request with that
/// ERR; [`ListenerError::Abort`] closes the channel.
pub trait MessageListener: Send + Sync {
    fn receive_msg(&self, message: MessageMsg) -> Result<(), ListenerError>;
}

impl<F> MessageListener for F
where
    F: Fn(MessageMsg) -> Result<(), ListenerError> + Send + Sync,
{
    fn receive_msg(&self, message: MessageMsg) -> Result<(), ListenerError> {
        self(message)
    }
}

/// Receives the replies to one MSG sent with `Channel::send_msg`.
pub trait ReplyListener: Send + Sync {
    fn receive_rpy(&self, message: Message);

    fn receive_err(&self, message: Message);

    /// Called once per answer number.
    fn receive_ans(&self, message: Message);

    /// Called after every answer has been delivered.
    fn receive_nul(&self, message: Message);
}

/// Any closure taking a [`Message`] handles every reply type.
impl<F> ReplyListener for F
where
    F: Fn(Message) + Send + Sync,
{
    fn receive_rpy(&self, message: Message) {
        self(message)
    }

    fn receive_err(&self, message: Message) {
        self(message)
    }

    fn receive_ans(&self, message: Message) {
        self(message)
    }

    fn receive_nul(&self, message: Message) {
        self(message)
    }
}

pub(crate) fn notify_reply(listener: &dyn ReplyListener, message: Message) {
    match message.message_type() {
        MessageType::Rpy => listener.receive_rpy(message),
        MessageType::Err => listener.receive_err(message),
        MessageType::Ans => listener.receive_ans(message),
        MessageType::Nul => listener.receive_nul(message),
        MessageType::Msg => {
            tracing::error!(
                channel = message.channel(),
                msgno = message.msgno(),
                "request routed to a reply listener"
            );
        }
    }
}
