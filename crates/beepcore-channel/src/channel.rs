//! The channel: lifecycle, traffic queues and flow-control windows.
//!
//! A [`Channel`] is a cheap handle; clones share one channel. Inbound frames
//! enter through [`Channel::post_frame`] (see `inbound.rs`), outbound
//! messages leave through the send path in `outbound.rs`.
//!
//! Lock order: `recv` before any queue, `send` before `pending` and
//! `received`. Listeners and the session are never called with a queue lock
//! held, except `Session::send_frame`, which runs under `send`.

mod inbound;
mod outbound;

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use beepcore_frame::{
    is_control, is_valid_channel, next_msgno, FrameTemplate, InboundStream, MessageType,
    ReleaseHook, ResumeHook, CONTROL, FIRST_MSGNO, GREETING_MSGNO, MAX_MSGNO,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::beep_error::CODE_SUCCESS;
use crate::config::ChannelConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ChannelError, Result};
use crate::listener::{MessageListener, ReplyListener};
use crate::message::{MessageMsg, ReceivedMsg};
use crate::session::Session;
use crate::state::ChannelState;
use crate::status::MessageStatus;
use crate::window::{LocalWindow, PeerWindow, WindowUpdate};

/// Content transfer encoding assumed until the session negotiates one.
pub const ENCODING_NONE: &str = "none";

/// Type and number of the message whose frames are still arriving.
#[derive(Debug, Clone, Copy)]
struct Continuation {
    message_type: MessageType,
    msgno: u32,
}

struct RecvState {
    sequence: u64,
    continuation: Option<Continuation>,
    window: LocalWindow,
}

struct SendState {
    sequence: u64,
    peer: PeerWindow,
}

/// Requests sent and awaiting a reply, plus the msgno allocator.
struct SentQueue {
    queue: VecDeque<Arc<MessageStatus>>,
    next_msgno: u32,
}

impl SentQueue {
    /// Next msgno not held by an outstanding request, or `None` when every
    /// number is in use. The control channel never reuses the greeting's 0.
    fn allocate(&mut self, control: bool) -> Option<u32> {
        let usable = MAX_MSGNO as usize + usize::from(!control);
        if self.queue.len() >= usable {
            return None;
        }
        loop {
            let candidate = self.next_msgno;
            self.next_msgno = next_msgno(candidate);
            if control && candidate == GREETING_MSGNO {
                continue;
            }
            if !self.queue.iter().any(|s| s.msgno() == candidate) {
                return Some(candidate);
            }
        }
    }
}

/// A reply being reassembled: the single RPY/ERR in progress or one open ANS.
struct InboundReply {
    message_type: MessageType,
    ansno: Option<u32>,
    stream: InboundStream,
    notified: bool,
}

struct Inner {
    number: u32,
    profile: RwLock<Option<String>>,
    encoding: RwLock<String>,
    start_data: RwLock<Option<String>>,
    session: Arc<dyn Session>,
    config: ChannelConfig,
    state: Mutex<ChannelState>,
    recv: Mutex<RecvState>,
    send: Mutex<SendState>,
    pending: Mutex<VecDeque<Arc<MessageStatus>>>,
    sent: Mutex<SentQueue>,
    received: Mutex<VecDeque<Arc<ReceivedMsg>>>,
    replies: Mutex<Vec<InboundReply>>,
    listener: RwLock<Option<Arc<dyn MessageListener>>>,
    requests: Dispatcher,
    answers: Dispatcher,
    app_data: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
}

/// One multiplexed, flow-controlled conversation within a session.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    /// Create a data channel in the `Initialized` state.
    ///
    /// Channel 0 is reserved; build it with [`Channel::new_control`].
    pub fn new(
        number: u32,
        profile: impl Into<String>,
        session: Arc<dyn Session>,
        config: ChannelConfig,
    ) -> Result<Self> {
        if is_control(number) || !is_valid_channel(number) {
            return Err(ChannelError::InvalidChannel(number));
        }
        let inner = Inner::new(
            number,
            Some(profile.into()),
            session,
            config,
            ChannelState::Initialized,
            SentQueue {
                queue: VecDeque::new(),
                next_msgno: FIRST_MSGNO,
            },
        );
        debug!(channel = number, "channel created");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Create the control channel, already `Active`.
    ///
    /// The greeting exchange is bootstrapped here: the sent-request queue
    /// holds a MSG 0 that was never actually sent, so the peer's unsolicited
    /// greeting RPY 0 is accepted as its reply and handed to
    /// `greeting_listener`; the received-request queue holds an already
    /// delivered MSG 0, answered by this side's own greeting
    /// (`current_request()?.send_rpy(..)`). Requests from the peer are
    /// delivered once that greeting has been sent.
    pub fn new_control(
        session: Arc<dyn Session>,
        config: ChannelConfig,
        greeting_listener: Arc<dyn ReplyListener>,
    ) -> Self {
        let greeting = Arc::new(MessageStatus::already_sent(
            FrameTemplate {
                message_type: MessageType::Msg,
                channel: CONTROL,
                msgno: GREETING_MSGNO,
                ansno: None,
            },
            greeting_listener,
        ));
        let mut queue = VecDeque::new();
        queue.push_back(greeting);
        let inner = Inner::new(
            CONTROL,
            None,
            session,
            config,
            ChannelState::Active,
            SentQueue {
                queue,
                next_msgno: FIRST_MSGNO,
            },
        );

        let peer_greeting = Arc::new(ReceivedMsg::new(GREETING_MSGNO, InboundStream::new()));
        peer_greeting.mark_delivered();
        peer_greeting.stream.set_complete();
        inner.received.lock().push_back(peer_greeting);

        debug!(channel = CONTROL, "control channel created");
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn number(&self) -> u32 {
        self.inner.number
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.inner.session
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn profile(&self) -> Option<String> {
        self.inner.profile.read().clone()
    }

    pub fn set_profile(&self, profile: impl Into<String>) {
        *self.inner.profile.write() = Some(profile.into());
    }

    pub fn encoding(&self) -> String {
        self.inner.encoding.read().clone()
    }

    pub fn set_encoding(&self, encoding: impl Into<String>) {
        *self.inner.encoding.write() = encoding.into();
    }

    /// Piggyback data from the channel-start exchange, stored uninterpreted.
    pub fn start_data(&self) -> Option<String> {
        self.inner.start_data.read().clone()
    }

    pub fn set_start_data(&self, data: impl Into<String>) {
        *self.inner.start_data.write() = Some(data.into());
    }

    /// Opaque application context.
    pub fn app_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.app_data.read().clone()
    }

    pub fn set_app_data(&self, data: Arc<dyn Any + Send + Sync>) {
        *self.inner.app_data.write() = Some(data);
    }

    pub fn message_listener(&self) -> Option<Arc<dyn MessageListener>> {
        self.inner.listener.read().clone()
    }

    /// Install (or with `None`, remove) the request listener, returning the
    /// previous one.
    pub fn set_message_listener(
        &self,
        listener: Option<Arc<dyn MessageListener>>,
    ) -> Option<Arc<dyn MessageListener>> {
        std::mem::replace(&mut *self.inner.listener.write(), listener)
    }

    /// Handle for the request currently with the application, if any.
    pub fn current_request(&self) -> Option<MessageMsg> {
        let head = self.inner.received.lock().front().cloned()?;
        (head.is_delivered() && !head.is_retired())
            .then(|| MessageMsg::new(self.clone(), head))
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.lock()
    }

    /// Move to `next`, enforcing the lifecycle. Entering `Closed` or
    /// `Aborted` fails every message still waiting to be sent.
    pub fn set_state(&self, next: ChannelState) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if !state.can_transition_to(next) {
                return Err(ChannelError::InvalidTransition {
                    channel: self.inner.number,
                    from: *state,
                    to: next,
                });
            }
            if *state != next {
                debug!(channel = self.inner.number, from = %*state, to = %next, "state change");
            }
            *state = next;
        }
        if next.is_terminal() {
            self.fail_pending();
        }
        Ok(())
    }

    /// Ask the session to close this channel.
    ///
    /// Only an `Active` channel can be closed; it waits in `ClosePending`
    /// for the session to finish the handshake, and returns to `Active` if
    /// the session refuses.
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != ChannelState::Active {
                return Err(self.invalid_state(*state, "close"));
            }
            *state = ChannelState::ClosePending;
        }
        debug!(channel = self.inner.number, "closing");

        match self
            .inner
            .session
            .close_channel(self.inner.number, CODE_SUCCESS, None)
        {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut state = self.inner.state.lock();
                if *state == ChannelState::ClosePending {
                    *state = ChannelState::Active;
                }
                warn!(channel = self.inner.number, error = %err, "close refused");
                Err(err.into())
            }
        }
    }

    /// Receive buffer size.
    pub fn buffer_size(&self) -> usize {
        self.inner.recv.lock().window.size()
    }

    /// Bytes received but not yet consumed.
    pub fn buffer_used(&self) -> usize {
        self.inner.recv.lock().window.used()
    }

    /// Free receive buffer space, for screening inbound frame sizes.
    pub fn available_window(&self) -> usize {
        self.inner.recv.lock().window.available()
    }

    /// Bytes the peer can currently accept.
    pub fn peer_window(&self) -> usize {
        self.inner.send.lock().peer.size()
    }

    /// Bytes received on this channel so far.
    pub fn recv_sequence(&self) -> u64 {
        self.inner.recv.lock().sequence
    }

    /// Bytes sent on this channel so far.
    pub fn send_sequence(&self) -> u64 {
        self.inner.send.lock().sequence
    }

    /// Resize the receive buffer. Allowed in `Initialized` and `Active`
    /// only, and never below the bytes in use. An active channel
    /// advertises the new window right away.
    pub fn set_receive_buffer_size(&self, size: usize) -> Result<()> {
        let state = self.state();
        if !matches!(state, ChannelState::Initialized | ChannelState::Active) {
            return Err(self.invalid_state(state, "set receive buffer size"));
        }

        let update = {
            let mut recv = self.inner.recv.lock();
            if !recv.window.resize(size) {
                return Err(ChannelError::BufferSize {
                    size,
                    used: recv.window.used(),
                });
            }
            debug!(channel = self.inner.number, size, "receive buffer resized");
            recv.window.advertisement(self.inner.number, recv.sequence)
        };

        if state == ChannelState::Active {
            self.advertise(update)?;
        }
        Ok(())
    }

    /// Return `bytes` the application consumed to the receive window,
    /// advertising the larger window when enough credit has built up.
    pub fn free_receive_buffer_bytes(&self, bytes: usize) -> Result<()> {
        let update = {
            let mut recv = self.inner.recv.lock();
            recv.window.release(bytes);
            tracing::trace!(
                channel = self.inner.number,
                bytes,
                used = recv.window.used(),
                "receive buffer freed"
            );
            let threshold = self
                .inner
                .config
                .window_update_threshold
                .unwrap_or(recv.window.size() / 2);
            if !recv.window.update_due(recv.sequence, threshold) {
                return Ok(());
            }
            recv.window.advertisement(self.inner.number, recv.sequence)
        };

        if self.state().is_terminal() {
            return Ok(());
        }
        self.advertise(update)
    }

    fn advertise(&self, update: WindowUpdate) -> Result<()> {
        if self.inner.session.update_receive_buffer_size(&update)? {
            debug!(
                channel = update.channel,
                ackno = update.recv_sequence,
                window = update.available(),
                "receive window advertised"
            );
            self.inner.recv.lock().window.record(&update);
        }
        Ok(())
    }

    fn invalid_state(&self, state: ChannelState, operation: &'static str) -> ChannelError {
        ChannelError::InvalidState {
            channel: self.inner.number,
            state,
            operation,
        }
    }

    fn require_traffic(&self, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state.carries_traffic() {
            Ok(())
        } else {
            Err(self.invalid_state(state, operation))
        }
    }

    /// Abort after a fatal error; a channel already closed stays closed.
    fn abort(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.is_terminal() {
                return;
            }
            *state = ChannelState::Aborted;
        }
        self.fail_pending();
    }

    fn fail_pending(&self) {
        let pending: Vec<_> = self.inner.pending.lock().drain(..).collect();
        for status in pending {
            status.stream().detach();
            status.mark_not_sent();
        }
    }

    fn inbound_stream(&self) -> InboundStream {
        InboundStream::with_release(Arc::new(WindowRelease(Arc::downgrade(&self.inner))))
    }

    fn resume_hook(&self) -> Arc<dyn ResumeHook> {
        Arc::new(SendResume(Arc::downgrade(&self.inner)))
    }
}

impl Inner {
    fn new(
        number: u32,
        profile: Option<String>,
        session: Arc<dyn Session>,
        config: ChannelConfig,
        state: ChannelState,
        sent: SentQueue,
    ) -> Self {
        Self {
            number,
            profile: RwLock::new(profile),
            encoding: RwLock::new(ENCODING_NONE.to_string()),
            start_data: RwLock::new(None),
            session,
            state: Mutex::new(state),
            recv: Mutex::new(RecvState {
                sequence: 0,
                continuation: None,
                window: LocalWindow::new(config.receive_window),
            }),
            send: Mutex::new(SendState {
                sequence: 0,
                peer: PeerWindow::new(config.peer_window),
            }),
            pending: Mutex::new(VecDeque::new()),
            sent: Mutex::new(sent),
            received: Mutex::new(VecDeque::new()),
            replies: Mutex::new(Vec::new()),
            listener: RwLock::new(None),
            requests: Dispatcher::new(format!("beep-ch{number}-msg"), config.delivery_mode),
            answers: Dispatcher::new(format!("beep-ch{number}-rpy"), config.delivery_mode),
            app_data: RwLock::new(None),
            config,
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("number", &self.inner.number)
            .field("state", &self.state())
            .finish()
    }
}

/// Returns bytes drained from an inbound stream to the channel's window.
struct WindowRelease(Weak<Inner>);

impl ReleaseHook for WindowRelease {
    fn release(&self, bytes: usize) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        let channel = Channel { inner };
        if let Err(err) = channel.free_receive_buffer_bytes(bytes) {
            error!(channel = channel.number(), error = %err, "failed to update receive window");
        }
    }
}

/// Resumes transmission when a queued outbound stream gains data.
struct SendResume(Weak<Inner>);

impl ResumeHook for SendResume {
    fn resume(&self) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        let channel = Channel { inner };
        if let Err(err) = channel.send_queued_messages() {
            error!(channel = channel.number(), error = %err, "failed to resume sending");
        }
    }
}
