//! Fakes for the session and listeners used by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use beepcore_frame::{Frame, MessageType};
use parking_lot::Mutex;

use crate::error::{ListenerError, SessionError};
use crate::listener::{MessageListener, ReplyListener};
use crate::message::{Message, MessageMsg};
use crate::session::Session;
use crate::window::WindowUpdate;

/// Session that records everything the channel asks of it.
pub(crate) struct RecordingSession {
    pub(crate) frames: Mutex<Vec<Frame>>,
    pub(crate) updates: Mutex<Vec<WindowUpdate>>,
    pub(crate) closes: Mutex<Vec<(u32, u16)>>,
    pub(crate) terminated: Mutex<Option<String>>,
    pub(crate) io_disabled: AtomicBool,
    pub(crate) fail_sends: AtomicBool,
    pub(crate) refuse_close: AtomicBool,
    pub(crate) refuse_updates: AtomicBool,
    max_frame: AtomicUsize,
}

impl RecordingSession {
    pub(crate) fn new(max_frame: usize) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            terminated: Mutex::new(None),
            io_disabled: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            refuse_close: AtomicBool::new(false),
            refuse_updates: AtomicBool::new(false),
            max_frame: AtomicUsize::new(max_frame),
        })
    }

    pub(crate) fn take_frames(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.frames.lock())
    }

    pub(crate) fn terminated(&self) -> Option<String> {
        self.terminated.lock().clone()
    }
}

impl Session for RecordingSession {
    fn send_frame(&self, frame: Frame) -> Result<(), SessionError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "connection reset",
            )));
        }
        self.frames.lock().push(frame);
        Ok(())
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame.load(Ordering::SeqCst)
    }

    fn close_channel(
        &self,
        channel: u32,
        code: u16,
        _reason: Option<&str>,
    ) -> Result<(), SessionError> {
        if self.refuse_close.load(Ordering::SeqCst) {
            return Err(SessionError::Refused("550 still working".into()));
        }
        self.closes.lock().push((channel, code));
        Ok(())
    }

    fn update_receive_buffer_size(&self, update: &WindowUpdate) -> Result<bool, SessionError> {
        if self.refuse_updates.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.updates.lock().push(*update);
        Ok(true)
    }

    fn disable_io(&self) {
        self.io_disabled.store(true, Ordering::SeqCst);
    }

    fn terminate(&self, reason: &str) {
        *self.terminated.lock() = Some(reason.to_string());
    }
}

/// Reply listener that keeps every reply it is given.
pub(crate) fn reply_recorder() -> (Arc<dyn ReplyListener>, Arc<Mutex<Vec<Message>>>) {
    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);
    let listener: Arc<dyn ReplyListener> =
        Arc::new(move |message: Message| sink.lock().push(message));
    (listener, replies)
}

/// Message listener that keeps every request without answering it.
pub(crate) fn request_recorder() -> (Arc<dyn MessageListener>, Arc<Mutex<Vec<MessageMsg>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&requests);
    let listener: Arc<dyn MessageListener> =
        Arc::new(move |message: MessageMsg| -> Result<(), ListenerError> {
            sink.lock().push(message);
            Ok(())
        });
    (listener, requests)
}

/// Builds the frames a peer would send, keeping the sequence number running.
pub(crate) struct PeerFrames {
    channel: u32,
    seqno: u64,
}

impl PeerFrames {
    pub(crate) fn new(channel: u32) -> Self {
        Self { channel, seqno: 0 }
    }

    pub(crate) fn next(
        &mut self,
        message_type: MessageType,
        msgno: u32,
        ansno: Option<u32>,
        last: bool,
        payload: &'static str,
    ) -> Frame {
        let mut frame = Frame::new(message_type, self.channel, msgno, ansno, self.seqno, last);
        if !payload.is_empty() {
            frame = frame.with_payload(payload);
        }
        self.seqno += payload.len() as u64;
        frame
    }

    pub(crate) fn msg(&mut self, msgno: u32, last: bool, payload: &'static str) -> Frame {
        self.next(MessageType::Msg, msgno, None, last, payload)
    }

    pub(crate) fn rpy(&mut self, msgno: u32, last: bool, payload: &'static str) -> Frame {
        self.next(MessageType::Rpy, msgno, None, last, payload)
    }

    pub(crate) fn ans(
        &mut self,
        msgno: u32,
        ansno: u32,
        last: bool,
        payload: &'static str,
    ) -> Frame {
        self.next(MessageType::Ans, msgno, Some(ansno), last, payload)
    }

    pub(crate) fn nul(&mut self, msgno: u32) -> Frame {
        self.next(MessageType::Nul, msgno, None, true, "")
    }
}
