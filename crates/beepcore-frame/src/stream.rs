//! Segmented message bodies.
//!
//! [`InboundStream`] is the append-only sink a channel fills while frames of a
//! message arrive; the application drains it, and every drained byte is handed
//! back to the channel's receive window through a [`ReleaseHook`].
//!
//! [`OutboundStream`] is the source a channel slices into frames. The
//! application may keep appending segments after the message was queued; each
//! append (and the final completion) pokes the channel through a
//! [`ResumeHook`] so a stalled transmission picks up again.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};

use crate::error::{FrameError, Result};

/// Receives the number of bytes the application consumed from an inbound stream.
pub trait ReleaseHook: Send + Sync {
    fn release(&self, bytes: usize);
}

/// Notified when an outbound stream gains data or completes.
pub trait ResumeHook: Send + Sync {
    fn resume(&self);
}

#[derive(Default)]
struct InboundState {
    segments: VecDeque<Bytes>,
    buffered: usize,
    received: usize,
    complete: bool,
    discarding: bool,
}

struct InboundShared {
    state: Mutex<InboundState>,
    ready: Condvar,
    release: Option<Arc<dyn ReleaseHook>>,
}

/// Append-only, completion-signaled body of a received message.
#[derive(Clone)]
pub struct InboundStream {
    shared: Arc<InboundShared>,
}

impl InboundStream {
    /// Create a stream whose consumed bytes are not reported anywhere.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a stream that reports consumed bytes to `hook`.
    pub fn with_release(hook: Arc<dyn ReleaseHook>) -> Self {
        Self::build(Some(hook))
    }

    fn build(release: Option<Arc<dyn ReleaseHook>>) -> Self {
        Self {
            shared: Arc::new(InboundShared {
                state: Mutex::new(InboundState::default()),
                ready: Condvar::new(),
                release,
            }),
        }
    }

    /// Append a received segment. On a discarded stream the segment is
    /// dropped and reported through the release hook instead.
    pub fn push(&self, segment: Bytes) -> Result<()> {
        let dropped = self.offer(segment)?;
        self.released(dropped);
        Ok(())
    }

    /// Append a received segment, returning how many bytes were dropped
    /// because the stream was discarded.
    ///
    /// Dropped bytes are not reported to the release hook; the caller owns
    /// them. This lets a channel feed the stream while it holds the lock the
    /// hook would take.
    pub fn offer(&self, segment: Bytes) -> Result<usize> {
        let mut state = self.shared.state.lock();
        if state.complete {
            return Err(FrameError::StreamComplete);
        }
        state.received += segment.len();
        if state.discarding {
            return Ok(segment.len());
        }
        if !segment.is_empty() {
            state.buffered += segment.len();
            state.segments.push_back(segment);
        }
        drop(state);
        self.shared.ready.notify_all();
        Ok(0)
    }

    /// Throw the body away: drop what is buffered and every segment still
    /// to arrive. Buffered bytes are reported to the release hook as if
    /// they had been read.
    pub fn discard(&self) {
        let len = {
            let mut state = self.shared.state.lock();
            state.discarding = true;
            state.segments.clear();
            std::mem::take(&mut state.buffered)
        };
        self.shared.ready.notify_all();
        self.released(len);
    }

    /// True once [`discard`](Self::discard) has been called.
    pub fn is_discarded(&self) -> bool {
        self.shared.state.lock().discarding
    }

    /// Mark the stream complete; no further segments will arrive.
    pub fn set_complete(&self) {
        self.shared.state.lock().complete = true;
        self.shared.ready.notify_all();
    }

    /// True once the last frame of the message has been received.
    pub fn is_complete(&self) -> bool {
        self.shared.state.lock().complete
    }

    /// True once the stream is complete and every byte has been consumed.
    pub fn is_finished(&self) -> bool {
        let state = self.shared.state.lock();
        state.complete && state.buffered == 0
    }

    /// Bytes received but not yet consumed.
    pub fn available(&self) -> usize {
        self.shared.state.lock().buffered
    }

    /// Total bytes received so far.
    pub fn received(&self) -> usize {
        self.shared.state.lock().received
    }

    /// Take the next buffered segment without waiting.
    pub fn try_next_segment(&self) -> Option<Bytes> {
        let segment = {
            let mut state = self.shared.state.lock();
            let segment = state.segments.pop_front()?;
            state.buffered -= segment.len();
            segment
        };
        self.released(segment.len());
        Some(segment)
    }

    /// Take the next segment, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or when the stream is complete and drained.
    pub fn next_segment_timeout(&self, timeout: Duration) -> Option<Bytes> {
        let deadline = Instant::now() + timeout;
        let segment = {
            let mut state = self.shared.state.lock();
            loop {
                if let Some(segment) = state.segments.pop_front() {
                    state.buffered -= segment.len();
                    break segment;
                }
                if state.complete {
                    return None;
                }
                if self.shared.ready.wait_until(&mut state, deadline).timed_out()
                    && state.segments.is_empty()
                {
                    return None;
                }
            }
        };
        self.released(segment.len());
        Some(segment)
    }

    /// Drain everything buffered so far into one contiguous buffer.
    pub fn read_available(&self) -> Bytes {
        let (buf, len) = {
            let mut state = self.shared.state.lock();
            let mut buf = BytesMut::with_capacity(state.buffered);
            for segment in state.segments.drain(..) {
                buf.extend_from_slice(&segment);
            }
            let len = state.buffered;
            state.buffered = 0;
            (buf.freeze(), len)
        };
        self.released(len);
        buf
    }

    /// Wait until the stream is complete. Returns false on timeout.
    pub fn wait_complete(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.complete {
            if self.shared.ready.wait_until(&mut state, deadline).timed_out() {
                return state.complete;
            }
        }
        true
    }

    fn released(&self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        if let Some(hook) = &self.shared.release {
            hook.release(bytes);
        }
    }
}

impl Default for InboundStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for InboundStream {
    /// Blocks until data is buffered or the stream completes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let copied = {
            let mut state = self.shared.state.lock();
            loop {
                if let Some(mut segment) = state.segments.pop_front() {
                    let n = segment.len().min(buf.len());
                    buf[..n].copy_from_slice(&segment[..n]);
                    if n < segment.len() {
                        state.segments.push_front(segment.split_off(n));
                    }
                    state.buffered -= n;
                    break n;
                }
                if state.complete {
                    return Ok(0);
                }
                self.shared.ready.wait(&mut state);
            }
        };
        self.released(copied);
        Ok(copied)
    }
}

impl fmt::Debug for InboundStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("InboundStream")
            .field("buffered", &state.buffered)
            .field("received", &state.received)
            .field("complete", &state.complete)
            .finish()
    }
}

#[derive(Default)]
struct OutboundState {
    segments: VecDeque<Bytes>,
    queued: usize,
    complete: bool,
}

struct OutboundShared {
    state: Mutex<OutboundState>,
    hook: Mutex<Option<Arc<dyn ResumeHook>>>,
}

/// Segment-producing body of a message being sent.
#[derive(Clone)]
pub struct OutboundStream {
    shared: Arc<OutboundShared>,
}

impl OutboundStream {
    /// Create an open stream; append with [`push`](Self::push) and finish
    /// with [`set_complete`](Self::set_complete).
    pub fn new() -> Self {
        Self::build(OutboundState::default())
    }

    /// Create a complete stream holding `data`.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let mut state = OutboundState {
            complete: true,
            ..OutboundState::default()
        };
        if !data.is_empty() {
            state.queued = data.len();
            state.segments.push_back(data);
        }
        Self::build(state)
    }

    /// Create a complete stream with no data.
    pub fn empty() -> Self {
        Self::build(OutboundState {
            complete: true,
            ..OutboundState::default()
        })
    }

    fn build(state: OutboundState) -> Self {
        Self {
            shared: Arc::new(OutboundShared {
                state: Mutex::new(state),
                hook: Mutex::new(None),
            }),
        }
    }

    /// Append a segment.
    pub fn push(&self, segment: impl Into<Bytes>) -> Result<()> {
        let segment = segment.into();
        {
            let mut state = self.shared.state.lock();
            if state.complete {
                return Err(FrameError::StreamComplete);
            }
            if segment.is_empty() {
                return Ok(());
            }
            state.queued += segment.len();
            state.segments.push_back(segment);
        }
        self.wake();
        Ok(())
    }

    /// Mark the stream complete.
    pub fn set_complete(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.complete {
                return;
            }
            state.complete = true;
        }
        self.wake();
    }

    /// True once no more segments will be appended.
    pub fn is_complete(&self) -> bool {
        self.shared.state.lock().complete
    }

    /// True if a segment is ready to be sliced.
    pub fn has_segment(&self) -> bool {
        !self.shared.state.lock().segments.is_empty()
    }

    /// Bytes queued but not yet taken.
    pub fn pending_bytes(&self) -> usize {
        self.shared.state.lock().queued
    }

    /// Take up to `max` bytes of the next segment, splitting it if needed.
    pub fn next_segment(&self, max: usize) -> Option<Bytes> {
        let mut state = self.shared.state.lock();
        Self::take(&mut state, max)
    }

    /// Register the hook poked on every append and on completion,
    /// replacing any previous one.
    pub fn attach(&self, hook: Arc<dyn ResumeHook>) {
        *self.shared.hook.lock() = Some(hook);
    }

    /// Remove the resume hook.
    pub fn detach(&self) {
        self.shared.hook.lock().take();
    }

    /// Take as many bytes as fit in `max` in one atomic step, reporting
    /// whether the stream is exhausted afterwards.
    pub(crate) fn take_up_to(&self, max: usize) -> (Vec<Bytes>, usize, bool) {
        let mut state = self.shared.state.lock();
        let mut segments = Vec::new();
        let mut size = 0;
        while size < max {
            match Self::take(&mut state, max - size) {
                Some(segment) => {
                    size += segment.len();
                    segments.push(segment);
                }
                None => break,
            }
        }
        let exhausted = state.complete && state.segments.is_empty();
        (segments, size, exhausted)
    }

    fn take(state: &mut OutboundState, max: usize) -> Option<Bytes> {
        if max == 0 {
            return None;
        }
        let front = state.segments.front_mut()?;
        let segment = if front.len() > max {
            front.split_to(max)
        } else {
            state.segments.pop_front()?
        };
        state.queued -= segment.len();
        Some(segment)
    }

    fn wake(&self) {
        let hook = self.shared.hook.lock().clone();
        if let Some(hook) = hook {
            hook.resume();
        }
    }
}

impl Default for OutboundStream {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Bytes> for OutboundStream {
    fn from(data: Bytes) -> Self {
        Self::from_bytes(data)
    }
}

impl From<&'static str> for OutboundStream {
    fn from(data: &'static str) -> Self {
        Self::from_bytes(data)
    }
}

impl From<Vec<u8>> for OutboundStream {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(data)
    }
}

impl fmt::Debug for OutboundStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("OutboundStream")
            .field("queued", &state.queued)
            .field("complete", &state.complete)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl ReleaseHook for Counter {
        fn release(&self, bytes: usize) {
            self.0.fetch_add(bytes, Ordering::SeqCst);
        }
    }

    impl ResumeHook for Counter {
        fn resume(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn inbound_segments_in_order() {
        let stream = InboundStream::new();
        stream.push(Bytes::from_static(b"one")).unwrap();
        stream.push(Bytes::from_static(b"two")).unwrap();

        assert_eq!(stream.available(), 6);
        assert_eq!(stream.try_next_segment().unwrap().as_ref(), b"one");
        assert_eq!(stream.try_next_segment().unwrap().as_ref(), b"two");
        assert!(stream.try_next_segment().is_none());
        assert!(!stream.is_finished());

        stream.set_complete();
        assert!(stream.is_finished());
    }

    #[test]
    fn inbound_rejects_push_after_complete() {
        let stream = InboundStream::new();
        stream.set_complete();
        let err = stream.push(Bytes::from_static(b"late")).unwrap_err();
        assert!(matches!(err, FrameError::StreamComplete));
    }

    #[test]
    fn inbound_reports_consumed_bytes() {
        let counter = Arc::new(Counter::default());
        let stream = InboundStream::with_release(counter.clone());
        stream.push(Bytes::from_static(b"abcdef")).unwrap();
        stream.push(Bytes::from_static(b"gh")).unwrap();

        let mut buf = [0u8; 4];
        let mut reader = stream.clone();
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(counter.0.load(Ordering::SeqCst), 4);

        assert_eq!(stream.read_available().as_ref(), b"efgh");
        assert_eq!(counter.0.load(Ordering::SeqCst), 8);
        assert_eq!(stream.received(), 8);
    }

    #[test]
    fn discarded_inbound_drops_and_releases_everything() {
        let counter = Arc::new(Counter::default());
        let stream = InboundStream::with_release(counter.clone());
        stream.push(Bytes::from_static(b"abc")).unwrap();

        stream.discard();
        assert!(stream.is_discarded());
        assert_eq!(stream.available(), 0);
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);

        assert_eq!(stream.offer(Bytes::from_static(b"defg")).unwrap(), 4);
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
        stream.push(Bytes::from_static(b"hi")).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 5);

        stream.set_complete();
        assert!(stream.is_finished());
        assert_eq!(stream.received(), 9);

        let mut body = Vec::new();
        stream.clone().read_to_end(&mut body).unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn inbound_read_to_end_waits_for_completion() {
        let stream = InboundStream::new();
        let producer = stream.clone();

        let handle = thread::spawn(move || {
            producer.push(Bytes::from_static(b"hello, ")).unwrap();
            thread::sleep(Duration::from_millis(10));
            producer.push(Bytes::from_static(b"beep")).unwrap();
            producer.set_complete();
        });

        let mut out = Vec::new();
        let mut reader = stream.clone();
        reader.read_to_end(&mut out).unwrap();
        handle.join().unwrap();

        assert_eq!(out, b"hello, beep");
        assert!(stream.is_finished());
    }

    #[test]
    fn inbound_segment_timeout() {
        let stream = InboundStream::new();
        assert!(stream
            .next_segment_timeout(Duration::from_millis(5))
            .is_none());
        assert!(!stream.wait_complete(Duration::from_millis(5)));

        stream.push(Bytes::from_static(b"x")).unwrap();
        assert_eq!(
            stream
                .next_segment_timeout(Duration::from_millis(5))
                .unwrap()
                .as_ref(),
            b"x"
        );
    }

    #[test]
    fn outbound_splits_segments() {
        let stream = OutboundStream::from_bytes(&b"0123456789"[..]);
        assert_eq!(stream.pending_bytes(), 10);

        assert_eq!(stream.next_segment(4).unwrap().as_ref(), b"0123");
        assert_eq!(stream.next_segment(4).unwrap().as_ref(), b"4567");
        assert_eq!(stream.next_segment(4).unwrap().as_ref(), b"89");
        assert!(stream.next_segment(4).is_none());
        assert_eq!(stream.pending_bytes(), 0);
    }

    #[test]
    fn outbound_take_up_to_spans_segments() {
        let stream = OutboundStream::new();
        stream.push("abc").unwrap();
        stream.push("defg").unwrap();

        let (segments, size, exhausted) = stream.take_up_to(5);
        assert_eq!(size, 5);
        assert_eq!(segments.len(), 2);
        assert!(!exhausted);

        stream.set_complete();
        let (segments, size, exhausted) = stream.take_up_to(5);
        assert_eq!(size, 2);
        assert_eq!(segments[0].as_ref(), b"fg");
        assert!(exhausted);
    }

    #[test]
    fn outbound_wakes_hook_on_push_and_complete() {
        let counter = Arc::new(Counter::default());
        let stream = OutboundStream::new();
        stream.attach(counter.clone());

        stream.push("a").unwrap();
        stream.push("").unwrap();
        stream.set_complete();
        stream.set_complete();

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);

        stream.detach();
        assert!(matches!(stream.push("b"), Err(FrameError::StreamComplete)));
    }

    #[test]
    fn empty_outbound_is_complete() {
        let stream = OutboundStream::empty();
        assert!(stream.is_complete());
        assert!(!stream.has_segment());
        assert_eq!(stream.take_up_to(16), (Vec::new(), 0, true));
    }
}
